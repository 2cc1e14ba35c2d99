//! In-process event bus.
//!
//! Input edges drained from the sampler and output transitions applied by
//! the engine are published here in the order they happen.  The engine
//! drains the bus once per tick and fans each event out to the running
//! trial, the IO self-tests and the event sink.
//!
//! ```text
//! ┌─────────────┐            ┌────────────┐            ┌─────────────┐
//! │ EdgeStream  │──Input───▶│            │            │ Runner      │
//! │             │            │  EventBus  │──drain───▶│ Self-tests  │
//! │ apply_outputs──Output──▶│  (FIFO)    │            │ EventSink   │
//! └─────────────┘            └────────────┘            └─────────────┘
//! ```

use heapless::Deque;

use crate::io::IoEdge;

/// Events held between two drains.
pub const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Debounced input transition.
    Input(IoEdge),
    /// Output level actually written.
    Output(IoEdge),
}

impl BusEvent {
    pub fn edge(&self) -> IoEdge {
        match *self {
            Self::Input(edge) | Self::Output(edge) => edge,
        }
    }
}

/// Bounded FIFO.  Publishing to a full bus drops the event and reports it
/// to the caller; producers that cannot afford a drop check
/// [`EventBus::is_full`] first and leave their own events queued upstream.
#[derive(Default)]
pub struct EventBus {
    queue: Deque<BusEvent, BUS_CAPACITY>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the bus is full (event dropped).
    #[must_use]
    pub fn publish(&mut self, event: BusEvent) -> bool {
        self.queue.push_back(event).is_ok()
    }

    pub fn pop(&mut self) -> Option<BusEvent> {
        self.queue.pop_front()
    }

    /// Drain all pending events into a callback, in FIFO order.
    pub fn drain(&mut self, mut handler: impl FnMut(BusEvent)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
