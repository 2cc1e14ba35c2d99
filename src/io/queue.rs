//! Sampling context → tick loop hand-off.
//!
//! ```text
//! ┌──────────────┐   IoEdge (SPSC, bounded)   ┌──────────────┐
//! │ InputSampler │──────────────────────────▶│  Engine tick  │
//! │ (own thread) │                            │  (consumer)   │
//! │              │──▶ SharedLevels (atomics) ◀│  IoPort::read │
//! └──────────────┘                            └──────────────┘
//! ```
//!
//! The queue is an `embassy-sync` channel behind an `Arc`; [`EdgeSender`]
//! and [`EdgeStream`] are deliberately not `Clone`, so exactly one producer
//! and one consumer exist.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel as SyncChannel;

use super::{Channel, IoEdge};

/// Edges in flight between the sampler and the tick loop.
pub const EDGE_QUEUE_DEPTH: usize = 64;

type EdgeQueue = SyncChannel<CriticalSectionRawMutex, IoEdge, EDGE_QUEUE_DEPTH>;

/// Create the producer/consumer pair.
pub fn edge_channel() -> (EdgeSender, EdgeStream) {
    let queue = Arc::new(EdgeQueue::new());
    (
        EdgeSender {
            queue: Arc::clone(&queue),
        },
        EdgeStream { queue },
    )
}

/// Producer half, owned by the sampler.
pub struct EdgeSender {
    queue: Arc<EdgeQueue>,
}

impl EdgeSender {
    /// Hands the edge back when the queue is full.
    pub fn try_send(&self, edge: IoEdge) -> Result<(), IoEdge> {
        self.queue.try_send(edge).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(edge) => edge,
        })
    }
}

/// Consumer half, obtained once through `IoPort::subscribe`.
///
/// Iterating yields whatever is pending right now; a later call can yield
/// more, so the iterator is not fused.
pub struct EdgeStream {
    queue: Arc<EdgeQueue>,
}

impl EdgeStream {
    pub fn try_next(&mut self) -> Option<IoEdge> {
        self.queue.try_receive().ok()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Iterator for EdgeStream {
    type Item = IoEdge;

    fn next(&mut self) -> Option<IoEdge> {
        self.try_next()
    }
}

/// Latest debounced level of each input, and whether its last read
/// failed, written by the sampler.
#[derive(Debug, Clone, Default)]
pub struct SharedLevels {
    inner: Arc<[AtomicBool; Channel::INPUTS.len()]>,
    faults: Arc<[AtomicBool; Channel::INPUTS.len()]>,
}

impl SharedLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs always read `false` here; their level lives in the port.
    pub fn get(&self, channel: Channel) -> bool {
        channel.is_input() && self.inner[channel.index()].load(Ordering::Acquire)
    }

    pub fn set(&self, channel: Channel, active: bool) {
        if channel.is_input() {
            self.inner[channel.index()].store(active, Ordering::Release);
        }
    }

    /// Record the outcome of the latest read.  Returns the previous state.
    pub fn set_fault(&self, channel: Channel, failing: bool) -> bool {
        channel.is_input() && self.faults[channel.index()].swap(failing, Ordering::AcqRel)
    }

    /// First input, in priority order, whose last read failed.
    pub fn faulted(&self) -> Option<Channel> {
        Channel::INPUTS
            .into_iter()
            .find(|channel| self.faults[channel.index()].load(Ordering::Acquire))
    }
}
