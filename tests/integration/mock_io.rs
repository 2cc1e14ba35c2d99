//! Mock IO port and event sink for integration tests.
//!
//! `MockIo` records every output write and lets a test inject input edges
//! with exact timestamps.  `RecordingSink` keeps every engine event.

use bbox::app::events::EngineEvent;
use bbox::app::ports::{EventSink, IoError, IoPort};
use bbox::io::queue::{EdgeSender, EdgeStream, edge_channel};
use bbox::io::{Channel, IoEdge, IoState};

// ── MockIo ────────────────────────────────────────────────────

pub struct MockIo {
    sender: EdgeSender,
    stream: Option<EdgeStream>,
    state: IoState,
    /// Every successful write, in order.
    pub writes: Vec<(Channel, bool)>,
    /// Outputs whose writes fail.
    pub broken: Vec<Channel>,
}

#[allow(dead_code)]
impl MockIo {
    pub fn new() -> Self {
        let (sender, stream) = edge_channel();
        Self {
            sender,
            stream: Some(stream),
            state: IoState::default(),
            writes: Vec::new(),
            broken: Vec::new(),
        }
    }

    /// Deliver an edge as if the sampler had debounced it at `at_us`.
    pub fn inject(&mut self, channel: Channel, active: bool, at_us: u64) {
        self.state.set(channel, active);
        self.sender
            .try_send(IoEdge {
                channel,
                active,
                at_us,
            })
            .expect("edge queue full");
    }

    pub fn level(&self, channel: Channel) -> bool {
        self.state.get(channel)
    }

    /// How many times `channel` was switched on.
    pub fn activations(&self, channel: Channel) -> usize {
        self.writes
            .iter()
            .filter(|&&(c, level)| c == channel && level)
            .count()
    }
}

impl Default for MockIo {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPort for MockIo {
    fn read(&self, channel: Channel) -> bool {
        self.state.get(channel)
    }

    fn write(&mut self, channel: Channel, level: bool) -> Result<(), IoError> {
        if channel.is_input() {
            return Err(IoError::NotAnOutput(channel));
        }
        if self.broken.contains(&channel) {
            return Err(IoError::Gpio {
                line: 99,
                detail: "stuck".into(),
            });
        }
        self.state.set(channel, level);
        self.writes.push((channel, level));
        Ok(())
    }

    fn subscribe(&mut self) -> Result<EdgeStream, IoError> {
        self.stream.take().ok_or(IoError::AlreadySubscribed)
    }

    fn snapshot(&self) -> IoState {
        self.state
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<EngineEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn rejections(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::CommandRejected { command, .. } => Some(*command),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &EngineEvent) {
        self.events.push(event.clone());
    }
}
