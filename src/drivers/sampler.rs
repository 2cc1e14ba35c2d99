//! Input sampling loop.
//!
//! Runs in its own thread in production: polls every input of an
//! [`InputSource`], debounces, publishes the stable level to
//! [`SharedLevels`] and pushes an [`IoEdge`] per accepted transition into
//! the SPSC queue.  A failing read marks the channel as faulted in
//! [`SharedLevels`] until it reads again; the engine reports it as degraded.
//! Tests call [`InputSampler::poll`] directly with a scripted clock.
//!
//! When the queue is full, edges wait in a small local backlog and are
//! retried on the next poll in their original order.  Only when the
//! backlog overflows too is the oldest edge dropped (and counted).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use heapless::Deque;
use log::{debug, info, warn};

use super::debounce::Debouncer;
use crate::adapters::time::MonotonicClock;
use crate::app::ports::InputSource;
use crate::io::queue::{EdgeSender, SharedLevels};
use crate::io::{Channel, IoEdge};

const BACKLOG_CAP: usize = 16;

pub struct InputSampler<S> {
    source: S,
    filters: [Debouncer; Channel::INPUTS.len()],
    sender: EdgeSender,
    levels: SharedLevels,
    backlog: Deque<IoEdge, BACKLOG_CAP>,
    dropped: u32,
}

impl<S: InputSource> InputSampler<S> {
    /// Reads each input once to seed the filters, so a lever already held at
    /// startup does not produce a spurious edge.
    pub fn new(mut source: S, sender: EdgeSender, levels: SharedLevels, debounce_us: u64) -> Self {
        let filters = Channel::INPUTS.map(|channel| {
            let initial = source.sample(channel).unwrap_or(false);
            levels.set(channel, initial);
            Debouncer::new(initial, debounce_us)
        });
        Self {
            source,
            filters,
            sender,
            levels,
            backlog: Deque::new(),
            dropped: 0,
        }
    }

    /// Sample every input once.  Returns the number of edges accepted.
    pub fn poll(&mut self, now_us: u64) -> usize {
        let mut accepted = 0;
        for (i, channel) in Channel::INPUTS.into_iter().enumerate() {
            let raw = match self.source.sample(channel) {
                Ok(raw) => {
                    if self.levels.set_fault(channel, false) {
                        info!("sampler: {} readable again", channel.name());
                    }
                    raw
                }
                Err(e) => {
                    if !self.levels.set_fault(channel, true) {
                        warn!("sampler: {} read failed: {}", channel.name(), e);
                    }
                    continue;
                }
            };
            if let Some(at_us) = self.filters[i].sample(raw, now_us) {
                let active = self.filters[i].level();
                self.levels.set(channel, active);
                self.enqueue(IoEdge {
                    channel,
                    active,
                    at_us,
                });
                accepted += 1;
            }
        }
        self.flush();
        accepted
    }

    /// Poll at `interval` until `shutdown` is set.
    pub fn run(mut self, clock: MonotonicClock, interval: Duration, shutdown: &AtomicBool) {
        debug!("sampler: running every {:?}", interval);
        while !shutdown.load(Ordering::Acquire) {
            self.poll(clock.uptime_us());
            std::thread::sleep(interval);
        }
        debug!("sampler: stopped ({} edges dropped)", self.dropped);
    }

    /// Edges lost to a full queue and backlog.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // ── Internal ──────────────────────────────────────────────

    fn enqueue(&mut self, edge: IoEdge) {
        if self.backlog.is_full() {
            self.backlog.pop_front();
            self.dropped += 1;
            warn!("sampler: backlog full, dropped oldest edge");
        }
        // Cannot fail: a slot was freed above if needed.
        let _ = self.backlog.push_back(edge);
    }

    fn flush(&mut self) {
        while let Some(edge) = self.backlog.front().copied() {
            if self.sender.try_send(edge).is_err() {
                break;
            }
            self.backlog.pop_front();
        }
    }
}
