//! Host time adapter.
//!
//! Monotonic microseconds for the sampler and the tick loop.  Clones share
//! the same origin, so edges stamped in the sampling thread and deadlines
//! computed in the tick loop are on one timeline.

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Microseconds since the clock was created.
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}
