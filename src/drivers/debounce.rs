//! Stable-level debounce filter for mechanical inputs.
//!
//! ## Behaviour
//!
//! A raw level change starts a settling window.  The change is accepted
//! only if the raw level stays put for `min_stable_us`; any bounce back to
//! the stable level inside the window cancels it.  The accepted edge is
//! timestamped at the **start** of the window, which is when the contact
//! actually closed or opened.
//!
//! | Raw trace                      | Reported                 |
//! |--------------------------------|--------------------------|
//! | 0 → 1 held ≥ window            | rising edge @ first 1    |
//! | 0 → 1 → 0 → 1 inside window    | nothing until it settles |
//! | window = 0                     | every change, immediately|

/// Default minimum stable duration for levers and the IR beam.
pub const DEFAULT_DEBOUNCE_US: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Stable,
    Settling { candidate: bool, since_us: u64 },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    stable: bool,
    state: FilterState,
    min_stable_us: u64,
}

impl Debouncer {
    pub fn new(initial: bool, min_stable_us: u64) -> Self {
        Self {
            stable: initial,
            state: FilterState::Stable,
            min_stable_us,
        }
    }

    /// Last accepted level.
    pub fn level(&self) -> bool {
        self.stable
    }

    /// Feed one raw sample taken at `now_us`.
    /// Returns the edge timestamp when a new stable level is accepted.
    pub fn sample(&mut self, raw: bool, now_us: u64) -> Option<u64> {
        match self.state {
            FilterState::Stable => {
                if raw == self.stable {
                    return None;
                }
                if self.min_stable_us == 0 {
                    self.stable = raw;
                    return Some(now_us);
                }
                self.state = FilterState::Settling {
                    candidate: raw,
                    since_us: now_us,
                };
                None
            }

            FilterState::Settling {
                candidate,
                since_us,
            } => {
                if raw != candidate {
                    // Bounced back to the stable level.
                    self.state = FilterState::Stable;
                    return None;
                }
                if now_us.saturating_sub(since_us) >= self.min_stable_us {
                    self.stable = candidate;
                    self.state = FilterState::Stable;
                    return Some(since_us);
                }
                None
            }
        }
    }
}
