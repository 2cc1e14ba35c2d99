//! Shared mutable context threaded through every trial state handler.
//!
//! `TrialContext` is the blackboard for one trial: the pre-drawn timing
//! plan, the input edges delivered this tick, the output commands the
//! handlers request, and the growing event log that is sealed into a
//! [`TrialRecord`] when the trial reaches `Outcome`.

use heapless::Vec as FixedVec;
use log::warn;
use rand::Rng;

use crate::clock::Timebase;
use crate::config::ExperimentConfig;
use crate::io::{Channel, IoEdge};
use crate::protocol::Protocol;
use crate::session::model::{Event, EventKind, Outcome, TrialRecord};
use crate::timeline::TrialKind;

/// Edges one tick can deliver to the state machine.
///
/// Every edge is logged, but past this many in one tick the rest are not
/// considered for transitions: a qualifying press or a release arriving as
/// the 17th edge of a tick cannot end `Cue`, `Hold` or `Response`.  Three
/// inputs debounced at 5 ms give at most six edges per 10 ms tick; more
/// only pile up when the tick loop stalls and a backlog drains at once.
pub const MAX_EDGES_PER_TICK: usize = 16;

// ---------------------------------------------------------------------------
// Timing plan (drawn once, before the trial starts)
// ---------------------------------------------------------------------------

/// Every duration the trial will use, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPlan {
    pub iti_us: u64,
    pub cue_window_us: u64,
    pub hold_us: u64,
    pub response_limit_us: u64,
    pub valve_open_us: u64,
    pub punish_us: u64,
}

impl TrialPlan {
    /// Draws in a fixed order (ITI, cue, hold) so a seeded generator gives
    /// the same plan sequence on every run.  `interval_ms` replaces the
    /// ITI draw for interval trials but still consumes the same draws.
    pub fn draw(config: &ExperimentConfig, interval_ms: Option<u64>, rng: &mut impl Rng) -> Self {
        let iti = rng.random_range(config.iti_minimum..=config.iti_maximum);
        let cue = rng.random_range(config.cue_minimum..=config.cue_maximum);
        let hold = rng.random_range(config.hold_minimum..=config.hold_maximum);
        Self {
            iti_us: ms(interval_ms.unwrap_or(iti)),
            cue_window_us: ms(cue),
            hold_us: ms(hold),
            response_limit_us: ms(config.response_limit),
            valve_open_us: ms(config.valve_open),
            punish_us: ms(config.punish_time),
        }
    }
}

fn ms(v: u64) -> u64 {
    v.saturating_mul(1000)
}

// ---------------------------------------------------------------------------
// Output commands (written by handlers; applied by the engine)
// ---------------------------------------------------------------------------

/// Logical outputs; the engine maps `cue` onto the protocol's cue lights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCommands {
    pub cue: bool,
    pub reward: bool,
    pub punish: bool,
}

impl OutputCommands {
    pub fn all_off() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// TrialContext
// ---------------------------------------------------------------------------

pub struct TrialContext {
    // -- Timing --
    /// Monotonic time of the current tick.
    pub now_us: u64,
    /// When the current state was entered.  While `on_exit` and `on_enter`
    /// run this is already the instant of the transition.
    pub entered_us: u64,
    /// Logical instant of the transition a handler is requesting (a window
    /// deadline or the edge that satisfied it).  Defaults to `now_us`.
    pub transition_at: Option<u64>,
    pub plan: TrialPlan,

    // -- Definition --
    pub trial_id: String,
    pub kind: TrialKind,
    pub protocol: Option<Protocol>,

    // -- Inputs this tick --
    pub edges: FixedVec<IoEdge, MAX_EDGES_PER_TICK>,

    // -- Outputs --
    pub commands: OutputCommands,

    // -- Progress --
    /// Channel that qualified in `Cue`, and when.
    pub trigger: Option<(Channel, u64)>,
    /// End of the hold requirement; also the start of the response window.
    pub hold_end_us: u64,
    pub outcome: Option<Outcome>,
    /// `trial_start` has been logged.
    pub started: bool,

    // -- External control --
    pub abort_requested: bool,
    /// Output failure reported by the engine; seals the trial as `error`.
    pub fault: Option<String>,

    timebase: Timebase,
    start_us: u64,
    events: Vec<(EventKind, u64)>,
    last_event_us: u64,
    sealed: Option<TrialRecord>,
}

impl TrialContext {
    pub fn new(
        trial_id: String,
        kind: TrialKind,
        plan: TrialPlan,
        timebase: Timebase,
        now_us: u64,
    ) -> Self {
        Self {
            now_us,
            entered_us: now_us,
            transition_at: None,
            plan,
            trial_id,
            kind,
            protocol: kind.protocol(),
            edges: FixedVec::new(),
            commands: OutputCommands::all_off(),
            trigger: None,
            hold_end_us: 0,
            outcome: None,
            started: false,
            abort_requested: false,
            fault: None,
            timebase,
            start_us: now_us,
            events: Vec::new(),
            last_event_us: now_us,
            sealed: None,
        }
    }

    /// Request the next transition be stamped at `at_us` rather than at the
    /// tick that noticed it.
    pub fn stamp_transition(&mut self, at_us: u64) {
        self.transition_at = Some(at_us);
    }

    /// End of the inter-trial wait: log `trial_start`.
    pub fn mark_started(&mut self, at_us: u64) {
        self.log_event(EventKind::TrialStart, at_us);
        self.started = true;
    }

    /// Log a raw input edge and queue it for this tick's transition checks.
    pub fn offer_edge(&mut self, edge: IoEdge) {
        if let Some(kind) = EventKind::for_input(edge.channel, edge.active) {
            self.log_event(kind, edge.at_us);
        }
        if self.edges.push(edge).is_err() {
            warn!(
                "trial {}: more than {} edges in one tick, {} ignored for transitions",
                self.trial_id,
                MAX_EDGES_PER_TICK,
                edge.channel.name()
            );
        }
    }

    /// Append an event.  Timestamps never go backwards within a trial: a
    /// late-delivered edge is clamped to the latest logged instant.
    pub fn log_event(&mut self, kind: EventKind, at_us: u64) {
        let at_us = at_us.max(self.last_event_us);
        self.last_event_us = at_us;
        self.events.push((kind, at_us));
    }

    /// Withdraw the most recent event of `kind`, for a decision reversed by
    /// a late edge.
    pub fn retract_last(&mut self, kind: EventKind) {
        if let Some(pos) = self.events.iter().rposition(|(k, _)| *k == kind) {
            self.events.remove(pos);
        }
    }

    pub fn event_count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Highest-priority edge among `channels` at level `active` with a
    /// timestamp in `[from_us, until_us)`.
    pub fn winning_edge(
        &self,
        channels: &[Channel],
        active: bool,
        from_us: u64,
        until_us: u64,
    ) -> Option<IoEdge> {
        self.edges
            .iter()
            .filter(|e| e.active == active && channels.contains(&e.channel))
            .filter(|e| e.at_us >= from_us && e.at_us < until_us)
            .min_by_key(|e| (e.channel.priority(), e.at_us))
            .copied()
    }

    /// Freeze the record.  A missing outcome seals as `error`.
    pub fn seal(&mut self) {
        let outcome = self.outcome.unwrap_or_else(|| {
            warn!("trial {}: sealed without an outcome", self.trial_id);
            Outcome::Error
        });
        self.outcome = Some(outcome);
        let events = self
            .events
            .iter()
            .map(|&(kind, at_us)| Event {
                kind,
                timestamp: self.timebase.stamp(at_us),
            })
            .collect();
        self.sealed = Some(TrialRecord {
            trial_id: self.trial_id.clone(),
            trial_type: self.kind,
            trial_start: self.timebase.stamp(self.start_us),
            trial_end: self.timebase.stamp(self.now_us.max(self.last_event_us)),
            trial_outcome: outcome,
            events,
        });
    }

    pub fn take_sealed(&mut self) -> Option<TrialRecord> {
        self.sealed.take()
    }
}
