//! Outbound engine events and the published status snapshot.
//!
//! The [`Engine`](super::service::Engine) emits [`EngineEvent`]s through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log lines, a dashboard feed, a test
//! recorder.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::EngineError;
use crate::events::BusEvent;
use crate::fsm::StateId;
use crate::io::{Channel, IoState};
use crate::session::model::Outcome;
use crate::stats::Statistics;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A validated timeline is loaded for the next session.
    TimelineLoaded { name: String, trials: usize },

    SessionStarted {
        animal_id: String,
        seed: u64,
        simulated: bool,
    },

    TrialStarted { index: usize, trial_id: String },

    TrialCompleted {
        index: usize,
        trial_id: String,
        outcome: Outcome,
    },

    /// Canonical data file written.  `cause` is set when the session ended
    /// for a reason other than a stop request or timeline exhaustion.
    SessionFinalized {
        path: PathBuf,
        trials: usize,
        cause: Option<EngineError>,
    },

    /// Session ended but its data file could not be written; the journal
    /// is left in place.
    SessionFailed(EngineError),

    CommandRejected {
        command: &'static str,
        error: EngineError,
    },

    /// An output write failed (the running trial is sealed as `error`) or
    /// the sampler cannot read an input.
    Degraded(String),

    /// The fault behind the last `Degraded` has cleared.
    Recovered,

    /// A sealed trial could not be added to the session.
    TrialNotRecorded { trial_id: String, error: EngineError },

    /// A journal append failed and will be retried.
    PersistenceRetry { pending: usize },

    /// Raw transition from the event bus.
    Io(BusEvent),

    /// Result of a `test_input` or `test_output` command.
    TestFinished { channel: Channel, passed: bool },
}

/// Copy of engine state published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub version: &'static str,
    pub simulated: bool,
    pub running: bool,
    /// An output write or input read is currently failing.
    pub degraded: bool,
    pub io: IoState,
    pub trial_index: Option<usize>,
    pub trial_id: Option<String>,
    pub iteration: u32,
    pub state: Option<StateId>,
    pub statistics: Statistics,
    pub tick: u64,
}
