//! Experiment session: data model, crash journal and the logger that
//! owns the live session.

pub mod journal;
pub mod logger;
pub mod model;

pub use logger::{SessionLogger, WriteStatus};
pub use model::{Event, EventKind, ExperimentSession, Outcome, SessionMetadata, TrialRecord};
