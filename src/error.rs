//! Unified error types for the trial engine.
//!
//! Every fallible engine operation funnels into [`EngineError`], keeping the
//! tick loop's handling uniform.  Subsystem errors ([`IoError`],
//! [`StorageError`], [`ConfigError`]) convert into it via `From`, so `?`
//! works across the port boundary.

use core::fmt;

use crate::app::ports::{IoError, StorageError};
use crate::config::ConfigError;

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Typed failures surfaced by commands, the runner and the session logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// IO hardware could not be initialised; the engine falls back to
    /// simulated inputs.
    HardwareUnavailable(String),
    /// Timeline failed validation at upload or start.
    InvalidTimeline(String),
    /// Experiment config violates its own invariants.
    InvalidConfig(ConfigError),
    /// A session is already live on this device.
    SessionAlreadyRunning,
    /// `start_experiment` without a timeline and none uploaded.
    NoTimelineLoaded,
    /// Operation not valid in the current lifecycle state.
    InvalidState(&'static str),
    /// Channel is unknown or has the wrong direction for the request.
    InvalidChannel(&'static str),
    /// Animal identifier is empty or unusable in a filename.
    InvalidAnimalId(String),
    /// Incremental or final write of session data failed.
    PersistenceFailure(String),
    /// Cooperative stop honoured at a safe boundary.
    AbortRequested,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareUnavailable(msg) => write!(f, "hardware unavailable: {msg}"),
            Self::InvalidTimeline(msg) => write!(f, "invalid timeline: {msg}"),
            Self::InvalidConfig(e) => write!(f, "invalid config: {e}"),
            Self::SessionAlreadyRunning => write!(f, "session already running"),
            Self::NoTimelineLoaded => write!(f, "no timeline loaded"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InvalidChannel(name) => write!(f, "invalid channel: {name}"),
            Self::InvalidAnimalId(id) => write!(f, "invalid animal id: {id:?}"),
            Self::PersistenceFailure(msg) => write!(f, "persistence failure: {msg}"),
            Self::AbortRequested => write!(f, "abort requested"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfig(e)
    }
}

impl From<IoError> for EngineError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::NotAnOutput(channel) => Self::InvalidChannel(channel.name()),
            IoError::AlreadySubscribed => Self::InvalidState("edge stream already taken"),
            other => Self::HardwareUnavailable(other.to_string()),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        Self::PersistenceFailure(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, EngineError>;
