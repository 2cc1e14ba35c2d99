//! Port traits: the boundary between the engine and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Engine (domain)
//! ```
//!
//! IO variants, event sinks and session storage implement these traits.
//! The [`Engine`](super::service::Engine) consumes them via generics, so
//! the trial logic never touches GPIO or the filesystem directly.

use std::path::PathBuf;

use crate::io::queue::EdgeStream;
use crate::io::{Channel, IoState};

// ───────────────────────────────────────────────────────────────
// IO port (engine ↔ levers, beam, LEDs, valve)
// ───────────────────────────────────────────────────────────────

/// Engine-facing IO contract shared by the hardware and simulated variants.
pub trait IoPort {
    /// Current level of a channel: last debounced sample for inputs, last
    /// successful write for outputs.
    fn read(&self, channel: Channel) -> bool;

    /// Drive an output.  Inputs are rejected with [`IoError::NotAnOutput`].
    fn write(&mut self, channel: Channel, level: bool) -> Result<(), IoError>;

    /// Take the input edge stream.  Succeeds once per port.
    fn subscribe(&mut self) -> Result<EdgeStream, IoError>;

    /// Copy of every channel's level.
    fn snapshot(&self) -> IoState;

    /// `true` when inputs come from the keyboard simulation.
    fn is_simulated(&self) -> bool;

    /// An input whose last read attempt failed, if any.
    fn input_fault(&self) -> Option<Channel> {
        None
    }
}

impl<P: IoPort + ?Sized> IoPort for Box<P> {
    fn read(&self, channel: Channel) -> bool {
        (**self).read(channel)
    }
    fn write(&mut self, channel: Channel, level: bool) -> Result<(), IoError> {
        (**self).write(channel, level)
    }
    fn subscribe(&mut self) -> Result<EdgeStream, IoError> {
        (**self).subscribe()
    }
    fn snapshot(&self) -> IoState {
        (**self).snapshot()
    }
    fn is_simulated(&self) -> bool {
        (**self).is_simulated()
    }
    fn input_fault(&self) -> Option<Channel> {
        (**self).input_fault()
    }
}

/// Raw level source polled by the sampler (physical pins or keyboard state).
pub trait InputSource {
    /// Raw, un-debounced level with polarity already applied.
    fn sample(&mut self, channel: Channel) -> Result<bool, IoError>;
}

/// Physical side of the output channels.
pub trait OutputDriver {
    fn drive(&mut self, channel: Channel, level: bool) -> Result<(), IoError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink (engine → logging / status)
// ───────────────────────────────────────────────────────────────

/// The engine emits structured [`EngineEvent`](super::events::EngineEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::EngineEvent);
}

// ───────────────────────────────────────────────────────────────
// Session storage (engine ↔ journal + data file)
// ───────────────────────────────────────────────────────────────

/// Durable storage for one session at a time, addressed by file stem
/// (`{animal_id}_{date}_{time}`).
///
/// - `append_journal` must only ever append; a torn final frame is
///   tolerated by recovery.
/// - `write_canonical` must be atomic: readers see either no file or the
///   complete document.
pub trait SessionStore {
    fn append_journal(&mut self, stem: &str, frame: &[u8]) -> Result<(), StorageError>;

    /// Returns the final path of the data file.
    fn write_canonical(&mut self, stem: &str, document: &[u8]) -> Result<PathBuf, StorageError>;

    /// Succeeds when the journal is already gone.
    fn remove_journal(&mut self, stem: &str) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`IoPort`], [`InputSource`] and [`OutputDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// GPIO subsystem or a required line is missing.
    Unavailable(String),
    /// A line read or write failed after initialisation.
    Gpio { line: u32, detail: String },
    /// Write attempted on an input channel.
    NotAnOutput(Channel),
    /// The edge stream was already handed out.
    AlreadySubscribed,
}

/// Errors from [`SessionStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Io(String),
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "IO unavailable: {}", msg),
            Self::Gpio { line, detail } => write!(f, "GPIO {}: {}", line, detail),
            Self::NotAnOutput(channel) => write!(f, "{} is not an output", channel.name()),
            Self::AlreadySubscribed => write!(f, "edge stream already subscribed"),
        }
    }
}

impl std::error::Error for IoError {}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e.to_string())
        }
    }
}
