//! Channels between the engine tick loop and the communication interface.
//!
//! Uses `embassy-sync` primitives so the same code runs under any
//! `critical-section` implementation.
//!
//! ```text
//! ┌───────────────┐   Command (bounded)    ┌──────────────┐
//! │ Comm. adapter │──────────────────────▶│  Engine tick │
//! │ (own thread)  │◀──────────────────────│  (consumer)  │
//! └───────────────┘   StatusSnapshot copy  └──────────────┘
//! ```
//!
//! Commands never touch engine state from another thread; they are
//! drained at tick boundaries.  Status readers get a clone of the snapshot
//! the engine published after its last tick.

use std::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::app::commands::Command;
use crate::app::events::StatusSnapshot;

/// Commands queued between two ticks.
pub const COMMAND_DEPTH: usize = 8;

type CommandChannel = Channel<CriticalSectionRawMutex, Command, COMMAND_DEPTH>;

// ---------------------------------------------------------------------------
// Command queue
// ---------------------------------------------------------------------------

/// Consumer side, owned by the engine.
pub struct CommandQueue {
    inner: Arc<CommandChannel>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CommandChannel::new()),
        }
    }

    /// Producer handle for another thread.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn try_next(&self) -> Option<Command> {
        self.inner.try_receive().ok()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CommandSender {
    inner: Arc<CommandChannel>,
}

impl CommandSender {
    /// Hands the command back when the queue is full.
    pub fn send(&self, command: Command) -> Result<(), Command> {
        self.inner.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) => command,
        })
    }
}

// ---------------------------------------------------------------------------
// Status board
// ---------------------------------------------------------------------------

/// Last published [`StatusSnapshot`].
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<CriticalSectionRawMutex, RefCell<StatusSnapshot>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RefCell::new(StatusSnapshot::default()))),
        }
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.inner.lock(|cell| *cell.borrow_mut() = snapshot);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock(|cell| cell.borrow().clone())
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
