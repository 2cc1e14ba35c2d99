//! Experiment session logger.
//!
//! Lifecycle: `Idle ─begin─▶ Open ─finalize─▶ Finalized`.
//!
//! Every sealed trial is appended to the crash journal straight away.  A
//! failed append is kept in memory and retried once per tick boundary via
//! [`SessionLogger::retry_pending`]; after `max_retries` consecutive
//! failures the caller is told to abort the session.  A store may leave part
//! of a failed frame behind, so the first append after a failure starts with
//! an extra `0x00` sentinel: the torn bytes then form a frame of their own,
//! which recovery skips.  `finalize` writes the
//! canonical JSON document through the store's atomic write and only then
//! drops the journal.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::journal::JournalEntry;
use super::model::{ExperimentSession, SessionMetadata, TrialRecord};
use crate::app::ports::SessionStore;
use crate::error::{EngineError, Result};
use crate::stats::{self, Statistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Open,
    Finalized,
}

/// Whether a recorded trial is already durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Durable,
    /// Journal append failed; queued for retry at the next tick.
    Deferred,
}

pub struct SessionLogger<S: SessionStore> {
    store: S,
    state: Lifecycle,
    session: Option<ExperimentSession>,
    stem: String,
    /// Encoded frames awaiting a successful append, oldest first.
    pending: Vec<Vec<u8>>,
    failures: u32,
    max_retries: u32,
    /// The last append failed and may have left a partial frame.
    resync: bool,
}

impl<S: SessionStore> SessionLogger<S> {
    pub fn new(store: S, max_retries: u32) -> Self {
        Self {
            store,
            state: Lifecycle::Idle,
            session: None,
            stem: String::new(),
            pending: Vec::new(),
            failures: 0,
            max_retries,
            resync: false,
        }
    }

    /// Open a session and write its journal header.  The header must be
    /// durable before any trial runs, so a failure here is returned.
    pub fn begin(&mut self, metadata: SessionMetadata) -> Result<&ExperimentSession> {
        if self.state == Lifecycle::Open {
            return Err(EngineError::SessionAlreadyRunning);
        }
        let stem = metadata.file_stem();
        let mut frame = JournalEntry::Begin(metadata.clone()).encode()?;
        if self.resync {
            frame.insert(0, 0);
        }
        if let Err(e) = self.store.append_journal(&stem, &frame) {
            self.resync = true;
            return Err(e.into());
        }

        info!("session: opened {stem}");
        self.stem = stem;
        self.pending.clear();
        self.failures = 0;
        self.resync = false;
        self.state = Lifecycle::Open;
        Ok(self.session.insert(ExperimentSession::new(metadata)))
    }

    /// Append a sealed trial.  Only valid while the session is open.
    pub fn record(&mut self, record: TrialRecord) -> Result<WriteStatus> {
        if self.state != Lifecycle::Open {
            return Err(EngineError::InvalidState("no open session to record into"));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::InvalidState("no open session to record into"));
        };

        let frame = JournalEntry::Trial(record.clone()).encode()?;
        session.experiment_trials.push(record);
        self.pending.push(frame);
        Ok(self.flush_pending())
    }

    /// Retry deferred appends.  Returns `PersistenceFailure` once the
    /// retry budget is spent; the caller must then abort the session.
    pub fn retry_pending(&mut self) -> Result<WriteStatus> {
        if self.state != Lifecycle::Open || self.pending.is_empty() {
            return Ok(WriteStatus::Durable);
        }
        match self.flush_pending() {
            WriteStatus::Durable => Ok(WriteStatus::Durable),
            WriteStatus::Deferred if self.failures > self.max_retries => {
                error!(
                    "session: journal still failing after {} retries",
                    self.max_retries
                );
                Err(EngineError::PersistenceFailure(format!(
                    "{} trial(s) not durable after {} retries",
                    self.pending.len(),
                    self.max_retries
                )))
            }
            WriteStatus::Deferred => Ok(WriteStatus::Deferred),
        }
    }

    /// Seal the session: compute statistics, stamp the end time and write
    /// the canonical file atomically.  The session is closed afterwards
    /// even if the write fails; the journal then stays on disk.
    pub fn finalize(&mut self, end: DateTime<Utc>) -> Result<PathBuf> {
        if self.state != Lifecycle::Open {
            return Err(EngineError::InvalidState("no open session to finalize"));
        }
        self.state = Lifecycle::Finalized;
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::InvalidState("no open session to finalize"));
        };

        session.experiment_statistics = stats::compute(&session.experiment_trials);
        session.experiment_metadata.experiment_end = Some(end);

        let document = session
            .to_json()
            .map_err(|e| EngineError::PersistenceFailure(format!("encode: {e}")))?;
        let path = self.store.write_canonical(&self.stem, &document)?;
        info!(
            "session: finalized {} ({} trials) -> {}",
            self.stem,
            session.experiment_trials.len(),
            path.display()
        );

        if !self.pending.is_empty() {
            warn!(
                "session: {} journal frame(s) never landed; canonical file has them",
                self.pending.len()
            );
            self.pending.clear();
        }
        if let Err(e) = self.store.remove_journal(&self.stem) {
            warn!("session: journal cleanup failed: {e}");
        }
        Ok(path)
    }

    pub fn is_open(&self) -> bool {
        self.state == Lifecycle::Open
    }

    pub fn session(&self) -> Option<&ExperimentSession> {
        self.session.as_ref()
    }

    /// Statistics over the trials recorded so far.
    pub fn live_stats(&self) -> Statistics {
        self.session
            .as_ref()
            .map(|s| stats::compute(&s.experiment_trials))
            .unwrap_or_default()
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn flush_pending(&mut self) -> WriteStatus {
        while let Some(frame) = self.pending.first() {
            let written = if self.resync {
                let mut sealed = Vec::with_capacity(frame.len() + 1);
                sealed.push(0);
                sealed.extend_from_slice(frame);
                self.store.append_journal(&self.stem, &sealed)
            } else {
                self.store.append_journal(&self.stem, frame)
            };
            match written {
                Ok(()) => {
                    self.pending.remove(0);
                    self.failures = 0;
                    self.resync = false;
                }
                Err(e) => {
                    self.failures += 1;
                    self.resync = true;
                    warn!(
                        "session: journal append failed ({e}), attempt {}",
                        self.failures
                    );
                    return WriteStatus::Deferred;
                }
            }
        }
        debug!("session: journal up to date");
        WriteStatus::Durable
    }
}
