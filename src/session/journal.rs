//! Append-only crash journal.
//!
//! Each entry is one postcard value, COBS-framed so frames are separated by
//! a single `0x00`.  A process killed mid-append leaves at most one torn
//! frame at the tail, which recovery skips.  A failed append that the
//! writer later retried leaves its torn bytes between two sentinels; those
//! are skipped as well.
//!
//! ```text
//! [Begin(metadata)] 00 [Trial(record)] 00 [Trial(record)] 00 ...
//! ```

use log::warn;
use serde::{Deserialize, Serialize};

use super::model::{ExperimentSession, SessionMetadata, TrialRecord};
use crate::error::{EngineError, Result};
use crate::stats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    Begin(SessionMetadata),
    Trial(TrialRecord),
}

impl JournalEntry {
    /// One frame, sentinel included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec_cobs(self)
            .map_err(|e| EngineError::PersistenceFailure(format!("journal encode: {e}")))
    }
}

/// Rebuild a session from journal bytes.
///
/// The first frame must be `Begin`.  Statistics are recomputed and
/// `experiment_end` stays unset, marking the session as never finalised.
pub fn recover(bytes: &[u8]) -> Result<ExperimentSession> {
    let mut frames = bytes.split(|b| *b == 0).peekable();
    let mut session: Option<ExperimentSession> = None;
    let mut index = 0usize;

    while let Some(frame) = frames.next() {
        // The slice after the final sentinel is empty; anything else there
        // is a torn write.
        let is_tail = frames.peek().is_none();
        if frame.is_empty() {
            continue;
        }

        let mut buf = frame.to_vec();
        let entry = match postcard::from_bytes_cobs::<JournalEntry>(&mut buf) {
            Ok(entry) => entry,
            Err(e) if is_tail => {
                warn!("journal: ignoring torn frame {index} ({e})");
                break;
            }
            Err(e) => {
                // Left by a failed append; the writer re-synchronised
                // with a sentinel before the next frame.
                warn!("journal: skipping torn frame {index} ({e})");
                index += 1;
                continue;
            }
        };

        match (entry, session.as_mut()) {
            (JournalEntry::Begin(meta), None) => session = Some(ExperimentSession::new(meta)),
            (JournalEntry::Trial(record), Some(s)) => s.experiment_trials.push(record),
            (JournalEntry::Begin(_), Some(_)) => {
                return Err(EngineError::PersistenceFailure(format!(
                    "journal frame {index}: second session header"
                )));
            }
            (JournalEntry::Trial(_), None) => {
                return Err(EngineError::PersistenceFailure(
                    "journal does not start with a session header".into(),
                ));
            }
        }
        index += 1;
    }

    let mut session = session
        .ok_or_else(|| EngineError::PersistenceFailure("journal is empty".into()))?;
    session.experiment_metadata.experiment_end = None;
    session.experiment_statistics = stats::compute(&session.experiment_trials);
    Ok(session)
}
