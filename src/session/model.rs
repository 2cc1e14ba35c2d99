//! Session data model, serialised as the experiment data file.
//!
//! ```json
//! {
//!   "experiment_metadata":   { "animal_id": ..., "experiment_start": ..., ... },
//!   "experiment_trials":     [ { "trial_type": ..., "events": [...] }, ... ],
//!   "experiment_statistics": { "trial_count": ..., ... }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::iso_micros;
use crate::config::ExperimentConfig;
use crate::io::Channel;
use crate::stats::Statistics;
use crate::timeline::{Timeline, TrialKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TrialStart,
    TrialEnd,
    CueOnset,
    CueOffset,
    CueTimeout,
    HoldComplete,
    ResponseTimeout,
    LeftLeverPress,
    LeftLeverRelease,
    RightLeverPress,
    RightLeverRelease,
    NosePortEntry,
    NosePortExit,
    RewardTriggered,
    WaterDeliveryComplete,
    PunishOnset,
    PunishComplete,
}

impl EventKind {
    /// Event logged for a raw input edge.  `None` for output channels.
    pub fn for_input(channel: Channel, active: bool) -> Option<Self> {
        Some(match (channel, active) {
            (Channel::LeftLever, true) => Self::LeftLeverPress,
            (Channel::LeftLever, false) => Self::LeftLeverRelease,
            (Channel::RightLever, true) => Self::RightLeverPress,
            (Channel::RightLever, false) => Self::RightLeverRelease,
            (Channel::NosePort, true) => Self::NosePortEntry,
            (Channel::NosePort, false) => Self::NosePortExit,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoResponse,
    PrematureRelease,
    Error,
    /// Interrupted by `stop()` after the trial had started.
    Aborted,
}

impl Outcome {
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoResponse => "no_response",
            Self::PrematureRelease => "premature_release",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// One executed trial.  Sealed when the trial reaches `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: String,
    pub trial_type: TrialKind,
    #[serde(with = "iso_micros")]
    pub trial_start: DateTime<Utc>,
    #[serde(with = "iso_micros")]
    pub trial_end: DateTime<Utc>,
    pub trial_outcome: Outcome,
    /// Non-decreasing by timestamp.
    pub events: Vec<Event>,
}

impl TrialRecord {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub animal_id: String,
    #[serde(with = "iso_micros")]
    pub experiment_start: DateTime<Utc>,
    #[serde(with = "iso_micros::option")]
    pub experiment_end: Option<DateTime<Utc>>,
    pub config: ExperimentConfig,
    pub experiment_file: Timeline,
    pub simulation_mode: bool,
    pub seed: u64,
    pub device_version: String,
}

impl SessionMetadata {
    /// `{animal_id}_{YYYYmmdd}_{HHMMSS}`, the data file name without extension.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.animal_id,
            self.experiment_start.format("%Y%m%d_%H%M%S")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSession {
    pub experiment_metadata: SessionMetadata,
    pub experiment_trials: Vec<TrialRecord>,
    pub experiment_statistics: Statistics,
}

impl ExperimentSession {
    pub fn new(metadata: SessionMetadata) -> Self {
        Self {
            experiment_metadata: metadata,
            experiment_trials: Vec::new(),
            experiment_statistics: Statistics::default(),
        }
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
