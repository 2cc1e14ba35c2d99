//! Timelines: the ordered, optionally looping trial sequence of a protocol.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ExperimentConfig;
use crate::error::EngineError;

/// What a trial asks of the animal.  See [`crate::protocol`] for the input
/// and output wiring of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialKind {
    /// Press and hold the left lever, then release it.
    LeftLeverHold,
    /// Press and hold the right lever, then release it.
    RightLeverHold,
    /// Press and hold either lever, then release the same one.
    #[serde(alias = "Stage2")]
    LeverHold,
    /// Poke into the nose port, hold, withdraw.
    #[serde(alias = "Stage1")]
    NosePoke,
    /// Poke and hold, then press either lever.
    #[serde(alias = "Stage3")]
    NosePokeLever,
    /// Timed pause with no cue and no response.
    #[serde(alias = "Interval")]
    Interval,
}

impl TrialKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::LeftLeverHold => "left_lever_hold",
            Self::RightLeverHold => "right_lever_hold",
            Self::LeverHold => "lever_hold",
            Self::NosePoke => "nose_poke",
            Self::NosePokeLever => "nose_poke_lever",
            Self::Interval => "interval",
        }
    }
}

/// Interval trials accept this parameter as their fixed wait (milliseconds).
pub const INTERVAL_DURATION_PARAM: &str = "duration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialDefinition {
    #[serde(rename = "type")]
    pub kind: TrialKind,
    pub id: String,
    /// Per-trial overrides of [`ExperimentConfig`] fields.
    #[serde(default)]
    pub parameters: BTreeMap<String, u64>,
}

impl TrialDefinition {
    pub fn new(kind: TrialKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: u64) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    /// Config this trial runs with, plus the interval override if any.
    pub fn effective_config(
        &self,
        base: &ExperimentConfig,
    ) -> Result<(ExperimentConfig, Option<u64>), EngineError> {
        let mut overrides = self.parameters.clone();
        let interval = overrides.remove(INTERVAL_DURATION_PARAM);
        if interval.is_some() && self.kind != TrialKind::Interval {
            return Err(EngineError::InvalidTimeline(format!(
                "trial '{}': '{}' is only valid on interval trials",
                self.id, INTERVAL_DURATION_PARAM
            )));
        }
        let config = base.with_overrides(&overrides).map_err(|e| {
            EngineError::InvalidTimeline(format!("trial '{}': {}", self.id, e))
        })?;
        Ok((config, interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub trials: Vec<TrialDefinition>,
    #[serde(rename = "loop", default)]
    pub looping: bool,
    /// Config snapshot shipped with the timeline; the device default is
    /// used when absent.
    #[serde(default)]
    pub config: Option<ExperimentConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Timeline {
    pub fn new(name: impl Into<String>, trials: Vec<TrialDefinition>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            trials,
            looping: false,
            config: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw).map_err(|e| EngineError::InvalidTimeline(e.to_string()))
    }

    /// Structural checks: name, non-empty sequence, unique non-empty ids.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidTimeline("name is empty".into()));
        }
        if self.trials.is_empty() {
            return Err(EngineError::InvalidTimeline("timeline has no trials".into()));
        }
        let mut seen = HashSet::new();
        for (i, trial) in self.trials.iter().enumerate() {
            if trial.id.trim().is_empty() {
                return Err(EngineError::InvalidTimeline(format!("trial {i} has no id")));
            }
            if !seen.insert(trial.id.as_str()) {
                return Err(EngineError::InvalidTimeline(format!(
                    "duplicate trial id '{}'",
                    trial.id
                )));
            }
        }
        if let Some(config) = &self.config {
            config.validate()?;
        }
        Ok(())
    }

    /// Structural checks plus every trial's overrides against `base`.
    pub fn validate_against(&self, base: &ExperimentConfig) -> Result<(), EngineError> {
        self.validate()?;
        for trial in &self.trials {
            trial.effective_config(base)?;
        }
        Ok(())
    }
}
