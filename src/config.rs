//! Configuration parameters
//!
//! [`ExperimentConfig`] holds the timing and reward durations a session runs
//! with; it is snapshotted into the data file and immutable once a session
//! starts.  [`DeviceConfig`] holds everything about the box itself: tick
//! rate, debounce, data directory, seed and the pin map.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::io::Channel;
use crate::pins;

// ---------------------------------------------------------------------------
// Experiment config
// ---------------------------------------------------------------------------

/// Timing and reward durations, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    // --- Inter-trial interval ---
    pub iti_minimum: u64,
    pub iti_maximum: u64,

    // --- Cue window ---
    pub cue_minimum: u64,
    pub cue_maximum: u64,

    // --- Hold requirement ---
    pub hold_minimum: u64,
    pub hold_maximum: u64,

    // --- Response / outcome ---
    /// Deadline for the designated response after a successful hold.
    pub response_limit: u64,
    /// Reward valve open time.
    pub valve_open: u64,
    /// Punish indicator on-time.
    pub punish_time: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            iti_minimum: 100,
            iti_maximum: 1000,
            cue_minimum: 5000,
            cue_maximum: 10_000,
            hold_minimum: 100,
            hold_maximum: 1000,
            response_limit: 1000,
            valve_open: 100,
            punish_time: 1000,
        }
    }
}

impl ExperimentConfig {
    /// Names accepted as per-trial parameter overrides.
    pub const FIELDS: [&'static str; 9] = [
        "iti_minimum",
        "iti_maximum",
        "cue_minimum",
        "cue_maximum",
        "hold_minimum",
        "hold_maximum",
        "response_limit",
        "valve_open",
        "punish_time",
    ];

    /// Check every `*_minimum <= *_maximum` pair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("iti", self.iti_minimum, self.iti_maximum),
            ("cue", self.cue_minimum, self.cue_maximum),
            ("hold", self.hold_minimum, self.hold_maximum),
        ];
        for (field, minimum, maximum) in pairs {
            if minimum > maximum {
                return Err(ConfigError::InvertedRange {
                    field,
                    minimum,
                    maximum,
                });
            }
        }
        Ok(())
    }

    /// Apply a trial's parameter overrides and re-validate the result.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, u64>) -> Result<Self, ConfigError> {
        let mut merged = self.clone();
        for (name, value) in overrides {
            match merged.field_mut(name) {
                Some(slot) => *slot = *value,
                None => return Err(ConfigError::UnknownParameter(name.clone())),
            }
        }
        merged.validate()?;
        Ok(merged)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut u64> {
        Some(match name {
            "iti_minimum" => &mut self.iti_minimum,
            "iti_maximum" => &mut self.iti_maximum,
            "cue_minimum" => &mut self.cue_minimum,
            "cue_maximum" => &mut self.cue_maximum,
            "hold_minimum" => &mut self.hold_minimum,
            "hold_maximum" => &mut self.hold_maximum,
            "response_limit" => &mut self.response_limit,
            "valve_open" => &mut self.valve_open,
            "punish_time" => &mut self.punish_time,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Pin map (hardware boundary)
// ---------------------------------------------------------------------------

/// A debounced digital input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLine {
    pub line: u32,
    /// Pulled-up switches and the IR beam read low when active.
    pub active_low: bool,
}

/// Named channel to GPIO line mapping, injected into the hardware IO variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    /// Offset added to every line (newer kernels number the SoC bank from 512).
    pub gpio_base: u32,
    pub left_lever: InputLine,
    pub right_lever: InputLine,
    pub nose_port: InputLine,
    pub water_valve: u32,
    pub nose_light: u32,
    pub left_lever_light: u32,
    pub right_lever_light: u32,
    pub punish_light: Option<u32>,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            gpio_base: 0,
            left_lever: InputLine {
                line: pins::LEVER_LEFT_GPIO,
                active_low: true,
            },
            right_lever: InputLine {
                line: pins::LEVER_RIGHT_GPIO,
                active_low: true,
            },
            nose_port: InputLine {
                line: pins::NOSE_PORT_IR_GPIO,
                active_low: true,
            },
            water_valve: pins::WATER_VALVE_GPIO,
            nose_light: pins::NOSE_LIGHT_GPIO,
            left_lever_light: pins::LEVER_LEFT_LIGHT_GPIO,
            right_lever_light: pins::LEVER_RIGHT_LIGHT_GPIO,
            punish_light: None,
        }
    }
}

impl PinMap {
    /// Input line for an input channel, with `gpio_base` applied.
    pub fn input(&self, channel: Channel) -> Option<InputLine> {
        let line = match channel {
            Channel::LeftLever => self.left_lever,
            Channel::RightLever => self.right_lever,
            Channel::NosePort => self.nose_port,
            _ => return None,
        };
        Some(InputLine {
            line: line.line + self.gpio_base,
            active_low: line.active_low,
        })
    }

    /// Output line for an output channel, with `gpio_base` applied.
    /// `None` for inputs and for unmapped outputs.
    pub fn output(&self, channel: Channel) -> Option<u32> {
        let line = match channel {
            Channel::WaterValve => self.water_valve,
            Channel::NoseLight => self.nose_light,
            Channel::LeftLeverLight => self.left_lever_light,
            Channel::RightLeverLight => self.right_lever_light,
            Channel::PunishLight => self.punish_light?,
            _ => return None,
        };
        Some(line + self.gpio_base)
    }
}

// ---------------------------------------------------------------------------
// Device config
// ---------------------------------------------------------------------------

/// Per-device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Engine tick interval (milliseconds).
    pub tick_interval_ms: u32,
    /// Input sampling interval (microseconds).
    pub sample_interval_us: u32,
    /// Minimum stable-level duration before a hardware edge is reported.
    pub debounce_ms: u32,
    /// Directory data files and journals are written to.
    pub data_dir: PathBuf,
    /// Fixed seed for window draws; drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Skip hardware probing and run with simulated inputs.
    pub force_simulation: bool,
    /// Consecutive failed journal writes tolerated before the session aborts.
    pub max_persist_retries: u8,
    /// Config used when a timeline carries none.
    pub experiment: ExperimentConfig,
    pub pins: PinMap,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,     // 100 Hz
            sample_interval_us: 1000, // 1 kHz
            debounce_ms: 5,
            data_dir: PathBuf::from("data"),
            seed: None,
            force_simulation: false,
            max_persist_retries: 3,
            experiment: ExperimentConfig::default(),
            pins: PinMap::default(),
        }
    }
}

impl DeviceConfig {
    /// Parse and validate a device config document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.tick_interval_ms > 10 {
            return Err(ConfigError::OutOfRange("tick_interval_ms must be 1..=10"));
        }
        if self.sample_interval_us == 0 {
            return Err(ConfigError::OutOfRange("sample_interval_us must be > 0"));
        }
        self.experiment.validate()
    }

    pub fn debounce_us(&self) -> u64 {
        u64::from(self.debounce_ms) * 1000
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `*_minimum` exceeds its `*_maximum`.
    InvertedRange {
        field: &'static str,
        minimum: u64,
        maximum: u64,
    },
    /// Override key is not a config field.
    UnknownParameter(String),
    /// A device setting is outside its allowed range.
    OutOfRange(&'static str),
    /// Document could not be parsed.
    Parse(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvertedRange {
                field,
                minimum,
                maximum,
            } => write!(f, "{field}_minimum ({minimum}) > {field}_maximum ({maximum})"),
            Self::UnknownParameter(name) => write!(f, "unknown parameter '{}'", name),
            Self::OutOfRange(msg) => write!(f, "out of range: {}", msg),
            Self::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
