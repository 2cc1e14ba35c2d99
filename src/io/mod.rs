//! Named IO channels, level-transition edges and the IO state snapshot.
//!
//! Inputs are sampled in their own context and handed to the tick loop as
//! [`IoEdge`]s through the bounded queue in [`queue`].  [`port::DigitalPort`]
//! is the engine-facing side of both IO variants.

pub mod port;
pub mod queue;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Every digital channel the box exposes.
///
/// Inputs come first, in tie-break priority order: when several inputs
/// qualify in one tick the lowest discriminant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Channel {
    // ── Inputs ────────────────────────────────────────────
    LeftLever = 0,
    RightLever = 1,
    NosePort = 2,

    // ── Outputs ───────────────────────────────────────────
    WaterValve = 3,
    NoseLight = 4,
    LeftLeverLight = 5,
    RightLeverLight = 6,
    PunishLight = 7,
}

impl Channel {
    pub const COUNT: usize = 8;

    /// Inputs in priority order (left before right before nose port).
    pub const INPUTS: [Channel; 3] = [Self::LeftLever, Self::RightLever, Self::NosePort];

    pub const OUTPUTS: [Channel; 5] = [
        Self::WaterValve,
        Self::NoseLight,
        Self::LeftLeverLight,
        Self::RightLeverLight,
        Self::PunishLight,
    ];

    pub const ALL: [Channel; Self::COUNT] = [
        Self::LeftLever,
        Self::RightLever,
        Self::NosePort,
        Self::WaterValve,
        Self::NoseLight,
        Self::LeftLeverLight,
        Self::RightLeverLight,
        Self::PunishLight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_input(self) -> bool {
        (self as u8) < 3
    }

    /// Tie-break rank; lower wins.
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LeftLever => "left_lever",
            Self::RightLever => "right_lever",
            Self::NosePort => "nose_port",
            Self::WaterValve => "water_valve",
            Self::NoseLight => "nose_light",
            Self::LeftLeverLight => "left_lever_light",
            Self::RightLeverLight => "right_lever_light",
            Self::PunishLight => "punish_light",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// One debounced level transition on an input, or an applied output change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoEdge {
    pub channel: Channel,
    /// `true` = lever down / nose in / output energised.
    pub active: bool,
    /// Monotonic time of the transition (microseconds).
    pub at_us: u64,
}

/// Level of every channel at one instant.  Copied out to status readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoState {
    levels: [bool; Channel::COUNT],
}

impl IoState {
    pub fn get(&self, channel: Channel) -> bool {
        self.levels[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, active: bool) {
        self.levels[channel.index()] = active;
    }

    pub fn active_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|c| self.get(*c))
    }
}

impl Serialize for IoState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Channel::COUNT))?;
        for channel in Channel::ALL {
            map.serialize_entry(channel.name(), &self.get(channel))?;
        }
        map.end()
    }
}
