//! Keyboard-driven IO variant.
//!
//! Inputs are held down from the console with [`SimKeys`]; outputs only
//! record their level and log it.  The variant feeds the same
//! [`InputSampler`] and [`DigitalPort`] as the hardware one, with debounce
//! disabled.
//!
//! | Key         | Channel      |
//! |-------------|--------------|
//! | `1`         | left lever   |
//! | `2`         | right lever  |
//! | `3`, space  | nose port    |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use crate::app::ports::{InputSource, IoError, OutputDriver};
use crate::drivers::sampler::InputSampler;
use crate::io::port::DigitalPort;
use crate::io::queue::{SharedLevels, edge_channel};
use crate::io::{Channel, IoState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    One,
    Two,
    Three,
    Space,
}

impl Key {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1" => Some(Self::One),
            "2" => Some(Self::Two),
            "3" => Some(Self::Three),
            " " | "space" => Some(Self::Space),
            _ => None,
        }
    }

    pub fn channel(self) -> Channel {
        match self {
            Self::One => Channel::LeftLever,
            Self::Two => Channel::RightLever,
            Self::Three | Self::Space => Channel::NosePort,
        }
    }
}

/// Held-key state shared between the console reader and the sampler.
#[derive(Debug, Clone, Default)]
pub struct SimKeys {
    held: Arc<[AtomicBool; Channel::INPUTS.len()]>,
}

impl SimKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, key: Key) {
        self.held[key.channel().index()].store(true, Ordering::Release);
    }

    pub fn release(&self, key: Key) {
        self.held[key.channel().index()].store(false, Ordering::Release);
    }

    pub fn is_held(&self, channel: Channel) -> bool {
        channel.is_input() && self.held[channel.index()].load(Ordering::Acquire)
    }
}

/// [`InputSource`] reading [`SimKeys`].
pub struct KeyboardInputs {
    keys: SimKeys,
}

impl KeyboardInputs {
    pub fn new(keys: SimKeys) -> Self {
        Self { keys }
    }
}

impl InputSource for KeyboardInputs {
    fn sample(&mut self, channel: Channel) -> Result<bool, IoError> {
        Ok(self.keys.is_held(channel))
    }
}

/// [`OutputDriver`] that keeps levels in memory.
#[derive(Debug, Default)]
pub struct SimOutputs {
    levels: IoState,
}

impl SimOutputs {
    pub fn levels(&self) -> IoState {
        self.levels
    }
}

impl OutputDriver for SimOutputs {
    fn drive(&mut self, channel: Channel, level: bool) -> Result<(), IoError> {
        if channel.is_input() {
            return Err(IoError::NotAnOutput(channel));
        }
        if self.levels.get(channel) != level {
            info!("SIM | {} {}", channel.name(), if level { "ON" } else { "off" });
        }
        self.levels.set(channel, level);
        Ok(())
    }
}

/// Everything the binary needs to run on the keyboard.
pub struct SimulatedIo {
    pub port: DigitalPort<SimOutputs>,
    pub sampler: InputSampler<KeyboardInputs>,
    pub keys: SimKeys,
}

pub fn open() -> SimulatedIo {
    let keys = SimKeys::new();
    let levels = SharedLevels::new();
    let (sender, stream) = edge_channel();
    let sampler = InputSampler::new(KeyboardInputs::new(keys.clone()), sender, levels.clone(), 0);
    SimulatedIo {
        port: DigitalPort::new(SimOutputs::default(), levels, stream, true),
        sampler,
        keys,
    }
}
