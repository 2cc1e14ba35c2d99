//! Hardware adapter: bridges physical GPIO lines to the IO port traits.
//!
//! Generic over `embedded-hal` digital pins, so any backend (the sysfs
//! one in [`gpio`](super::gpio), a board HAL, a test double) plugs in.
//! This is the only module in the system that touches actual pins.
//!
//! Polarity is applied here: the rest of the engine only sees "active".

use embedded_hal::digital::{InputPin, OutputPin};
use log::info;

use crate::app::ports::{InputSource, IoError, OutputDriver};
use crate::drivers::sampler::InputSampler;
use crate::io::Channel;
use crate::io::port::DigitalPort;
use crate::io::queue::{SharedLevels, edge_channel};

/// One input channel's pin with its line number and polarity.
pub struct BoundInput<I> {
    pub pin: I,
    pub line: u32,
    pub active_low: bool,
}

/// The three input pins, indexed like [`Channel::INPUTS`].
pub struct HardwareInputs<I> {
    pins: [BoundInput<I>; Channel::INPUTS.len()],
}

impl<I: InputPin> HardwareInputs<I> {
    pub fn new(left_lever: BoundInput<I>, right_lever: BoundInput<I>, nose_port: BoundInput<I>) -> Self {
        Self {
            pins: [left_lever, right_lever, nose_port],
        }
    }
}

impl<I: InputPin> InputSource for HardwareInputs<I> {
    fn sample(&mut self, channel: Channel) -> Result<bool, IoError> {
        if !channel.is_input() {
            return Err(IoError::Unavailable(format!("{} is not an input", channel.name())));
        }
        let bound = &mut self.pins[channel.index()];
        let high = bound.pin.is_high().map_err(|e| IoError::Gpio {
            line: bound.line,
            detail: format!("{:?}", e),
        })?;
        Ok(high != bound.active_low)
    }
}

/// Output pins, indexed by position in [`Channel::OUTPUTS`].  An unmapped
/// output (no punish light fitted, say) accepts writes and does nothing.
pub struct HardwareOutputs<O> {
    pins: [Option<(O, u32)>; Channel::OUTPUTS.len()],
}

impl<O: OutputPin> HardwareOutputs<O> {
    pub fn new() -> Self {
        Self {
            pins: core::array::from_fn(|_| None),
        }
    }

    /// Attach the pin for `channel`.  Inputs are rejected.
    pub fn bind(&mut self, channel: Channel, pin: O, line: u32) -> Result<(), IoError> {
        let slot = output_slot(channel).ok_or(IoError::NotAnOutput(channel))?;
        self.pins[slot] = Some((pin, line));
        Ok(())
    }

    pub fn is_bound(&self, channel: Channel) -> bool {
        output_slot(channel).is_some_and(|slot| self.pins[slot].is_some())
    }
}

impl<O: OutputPin> Default for HardwareOutputs<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: OutputPin> OutputDriver for HardwareOutputs<O> {
    fn drive(&mut self, channel: Channel, level: bool) -> Result<(), IoError> {
        let slot = output_slot(channel).ok_or(IoError::NotAnOutput(channel))?;
        let Some((pin, line)) = self.pins[slot].as_mut() else {
            return Ok(());
        };
        let result = if level { pin.set_high() } else { pin.set_low() };
        result.map_err(|e| IoError::Gpio {
            line: *line,
            detail: format!("{:?}", e),
        })
    }
}

fn output_slot(channel: Channel) -> Option<usize> {
    Channel::OUTPUTS.iter().position(|&c| c == channel)
}

/// The hardware variant, ready to hand to the engine and the sampler thread.
pub struct HardwareIo<I, O> {
    pub port: DigitalPort<HardwareOutputs<O>>,
    pub sampler: InputSampler<HardwareInputs<I>>,
}

impl<I: InputPin, O: OutputPin> HardwareIo<I, O> {
    /// Wire pins into a port.  Every output is driven low first.
    pub fn new(inputs: HardwareInputs<I>, outputs: HardwareOutputs<O>, debounce_us: u64) -> Self {
        let levels = SharedLevels::new();
        let (sender, stream) = edge_channel();
        let sampler = InputSampler::new(inputs, sender, levels.clone(), debounce_us);
        let mut port = DigitalPort::new(outputs, levels, stream, false);
        port.all_off();
        info!("Hardware IO ready (debounce {} us)", debounce_us);
        Self { port, sampler }
    }
}
