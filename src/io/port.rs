//! Engine-facing half of an IO variant.
//!
//! Both the hardware and the simulated variant build a [`DigitalPort`]: it
//! reads input levels published by the sampler, drives outputs through an
//! [`OutputDriver`], and hands out the edge stream exactly once.  Upstream
//! code only sees the [`IoPort`] trait, so the variants are
//! indistinguishable to it apart from [`IoPort::is_simulated`].

use log::debug;

use super::queue::{EdgeStream, SharedLevels};
use super::{Channel, IoState};
use crate::app::ports::{IoError, IoPort, OutputDriver};

pub struct DigitalPort<O> {
    outputs: O,
    levels: SharedLevels,
    written: IoState,
    stream: Option<EdgeStream>,
    simulated: bool,
}

impl<O: OutputDriver> DigitalPort<O> {
    pub fn new(outputs: O, levels: SharedLevels, stream: EdgeStream, simulated: bool) -> Self {
        Self {
            outputs,
            levels,
            written: IoState::default(),
            stream: Some(stream),
            simulated,
        }
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    /// Drive every output low, ignoring individual failures.
    pub fn all_off(&mut self) {
        for channel in Channel::OUTPUTS {
            if let Err(e) = self.write(channel, false) {
                debug!("all_off: {} not cleared: {}", channel.name(), e);
            }
        }
    }
}

impl<O: OutputDriver> IoPort for DigitalPort<O> {
    fn read(&self, channel: Channel) -> bool {
        if channel.is_input() {
            self.levels.get(channel)
        } else {
            self.written.get(channel)
        }
    }

    fn write(&mut self, channel: Channel, level: bool) -> Result<(), IoError> {
        if channel.is_input() {
            return Err(IoError::NotAnOutput(channel));
        }
        self.outputs.drive(channel, level)?;
        self.written.set(channel, level);
        Ok(())
    }

    fn subscribe(&mut self) -> Result<EdgeStream, IoError> {
        self.stream.take().ok_or(IoError::AlreadySubscribed)
    }

    fn snapshot(&self) -> IoState {
        let mut state = self.written;
        for channel in Channel::INPUTS {
            state.set(channel, self.levels.get(channel));
        }
        state
    }

    fn is_simulated(&self) -> bool {
        self.simulated
    }

    fn input_fault(&self) -> Option<Channel> {
        self.levels.faulted()
    }
}
