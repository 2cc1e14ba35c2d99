//! Linux sysfs GPIO backend.
//!
//! Each [`SysfsPin`] exports its line under `/sys/class/gpio`, sets the
//! direction once and keeps the `value` file open.  Reads and writes seek
//! back to the start of that file, so sampling at 1 kHz does not reopen
//! anything.
//!
//! Lines stay exported on drop; the outputs were already driven low by
//! the port when the session ended.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};
use log::debug;

use super::hardware::{BoundInput, HardwareInputs, HardwareIo, HardwareOutputs};
use crate::config::PinMap;
use crate::error::{EngineError, Result};
use crate::io::Channel;

pub const SYSFS_ROOT: &str = "/sys/class/gpio";

/// udev may need a moment to fix permissions on a freshly exported line.
const EXPORT_SETTLE_ATTEMPTS: u32 = 20;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

#[derive(Debug)]
pub struct GpioError {
    pub line: u32,
    pub source: std::io::Error,
}

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "gpio{}: {}", self.line, self.source)
    }
}

impl std::error::Error for GpioError {}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct SysfsPin {
    line: u32,
    value: File,
}

impl SysfsPin {
    /// Export `line` under `root` and set its direction.
    pub fn open(root: &Path, line: u32, direction: Direction) -> core::result::Result<Self, GpioError> {
        let err = |source| GpioError { line, source };
        let dir = root.join(format!("gpio{}", line));
        if !dir.exists() {
            write_attr(&root.join("export"), &line.to_string()).map_err(err)?;
        }

        let mut attempt = 0;
        loop {
            match write_attr(&dir.join("direction"), direction.as_str()) {
                Ok(()) => break,
                Err(e) if attempt + 1 < EXPORT_SETTLE_ATTEMPTS => {
                    debug!("gpio{}: direction not writable yet ({})", line, e);
                    attempt += 1;
                    std::thread::sleep(EXPORT_SETTLE_DELAY);
                }
                Err(e) => return Err(err(e)),
            }
        }

        let value = OpenOptions::new()
            .read(true)
            .write(direction == Direction::Out)
            .open(dir.join("value"))
            .map_err(err)?;
        Ok(Self { line, value })
    }

    fn read_level(&mut self) -> std::io::Result<bool> {
        let mut buf = [0u8; 1];
        self.value.seek(SeekFrom::Start(0))?;
        self.value.read_exact(&mut buf)?;
        Ok(buf[0] == b'1')
    }

    fn write_level(&mut self, high: bool) -> std::io::Result<()> {
        self.value.seek(SeekFrom::Start(0))?;
        self.value.write_all(if high { b"1" } else { b"0" })
    }
}

fn write_attr(path: &Path, value: &str) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(path)?.write_all(value.as_bytes())
}

impl ErrorType for SysfsPin {
    type Error = GpioError;
}

impl InputPin for SysfsPin {
    fn is_high(&mut self) -> core::result::Result<bool, GpioError> {
        let line = self.line;
        self.read_level().map_err(|source| GpioError { line, source })
    }

    fn is_low(&mut self) -> core::result::Result<bool, GpioError> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> core::result::Result<(), GpioError> {
        let line = self.line;
        self.write_level(false).map_err(|source| GpioError { line, source })
    }

    fn set_high(&mut self) -> core::result::Result<(), GpioError> {
        let line = self.line;
        self.write_level(true).map_err(|source| GpioError { line, source })
    }
}

/// Open every mapped line under `root`.  Any failure means the hardware
/// variant is unavailable.
pub fn open(root: impl Into<PathBuf>, pins: &PinMap, debounce_us: u64) -> Result<HardwareIo<SysfsPin, SysfsPin>> {
    let root = root.into();
    if !root.is_dir() {
        return Err(EngineError::HardwareUnavailable(format!(
            "{} not present",
            root.display()
        )));
    }
    let unavailable = |e: GpioError| EngineError::HardwareUnavailable(e.to_string());

    let mut inputs = Vec::with_capacity(Channel::INPUTS.len());
    for channel in Channel::INPUTS {
        let Some(mapped) = pins.input(channel) else {
            return Err(EngineError::HardwareUnavailable(format!(
                "{} has no line",
                channel.name()
            )));
        };
        inputs.push(BoundInput {
            pin: SysfsPin::open(&root, mapped.line, Direction::In).map_err(unavailable)?,
            line: mapped.line,
            active_low: mapped.active_low,
        });
    }
    let mut inputs = inputs.into_iter();
    let (Some(left), Some(right), Some(nose)) = (inputs.next(), inputs.next(), inputs.next()) else {
        return Err(EngineError::HardwareUnavailable("input lines incomplete".into()));
    };

    let mut outputs = HardwareOutputs::new();
    for channel in Channel::OUTPUTS {
        if let Some(line) = pins.output(channel) {
            let pin = SysfsPin::open(&root, line, Direction::Out).map_err(unavailable)?;
            outputs
                .bind(channel, pin, line)
                .map_err(|e| EngineError::HardwareUnavailable(e.to_string()))?;
        }
    }

    Ok(HardwareIo::new(
        HardwareInputs::new(left, right, nose),
        outputs,
        debounce_us,
    ))
}
