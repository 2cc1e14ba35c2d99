//! Host console logger.
//!
//! A `log::Log` implementation that writes timestamped lines to stderr and
//! keeps a copy of each line in a bounded channel, so the status interface
//! can forward recent console output.  When the channel is full the
//! oldest unread lines are kept and new copies are dropped; stderr always
//! gets the line.

use core::fmt::Write as _;
use std::io::Write as _;

use chrono::Utc;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String as FixedString;
use log::{LevelFilter, Log, Metadata, Record};

/// Longest captured line; longer lines are truncated in the capture only.
pub const LINE_CAPACITY: usize = 160;
/// Lines held for the status interface.
pub const CAPTURE_DEPTH: usize = 32;

/// Environment variable selecting the level (`error` .. `trace`).
pub const LEVEL_ENV: &str = "BBOX_LOG";

pub type ConsoleLine = FixedString<LINE_CAPACITY>;

static CAPTURE: Channel<CriticalSectionRawMutex, ConsoleLine, CAPTURE_DEPTH> = Channel::new();
static LOGGER: ConsoleLogger = ConsoleLogger;

pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = Utc::now().format("%H:%M:%S%.3f");
        let _ = writeln!(
            std::io::stderr().lock(),
            "{stamp} {:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );

        let mut line = ConsoleLine::new();
        // Overflow leaves the line truncated, which is acceptable here.
        let _ = write!(line, "{} {}", record.level(), record.args());
        let _ = CAPTURE.try_send(line);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse a level name; unknown names fall back to `info`.
pub fn parse_level(raw: Option<&str>) -> LevelFilter {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some("off") => LevelFilter::Off,
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the logger with the level from [`LEVEL_ENV`].
pub fn init() -> Result<(), log::SetLoggerError> {
    let level = parse_level(std::env::var(LEVEL_ENV).ok().as_deref());
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Take every captured line, oldest first.
pub fn drain_lines() -> Vec<ConsoleLine> {
    let mut lines = Vec::new();
    while let Ok(line) = CAPTURE.try_receive() {
        lines.push(line);
    }
    lines
}
