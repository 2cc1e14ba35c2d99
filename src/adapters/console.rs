//! Line-oriented stdin front-end.
//!
//! Translates operator lines into [`Command`]s for the engine, simulated
//! key holds, or a status dump.  Runs on its own thread; it only talks to
//! the engine through the command queue and the status board.
//!
//! ```text
//! start <animal> [timeline.json]   upload <timeline.json>
//! stop                             test <channel> <ms>
//! listen <channel> <ms>            down <key> / up <key>
//! status                           quit
//! ```

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde::Serialize;

use super::console_log::{self, ConsoleLine};
use super::simulated::{Key, SimKeys};
use crate::app::commands::Command;
use crate::app::events::StatusSnapshot;
use crate::channels::{CommandSender, StatusBoard};
use crate::io::Channel;
use crate::timeline::Timeline;

#[derive(Debug, Clone)]
pub enum ConsoleAction {
    Send(Command),
    KeyDown(Key),
    KeyUp(Key),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownVerb(String),
    Usage(&'static str),
    UnknownChannel(String),
    UnknownKey(String),
    BadNumber(String),
    Timeline(String),
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty line"),
            Self::UnknownVerb(v) => write!(f, "unknown command '{}'", v),
            Self::Usage(usage) => write!(f, "usage: {}", usage),
            Self::UnknownChannel(c) => write!(f, "unknown channel '{}'", c),
            Self::UnknownKey(k) => write!(f, "unknown key '{}' (1, 2, 3 or space)", k),
            Self::BadNumber(n) => write!(f, "'{}' is not a number", n),
            Self::Timeline(msg) => write!(f, "timeline: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Read and validate a timeline file.
pub fn load_timeline(path: &Path) -> Result<Timeline, ParseError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ParseError::Timeline(format!("{}: {}", path.display(), e)))?;
    Timeline::from_json(&raw).map_err(|e| ParseError::Timeline(e.to_string()))
}

pub fn parse_line(line: &str) -> Result<ConsoleAction, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(ParseError::Empty);
    };
    let args: Vec<&str> = words.collect();

    let action = match (verb, args.as_slice()) {
        ("start", [animal]) => ConsoleAction::Send(Command::StartExperiment {
            animal_id: (*animal).to_string(),
            timeline: None,
        }),
        ("start", [animal, path]) => ConsoleAction::Send(Command::StartExperiment {
            animal_id: (*animal).to_string(),
            timeline: Some(load_timeline(Path::new(path))?),
        }),
        ("start", _) => return Err(ParseError::Usage("start <animal> [timeline.json]")),
        ("stop", []) => ConsoleAction::Send(Command::StopExperiment),
        ("upload", [path]) => ConsoleAction::Send(Command::UploadTimeline(load_timeline(Path::new(path))?)),
        ("upload", _) => return Err(ParseError::Usage("upload <timeline.json>")),
        ("test", [channel, ms]) => ConsoleAction::Send(Command::TestOutput {
            channel: channel_arg(channel)?,
            duration_ms: number_arg(ms)?,
        }),
        ("test", _) => return Err(ParseError::Usage("test <channel> <ms>")),
        ("listen", [channel, ms]) => ConsoleAction::Send(Command::TestInput {
            channel: channel_arg(channel)?,
            timeout_ms: number_arg(ms)?,
        }),
        ("listen", _) => return Err(ParseError::Usage("listen <channel> <ms>")),
        ("down", [key]) => ConsoleAction::KeyDown(key_arg(key)?),
        ("up", [key]) => ConsoleAction::KeyUp(key_arg(key)?),
        ("down" | "up", _) => return Err(ParseError::Usage("down|up <1|2|3|space>")),
        ("status", []) => ConsoleAction::Status,
        ("quit" | "exit", []) => ConsoleAction::Quit,
        (other, _) => return Err(ParseError::UnknownVerb(other.to_string())),
    };
    Ok(action)
}

fn channel_arg(raw: &str) -> Result<Channel, ParseError> {
    Channel::from_name(raw).ok_or_else(|| ParseError::UnknownChannel(raw.to_string()))
}

fn number_arg(raw: &str) -> Result<u64, ParseError> {
    raw.parse().map_err(|_| ParseError::BadNumber(raw.to_string()))
}

fn key_arg(raw: &str) -> Result<Key, ParseError> {
    Key::parse(raw).ok_or_else(|| ParseError::UnknownKey(raw.to_string()))
}

#[derive(Serialize)]
struct StatusReport<'a> {
    status: &'a StatusSnapshot,
    console: Vec<&'a str>,
}

/// Status document printed by `status`: the last snapshot plus console
/// lines captured since the previous dump.
pub fn status_report(snapshot: &StatusSnapshot, lines: &[ConsoleLine]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&StatusReport {
        status: snapshot,
        console: lines.iter().map(|l| l.as_str()).collect(),
    })
}

/// Everything the reader thread needs.
pub struct Console {
    pub commands: CommandSender,
    pub status: StatusBoard,
    /// `None` on hardware; key holds are then rejected.
    pub keys: Option<SimKeys>,
}

impl Console {
    /// Read lines until EOF, `quit`, or `shutdown`.  Sets `shutdown` on
    /// exit so the tick loop stops too.
    pub fn run(&self, input: impl BufRead, mut out: impl Write, shutdown: &AtomicBool) {
        for line in input.lines() {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("console: read failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(ConsoleAction::Quit) => break,
                Ok(action) => self.apply(action, &mut out),
                Err(e) => {
                    let _ = writeln!(out, "error: {}", e);
                }
            }
        }
        info!("console: closing");
        shutdown.store(true, Ordering::Release);
    }

    fn apply(&self, action: ConsoleAction, out: &mut impl Write) {
        match action {
            ConsoleAction::Send(command) => {
                if let Err(command) = self.commands.send(command) {
                    let _ = writeln!(out, "error: engine busy, '{}' dropped", command.name());
                }
            }
            ConsoleAction::KeyDown(key) | ConsoleAction::KeyUp(key) if self.keys.is_none() => {
                let _ = writeln!(out, "error: key {:?} ignored, inputs are not simulated", key);
            }
            ConsoleAction::KeyDown(key) => {
                if let Some(keys) = &self.keys {
                    keys.press(key);
                }
            }
            ConsoleAction::KeyUp(key) => {
                if let Some(keys) = &self.keys {
                    keys.release(key);
                }
            }
            ConsoleAction::Status => {
                let lines = console_log::drain_lines();
                match status_report(&self.status.snapshot(), &lines) {
                    Ok(doc) => {
                        let _ = writeln!(out, "{}", doc);
                    }
                    Err(e) => warn!("console: status not serialisable: {}", e),
                }
            }
            ConsoleAction::Quit => {}
        }
    }
}
