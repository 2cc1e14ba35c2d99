//! Shared rig: an engine over [`MockIo`] and a temp-dir [`FsStore`],
//! driven on a scripted 10 ms tick clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use bbox::adapters::fs_store::FsStore;
use bbox::app::commands::Command;
use bbox::app::ports::IoPort;
use bbox::app::service::Engine;
use bbox::clock::Timebase;
use bbox::config::{DeviceConfig, ExperimentConfig};
use bbox::error::Result;
use bbox::io::Channel;
use bbox::session::ExperimentSession;
use bbox::timeline::{Timeline, TrialDefinition, TrialKind};

use crate::mock_io::{MockIo, RecordingSink};

pub const MS: u64 = 1_000;
pub const TICK_MS: u64 = 10;

/// Fixed windows: ITI 100, cue 200, hold 50, response 500, valve 100,
/// punish 200 (ms).
pub fn fixed_config() -> ExperimentConfig {
    ExperimentConfig {
        iti_minimum: 100,
        iti_maximum: 100,
        cue_minimum: 200,
        cue_maximum: 200,
        hold_minimum: 50,
        hold_maximum: 50,
        response_limit: 500,
        valve_open: 100,
        punish_time: 200,
    }
}

pub fn timeline(kinds: &[TrialKind]) -> Timeline {
    let trials = kinds
        .iter()
        .enumerate()
        .map(|(i, &kind)| TrialDefinition::new(kind, format!("t{i}")))
        .collect();
    let mut tl = Timeline::new("integration", trials);
    tl.config = Some(fixed_config());
    tl
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

/// Wall-clock instant `ms` after the rig's monotonic zero.
pub fn at(ms: u64) -> DateTime<Utc> {
    epoch() + Duration::milliseconds(ms as i64)
}

pub struct Rig {
    pub engine: Engine<FsStore>,
    pub io: MockIo,
    pub sink: RecordingSink,
    /// Monotonic time of the last tick, microseconds.
    pub now: u64,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_device(|_| {})
    }

    pub fn with_device(tweak: impl FnOnce(&mut DeviceConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut device = DeviceConfig {
            seed: Some(7),
            data_dir: dir.path().to_path_buf(),
            ..DeviceConfig::default()
        };
        tweak(&mut device);
        let store = FsStore::open(&device.data_dir).unwrap();
        let mut io = MockIo::new();
        let edges = io.subscribe().unwrap();
        let engine = Engine::new(device, store, edges, true, Timebase::new(epoch(), 0));
        Self {
            engine,
            io,
            sink: RecordingSink::new(),
            now: 0,
            dir,
        }
    }

    /// Apply a command immediately at the current time.
    pub fn command(&mut self, command: Command) -> Result<()> {
        self.engine
            .handle_command(command, self.now, &mut self.io, &mut self.sink)
    }

    pub fn start(&mut self, timeline: Timeline) {
        self.command(Command::StartExperiment {
            animal_id: "M042".into(),
            timeline: Some(timeline),
        })
        .unwrap();
    }

    pub fn tick(&mut self) {
        self.now += TICK_MS * MS;
        self.engine.tick(self.now, &mut self.io, &mut self.sink);
    }

    /// Tick until the clock reads `ms`.
    pub fn run_to(&mut self, ms: u64) {
        while self.now < ms * MS {
            self.tick();
        }
    }

    /// Tick up to just before `ms`, then queue an edge stamped `ms`; the
    /// tick at `ms` delivers it.
    pub fn edge(&mut self, channel: Channel, active: bool, ms: u64) {
        self.run_to(ms.saturating_sub(TICK_MS));
        self.io.inject(channel, active, ms * MS);
    }

    pub fn run_until_idle(&mut self, limit_ms: u64) {
        while self.engine.is_running() && self.now < limit_ms * MS {
            self.tick();
        }
        assert!(!self.engine.is_running(), "session still live at {limit_ms} ms");
    }

    /// Parse the single data file in the data directory.
    pub fn saved_session(&self) -> ExperimentSession {
        let files: Vec<_> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        assert_eq!(files.len(), 1, "expected one data file, found {files:?}");
        ExperimentSession::from_json(&std::fs::read_to_string(&files[0]).unwrap()).unwrap()
    }
}
