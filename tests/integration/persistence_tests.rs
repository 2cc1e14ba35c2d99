//! Session persistence: journal while running, canonical file at the end,
//! crash recovery, and the abort path when the journal cannot be written.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bbox::adapters::fs_store::FsStore;
use bbox::app::commands::Command;
use bbox::app::events::EngineEvent;
use bbox::app::ports::{IoPort, SessionStore, StorageError};
use bbox::app::service::Engine;
use bbox::clock::Timebase;
use bbox::config::DeviceConfig;
use bbox::error::EngineError;
use bbox::io::Channel;
use bbox::config::ExperimentConfig;
use bbox::session::journal;
use bbox::session::{
    EventKind, Outcome, SessionLogger, SessionMetadata, TrialRecord, WriteStatus,
};
use bbox::timeline::TrialKind;

use crate::harness::{MS, Rig, at, epoch, timeline};
use crate::mock_io::{MockIo, RecordingSink};

fn journal_files(rig: &Rig) -> Vec<PathBuf> {
    std::fs::read_dir(rig.dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "journal"))
        .collect()
}

#[test]
fn journal_grows_per_trial_and_is_removed_on_finalize() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke, TrialKind::NosePoke]));

    let journals = journal_files(&rig);
    assert_eq!(journals.len(), 1, "header written at start");
    let header_only = journal::recover(&std::fs::read(&journals[0]).unwrap()).unwrap();
    assert!(header_only.experiment_trials.is_empty());
    assert_eq!(header_only.experiment_metadata.animal_id, "M042");

    // First trial times out at 300 ms.
    rig.run_to(310);
    let partial = journal::recover(&std::fs::read(&journals[0]).unwrap()).unwrap();
    assert_eq!(partial.experiment_trials.len(), 1);
    assert_eq!(partial.experiment_statistics.no_responses, 1);
    assert!(partial.experiment_metadata.experiment_end.is_none());

    rig.run_until_idle(2_000);
    assert!(journal_files(&rig).is_empty());
    assert_eq!(rig.saved_session().experiment_trials.len(), 2);
}

#[test]
fn data_file_has_the_documented_shape() {
    let mut rig = Rig::new();
    let tl = timeline(&[TrialKind::NosePoke]);
    rig.start(tl.clone());
    rig.edge(Channel::NosePort, true, 150);
    rig.edge(Channel::NosePort, false, 210);
    rig.run_until_idle(1_000);

    let path = rig.dir.path().join("M042_20261019_120000.json");
    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();

    let meta = &doc["experiment_metadata"];
    assert_eq!(meta["animal_id"], "M042");
    assert_eq!(meta["experiment_start"], "2026-10-19T12:00:00.000000Z");
    assert_eq!(meta["seed"], 7);
    assert_eq!(meta["simulation_mode"], true);
    assert_eq!(meta["config"]["valve_open"], 100);
    assert_eq!(meta["experiment_file"]["name"], "integration");

    let trial = &doc["experiment_trials"][0];
    assert_eq!(trial["trial_type"], "nose_poke");
    assert_eq!(trial["trial_outcome"], "success");
    assert_eq!(trial["events"][0]["type"], "trial_start");
    assert_eq!(trial["events"][0]["timestamp"], "2026-10-19T12:00:00.100000Z");

    let stats = &doc["experiment_statistics"];
    assert_eq!(stats["trial_count"], 1);
    assert_eq!(stats["water_deliveries"], 1);

    let parsed = rig.saved_session();
    assert_eq!(parsed.experiment_metadata.experiment_file, tl);
    assert_eq!(parsed.experiment_trials[0].count(EventKind::NosePortEntry), 1);
}

#[test]
fn crashed_session_is_recoverable_from_its_journal() {
    let mut rig = Rig::new();
    let mut tl = timeline(&[TrialKind::Interval]);
    tl.looping = true;
    rig.start(tl);
    rig.run_to(350);

    // Simulate a crash: the engine never finalizes.
    let path = journal_files(&rig).remove(0);
    drop(rig.engine);

    let mut bytes = std::fs::read(&path).unwrap();
    let recovered = journal::recover(&bytes).unwrap();
    assert_eq!(recovered.experiment_trials.len(), 3);
    assert_eq!(recovered.experiment_statistics.successes, 3);

    // A torn final append loses only that frame.
    let last_frame_start = bytes[..bytes.len() - 1]
        .iter()
        .rposition(|&b| b == 0)
        .unwrap()
        + 1;
    bytes.truncate(last_frame_start + (bytes.len() - last_frame_start) / 2);
    let torn = journal::recover(&bytes).unwrap();
    assert_eq!(torn.experiment_trials.len(), 2);
    assert!(torn.experiment_metadata.experiment_end.is_none());
}

// ── Journal failures ──────────────────────────────────────────

/// `FsStore` whose journal appends can be switched off.
struct FlakyStore {
    inner: FsStore,
    failing: Arc<AtomicBool>,
}

impl SessionStore for FlakyStore {
    fn append_journal(&mut self, stem: &str, frame: &[u8]) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StorageError::Io("no space left on device".into()));
        }
        self.inner.append_journal(stem, frame)
    }

    fn write_canonical(&mut self, stem: &str, document: &[u8]) -> Result<PathBuf, StorageError> {
        self.inner.write_canonical(stem, document)
    }

    fn remove_journal(&mut self, stem: &str) -> Result<(), StorageError> {
        self.inner.remove_journal(stem)
    }
}

#[test]
fn persistent_journal_failure_aborts_but_still_saves() {
    let dir = tempfile::tempdir().unwrap();
    let failing = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: FsStore::open(dir.path()).unwrap(),
        failing: Arc::clone(&failing),
    };
    let device = DeviceConfig {
        seed: Some(1),
        max_persist_retries: 2,
        ..DeviceConfig::default()
    };
    let mut io = MockIo::new();
    let edges = io.subscribe().unwrap();
    let mut engine = Engine::new(device, store, edges, true, Timebase::new(epoch(), 0));
    let mut sink = RecordingSink::new();

    let mut tl = timeline(&[TrialKind::Interval]);
    tl.looping = true;
    engine
        .handle_command(
            Command::StartExperiment {
                animal_id: "M9".into(),
                timeline: Some(tl),
            },
            0,
            &mut io,
            &mut sink,
        )
        .unwrap();
    failing.store(true, Ordering::Relaxed);

    let mut now = 0;
    while engine.is_running() && now < 2_000 * MS {
        now += 10 * MS;
        engine.tick(now, &mut io, &mut sink);
    }
    assert!(!engine.is_running(), "session should have been aborted");
    assert!(sink.count(|e| matches!(e, EngineEvent::PersistenceRetry { .. })) >= 1);

    let cause = sink.events.iter().find_map(|e| match e {
        EngineEvent::SessionFinalized { cause, .. } => Some(cause.clone()),
        _ => None,
    });
    assert!(matches!(cause, Some(Some(EngineError::PersistenceFailure(_)))));

    // The trial that never reached the journal is in the data file.
    let data = std::fs::read_to_string(dir.path().join("M9_20261019_120000.json")).unwrap();
    let saved = bbox::session::ExperimentSession::from_json(&data).unwrap();
    assert!(!saved.experiment_trials.is_empty());
    assert!(saved.experiment_trials.iter().all(|t| t.trial_outcome == Outcome::Success));
}

#[test]
fn begin_failure_rejects_the_start() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore {
        inner: FsStore::open(dir.path()).unwrap(),
        failing: Arc::new(AtomicBool::new(true)),
    };
    let mut io = MockIo::new();
    let edges = io.subscribe().unwrap();
    let mut engine = Engine::new(
        DeviceConfig::default(),
        store,
        edges,
        true,
        Timebase::new(epoch(), 0),
    );
    let mut sink = RecordingSink::new();

    let result = engine.handle_command(
        Command::StartExperiment {
            animal_id: "M9".into(),
            timeline: Some(timeline(&[TrialKind::NosePoke])),
        },
        0,
        &mut io,
        &mut sink,
    );
    assert!(matches!(result, Err(EngineError::PersistenceFailure(_))));
    assert!(!engine.is_running());
}

/// `FsStore` whose next append can be made to land only half its bytes.
struct TearingStore {
    inner: FsStore,
    tear_next: bool,
}

impl SessionStore for TearingStore {
    fn append_journal(&mut self, stem: &str, frame: &[u8]) -> Result<(), StorageError> {
        if std::mem::take(&mut self.tear_next) {
            self.inner.append_journal(stem, &frame[..frame.len() / 2])?;
            return Err(StorageError::Io("short write".into()));
        }
        self.inner.append_journal(stem, frame)
    }

    fn write_canonical(&mut self, stem: &str, document: &[u8]) -> Result<PathBuf, StorageError> {
        self.inner.write_canonical(stem, document)
    }

    fn remove_journal(&mut self, stem: &str) -> Result<(), StorageError> {
        self.inner.remove_journal(stem)
    }
}

fn sealed(id: &str, ms: u64) -> TrialRecord {
    TrialRecord {
        trial_id: id.into(),
        trial_type: TrialKind::NosePoke,
        trial_start: at(ms),
        trial_end: at(ms + 50),
        trial_outcome: Outcome::NoResponse,
        events: Vec::new(),
    }
}

#[test]
fn retried_append_after_short_write_keeps_journal_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = TearingStore {
        inner: FsStore::open(dir.path()).unwrap(),
        tear_next: false,
    };
    let mut logger = SessionLogger::new(store, 3);
    logger
        .begin(SessionMetadata {
            animal_id: "M7".into(),
            experiment_start: epoch(),
            experiment_end: None,
            config: ExperimentConfig::default(),
            experiment_file: timeline(&[TrialKind::NosePoke]),
            simulation_mode: true,
            seed: 5,
            device_version: "test".into(),
        })
        .unwrap();

    assert_eq!(logger.record(sealed("t0", 0)).unwrap(), WriteStatus::Durable);
    logger.store_mut().tear_next = true;
    assert_eq!(logger.record(sealed("t1", 100)).unwrap(), WriteStatus::Deferred);
    assert_eq!(logger.retry_pending().unwrap(), WriteStatus::Durable);
    assert_eq!(logger.record(sealed("t2", 200)).unwrap(), WriteStatus::Durable);

    let path = logger.store().inner.journal_path("M7_20261019_120000");
    let recovered = journal::recover(&std::fs::read(path).unwrap()).unwrap();
    let ids: Vec<_> = recovered
        .experiment_trials
        .iter()
        .map(|t| t.trial_id.as_str())
        .collect();
    assert_eq!(ids, ["t0", "t1", "t2"]);
    assert_eq!(recovered.experiment_metadata.animal_id, "M7");
}

#[test]
fn saved_session_reloads_identical_to_the_live_one() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke, TrialKind::Interval, TrialKind::LeverHold]));
    rig.edge(Channel::NosePort, true, 150);
    rig.edge(Channel::NosePort, false, 210);
    rig.run_until_idle(3_000);

    let live = rig.engine.logger().session().unwrap().clone();
    assert!(live.experiment_metadata.experiment_end.is_some());
    assert_eq!(live.experiment_statistics.trial_count, 3);

    let saved = rig.saved_session();
    assert_eq!(saved, live);
    let reencoded = String::from_utf8(saved.to_json().unwrap()).unwrap();
    assert_eq!(bbox::session::ExperimentSession::from_json(&reencoded).unwrap(), live);
}
