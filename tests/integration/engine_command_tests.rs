//! Command handling: lifecycle errors, queued commands, IO self-tests,
//! output faults and the status board.

use std::cell::Cell;
use std::rc::Rc;

use bbox::adapters::fs_store::FsStore;
use bbox::adapters::simulated::SimOutputs;
use bbox::app::commands::Command;
use bbox::app::events::EngineEvent;
use bbox::app::ports::{InputSource, IoError, IoPort};
use bbox::app::service::Engine;
use bbox::clock::Timebase;
use bbox::config::DeviceConfig;
use bbox::drivers::sampler::InputSampler;
use bbox::error::EngineError;
use bbox::fsm::StateId;
use bbox::io::Channel;
use bbox::io::port::DigitalPort;
use bbox::io::queue::{SharedLevels, edge_channel};
use bbox::session::Outcome;
use bbox::timeline::{Timeline, TrialDefinition, TrialKind};

use crate::harness::{MS, Rig, at, epoch, timeline};
use crate::mock_io::RecordingSink;

fn start(animal: &str) -> Command {
    Command::StartExperiment {
        animal_id: animal.into(),
        timeline: None,
    }
}

// ── Lifecycle ─────────────────────────────────────────────────

#[test]
fn start_without_timeline_is_rejected() {
    let mut rig = Rig::new();
    assert_eq!(rig.command(start("M1")), Err(EngineError::NoTimelineLoaded));
    assert!(!rig.engine.is_running());
}

#[test]
fn second_start_is_rejected_while_running() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));
    assert_eq!(rig.command(start("M2")), Err(EngineError::SessionAlreadyRunning));
}

#[test]
fn stop_without_session_is_invalid_state() {
    let mut rig = Rig::new();
    assert!(matches!(
        rig.command(Command::StopExperiment),
        Err(EngineError::InvalidState(_))
    ));
}

#[test]
fn repeated_stop_is_accepted_until_finalized() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));
    rig.run_to(150);
    rig.command(Command::StopExperiment).unwrap();
    rig.command(Command::StopExperiment).unwrap();
    rig.run_until_idle(1_000);
    assert!(matches!(
        rig.command(Command::StopExperiment),
        Err(EngineError::InvalidState(_))
    ));
}

#[test]
fn unsafe_animal_id_is_rejected() {
    let mut rig = Rig::new();
    rig.command(Command::UploadTimeline(timeline(&[TrialKind::NosePoke])))
        .unwrap();
    assert!(matches!(
        rig.command(start("../etc")),
        Err(EngineError::InvalidAnimalId(_))
    ));
}

#[test]
fn invalid_timeline_upload_keeps_previous() {
    let mut rig = Rig::new();
    rig.command(Command::UploadTimeline(timeline(&[TrialKind::NosePoke])))
        .unwrap();

    let dup = Timeline::new(
        "dup",
        vec![
            TrialDefinition::new(TrialKind::NosePoke, "a"),
            TrialDefinition::new(TrialKind::NosePoke, "a"),
        ],
    );
    assert!(matches!(
        rig.command(Command::UploadTimeline(dup)),
        Err(EngineError::InvalidTimeline(_))
    ));
    assert_eq!(rig.engine.loaded_timeline().unwrap().name, "integration");
}

#[test]
fn uploaded_timeline_survives_the_session() {
    let mut rig = Rig::new();
    rig.command(Command::UploadTimeline(timeline(&[TrialKind::Interval])))
        .unwrap();
    rig.command(start("M1")).unwrap();
    rig.run_until_idle(1_000);

    assert!(rig.engine.loaded_timeline().is_some());
    rig.command(start("M1b")).unwrap();
    assert!(rig.engine.is_running());
}

#[test]
fn queued_commands_apply_at_the_next_tick() {
    let mut rig = Rig::new();
    let tx = rig.engine.command_sender();
    tx.send(Command::UploadTimeline(timeline(&[TrialKind::NosePoke])))
        .unwrap();
    tx.send(start("M1")).unwrap();
    tx.send(start("M1")).unwrap();
    assert!(!rig.engine.is_running());

    rig.tick();
    assert!(rig.engine.is_running());
    assert_eq!(rig.sink.rejections(), vec!["start_experiment"]);
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, EngineEvent::SessionStarted { seed: 7, .. })),
        1
    );
}

// ── Status ────────────────────────────────────────────────────

#[test]
fn status_board_tracks_the_running_trial() {
    let mut rig = Rig::new();
    let board = rig.engine.status_board();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.run_to(50);
    let snap = board.snapshot();
    assert!(snap.running && snap.simulated);
    assert_eq!(snap.trial_index, Some(0));
    assert_eq!(snap.trial_id.as_deref(), Some("t0"));
    assert_eq!(snap.state, Some(StateId::Intertrial));

    rig.run_to(100);
    let snap = board.snapshot();
    assert_eq!(snap.state, Some(StateId::Cue));
    assert!(snap.io.get(Channel::NoseLight));

    rig.run_until_idle(1_000);
    let snap = board.snapshot();
    assert!(!snap.running);
    assert_eq!(snap.statistics.no_responses, 1);
}

// ── IO self-tests ─────────────────────────────────────────────

#[test]
fn output_test_pulses_without_blocking() {
    let mut rig = Rig::new();
    rig.command(Command::TestOutput {
        channel: Channel::WaterValve,
        duration_ms: 50,
    })
    .unwrap();
    assert!(rig.io.level(Channel::WaterValve));

    rig.run_to(40);
    assert!(rig.io.level(Channel::WaterValve));
    rig.run_to(50);
    assert!(!rig.io.level(Channel::WaterValve));
    assert_eq!(
        rig.sink.count(|e| matches!(
            e,
            EngineEvent::TestFinished {
                channel: Channel::WaterValve,
                passed: true
            }
        )),
        1
    );
}

#[test]
fn input_test_passes_on_activation() {
    let mut rig = Rig::new();
    rig.command(Command::TestInput {
        channel: Channel::LeftLever,
        timeout_ms: 500,
    })
    .unwrap();
    rig.edge(Channel::LeftLever, true, 120);
    rig.run_to(600);

    let finished: Vec<_> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TestFinished { channel, passed } => Some((*channel, *passed)),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![(Channel::LeftLever, true)]);
}

#[test]
fn input_test_times_out() {
    let mut rig = Rig::new();
    rig.command(Command::TestInput {
        channel: Channel::NosePort,
        timeout_ms: 100,
    })
    .unwrap();
    rig.run_to(100);
    assert_eq!(
        rig.sink.count(|e| matches!(e, EngineEvent::TestFinished { passed: false, .. })),
        1
    );
}

#[test]
fn self_tests_are_refused_during_a_session_and_by_direction() {
    let mut rig = Rig::new();
    assert!(matches!(
        rig.command(Command::TestOutput {
            channel: Channel::NosePort,
            duration_ms: 10
        }),
        Err(EngineError::InvalidChannel("nose_port"))
    ));
    assert!(matches!(
        rig.command(Command::TestInput {
            channel: Channel::WaterValve,
            timeout_ms: 10
        }),
        Err(EngineError::InvalidChannel("water_valve"))
    ));

    rig.start(timeline(&[TrialKind::NosePoke]));
    assert_eq!(
        rig.command(Command::TestOutput {
            channel: Channel::WaterValve,
            duration_ms: 10
        }),
        Err(EngineError::SessionAlreadyRunning)
    );
}

// ── Output faults ─────────────────────────────────────────────

#[test]
fn failed_output_write_seals_error_and_session_continues() {
    let mut rig = Rig::new();
    rig.io.broken.push(Channel::NoseLight);
    rig.start(timeline(&[TrialKind::NosePoke, TrialKind::Interval]));

    rig.run_to(120);
    assert_eq!(
        rig.sink.count(|e| matches!(e, EngineEvent::Degraded(_))),
        1
    );

    rig.io.broken.clear();
    rig.run_until_idle(2_000);
    assert_eq!(rig.sink.count(|e| matches!(e, EngineEvent::Recovered)), 1);

    let session = rig.saved_session();
    let outcomes: Vec<_> = session
        .experiment_trials
        .iter()
        .map(|t| t.trial_outcome)
        .collect();
    assert_eq!(outcomes, vec![Outcome::Error, Outcome::Success]);
}

#[test]
fn trial_the_logger_refuses_is_reported() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::Interval]));
    rig.engine.logger_mut().finalize(at(0)).unwrap();

    rig.run_until_idle(2_000);
    let refused: Vec<_> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TrialNotRecorded { trial_id, error } => Some((trial_id.as_str(), error)),
            _ => None,
        })
        .collect();
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].0, "t0");
    assert!(matches!(refused[0].1, EngineError::InvalidState(_)));
}

// ── Input faults ──────────────────────────────────────────────

/// Idle inputs; reads of `broken` fail while it is set.
struct FlakySource {
    broken: Rc<Cell<Option<Channel>>>,
}

impl InputSource for FlakySource {
    fn sample(&mut self, channel: Channel) -> Result<bool, IoError> {
        if self.broken.get() == Some(channel) {
            return Err(IoError::Gpio {
                line: 22,
                detail: "read".into(),
            });
        }
        Ok(false)
    }
}

#[test]
fn failing_input_read_reports_degraded_until_it_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let broken = Rc::new(Cell::new(None));
    let levels = SharedLevels::new();
    let (sender, stream) = edge_channel();
    let mut sampler = InputSampler::new(
        FlakySource {
            broken: broken.clone(),
        },
        sender,
        levels.clone(),
        5 * MS,
    );
    let mut port = DigitalPort::new(SimOutputs::default(), levels, stream, true);
    let edges = port.subscribe().unwrap();
    let device = DeviceConfig {
        seed: Some(7),
        data_dir: dir.path().to_path_buf(),
        ..DeviceConfig::default()
    };
    let store = FsStore::open(&device.data_dir).unwrap();
    let mut engine = Engine::new(device, store, edges, true, Timebase::new(epoch(), 0));
    let board = engine.status_board();
    let mut sink = RecordingSink::new();

    let mut now = 0;
    let mut run = |ms: u64, engine: &mut Engine<FsStore>, sink: &mut RecordingSink| {
        while now < ms * MS {
            now += MS;
            sampler.poll(now);
            if now % (10 * MS) == 0 {
                engine.tick(now, &mut port, sink);
            }
        }
    };

    run(30, &mut engine, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, EngineEvent::Degraded(_))), 0);

    broken.set(Some(Channel::LeftLever));
    run(100, &mut engine, &mut sink);
    let degraded: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Degraded(reason) => Some(reason.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(degraded, vec!["left_lever: input read failing"]);
    assert!(board.snapshot().degraded);

    broken.set(None);
    run(130, &mut engine, &mut sink);
    assert_eq!(sink.count(|e| matches!(e, EngineEvent::Recovered)), 1);
    assert!(!board.snapshot().degraded);
}
