//! End-to-end trial scenarios: command → engine tick → FSM → outputs →
//! data file, on a 10 ms tick clock with fixed timing windows.

use bbox::app::commands::Command;
use bbox::app::events::EngineEvent;
use bbox::config::ExperimentConfig;
use bbox::io::Channel;
use bbox::session::{EventKind, Outcome, TrialRecord};
use bbox::timeline::TrialKind;

use crate::harness::{MS, Rig, at, fixed_config, timeline};

fn kinds(trial: &TrialRecord) -> Vec<EventKind> {
    trial.events.iter().map(|e| e.kind).collect()
}

fn time_of(trial: &TrialRecord, kind: EventKind) -> chrono::DateTime<chrono::Utc> {
    trial
        .events
        .iter()
        .find(|e| e.kind == kind)
        .unwrap_or_else(|| panic!("no {kind:?} in {:?}", kinds(trial)))
        .timestamp
}

// ── Success ───────────────────────────────────────────────────

#[test]
fn nose_poke_success_follows_the_timing_windows() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.run_to(100);
    assert!(rig.io.level(Channel::NoseLight), "cue light on at 100 ms");

    rig.edge(Channel::NosePort, true, 150);
    rig.run_to(150);
    assert!(!rig.io.level(Channel::NoseLight), "cue light off once poked");

    rig.edge(Channel::NosePort, false, 210);
    rig.run_to(210);
    assert!(rig.io.level(Channel::WaterValve), "valve open at 210 ms");

    rig.run_to(300);
    assert!(rig.io.level(Channel::WaterValve));
    rig.run_to(310);
    assert!(!rig.io.level(Channel::WaterValve), "valve closed at 310 ms");

    rig.run_until_idle(1_000);
    let session = rig.saved_session();
    assert_eq!(session.experiment_trials.len(), 1);
    let trial = &session.experiment_trials[0];

    assert_eq!(trial.trial_outcome, Outcome::Success);
    assert_eq!(
        kinds(trial),
        vec![
            EventKind::TrialStart,
            EventKind::CueOnset,
            EventKind::NosePortEntry,
            EventKind::CueOffset,
            EventKind::HoldComplete,
            EventKind::NosePortExit,
            EventKind::RewardTriggered,
            EventKind::WaterDeliveryComplete,
            EventKind::TrialEnd,
        ]
    );
    assert_eq!(time_of(trial, EventKind::TrialStart), at(100));
    assert_eq!(time_of(trial, EventKind::CueOnset), at(100));
    assert_eq!(time_of(trial, EventKind::HoldComplete), at(200));
    assert_eq!(time_of(trial, EventKind::RewardTriggered), at(210));
    assert_eq!(time_of(trial, EventKind::WaterDeliveryComplete), at(310));
    assert_eq!(trial.trial_start, at(0));
    assert_eq!(trial.trial_end, at(310));

    let stats = &session.experiment_statistics;
    assert_eq!(stats.trial_count, 1);
    assert_eq!(stats.nose_pokes, 1);
    assert_eq!(stats.water_deliveries, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(rig.io.activations(Channel::WaterValve), 1);
}

#[test]
fn nose_poke_lever_rewards_a_lever_press() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePokeLever]));

    rig.edge(Channel::NosePort, true, 150);
    rig.edge(Channel::NosePort, false, 205);
    rig.edge(Channel::RightLever, true, 260);
    rig.run_until_idle(1_000);

    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::Success);
    assert_eq!(time_of(trial, EventKind::RewardTriggered), at(260));
    assert_eq!(trial.count(EventKind::RightLeverPress), 1);
}

#[test]
fn lever_hold_tracks_the_lever_that_won() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::LeverHold]));

    rig.run_to(100);
    assert!(rig.io.level(Channel::LeftLeverLight));
    assert!(rig.io.level(Channel::RightLeverLight));

    rig.edge(Channel::RightLever, true, 130);
    // Releasing the other lever is not the response.
    rig.edge(Channel::LeftLever, true, 220);
    rig.edge(Channel::LeftLever, false, 230);
    rig.edge(Channel::RightLever, false, 260);
    rig.run_until_idle(1_000);

    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::Success);
    assert_eq!(time_of(trial, EventKind::RewardTriggered), at(260));
}

// ── Failures ──────────────────────────────────────────────────

#[test]
fn no_poke_times_out_without_reward() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));
    rig.run_until_idle(1_000);

    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::NoResponse);
    assert_eq!(time_of(trial, EventKind::CueTimeout), at(300));
    assert_eq!(trial.count(EventKind::RewardTriggered), 0);
    assert_eq!(trial.trial_end, at(300));
    assert_eq!(rig.io.activations(Channel::WaterValve), 0);
}

#[test]
fn early_release_is_punished_for_punish_time() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.edge(Channel::NosePort, true, 150);
    rig.edge(Channel::NosePort, false, 180);
    rig.run_to(180);
    assert!(rig.io.level(Channel::PunishLight), "punish on at 180 ms");
    rig.run_to(370);
    assert!(rig.io.level(Channel::PunishLight));
    rig.run_to(380);
    assert!(!rig.io.level(Channel::PunishLight), "punish off at 380 ms");

    rig.run_until_idle(1_000);
    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::PrematureRelease);
    assert_eq!(time_of(trial, EventKind::PunishOnset), at(180));
    assert_eq!(time_of(trial, EventKind::PunishComplete), at(380));
    assert_eq!(trial.count(EventKind::HoldComplete), 0);
    assert_eq!(trial.count(EventKind::RewardTriggered), 0);
}

#[test]
fn release_delivered_after_hold_end_still_counts_as_early() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.edge(Channel::NosePort, true, 150);
    // Debounced at 197 ms but only handed over after the 200 ms hold end.
    rig.run_to(200);
    rig.io.inject(Channel::NosePort, false, 197 * MS);
    rig.run_to(210);
    assert!(rig.io.level(Channel::PunishLight), "punish on once the late release arrives");
    assert!(!rig.io.level(Channel::WaterValve));

    rig.run_until_idle(1_000);
    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::PrematureRelease);
    assert_eq!(trial.count(EventKind::HoldComplete), 0);
    assert_eq!(trial.count(EventKind::RewardTriggered), 0);
    assert_eq!(time_of(trial, EventKind::PunishOnset), at(210));
    assert_eq!(time_of(trial, EventKind::PunishComplete), at(410));
}

#[test]
fn response_window_expiry_is_no_response() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.edge(Channel::NosePort, true, 150);
    rig.run_until_idle(2_000);

    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::NoResponse);
    assert_eq!(time_of(trial, EventKind::ResponseTimeout), at(700));
}

#[test]
fn poke_before_cue_does_not_count() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));

    rig.edge(Channel::NosePort, true, 50);
    rig.run_until_idle(1_000);

    let trial = &rig.saved_session().experiment_trials[0];
    assert_eq!(trial.trial_outcome, Outcome::NoResponse);
    assert_eq!(trial.count(EventKind::NosePortEntry), 1);
}

// ── Sequencing ────────────────────────────────────────────────

#[test]
fn trials_run_in_order_and_stop_when_exhausted() {
    let mut rig = Rig::new();
    rig.start(timeline(&[
        TrialKind::NosePoke,
        TrialKind::Interval,
        TrialKind::LeftLeverHold,
    ]));
    rig.run_until_idle(5_000);

    let session = rig.saved_session();
    let ids: Vec<_> = session.experiment_trials.iter().map(|t| t.trial_id.as_str()).collect();
    assert_eq!(ids, ["t0", "t1", "t2"]);
    assert_eq!(session.experiment_trials[1].trial_outcome, Outcome::Success);
    assert_eq!(session.experiment_statistics.trial_count, 3);
    assert_eq!(session.experiment_statistics.no_responses, 2);

    let started = rig.sink.count(|e| matches!(e, EngineEvent::TrialStarted { .. }));
    let completed = rig.sink.count(|e| matches!(e, EngineEvent::TrialCompleted { .. }));
    assert_eq!((started, completed), (3, 3));
    assert!(session.experiment_metadata.experiment_end.is_some());
}

#[test]
fn same_seed_and_inputs_replay_the_same_session() {
    let run = || {
        let mut rig = Rig::new();
        let mut tl = timeline(&[TrialKind::NosePoke; 4]);
        tl.config = Some(ExperimentConfig {
            iti_minimum: 50,
            iti_maximum: 300,
            cue_minimum: 100,
            cue_maximum: 400,
            hold_minimum: 20,
            hold_maximum: 80,
            ..fixed_config()
        });
        rig.start(tl);
        for k in 0..20 {
            let ms = 100 + k * 150;
            rig.edge(Channel::NosePort, true, ms);
            rig.edge(Channel::NosePort, false, ms + 60);
        }
        rig.run_until_idle(10_000);
        rig.saved_session()
    };

    let first = run();
    let second = run();
    assert_eq!(first.experiment_trials.len(), 4);
    assert_eq!(first.experiment_metadata.seed, 7);
    assert_eq!(first.experiment_trials, second.experiment_trials);
    assert_eq!(first.experiment_statistics, second.experiment_statistics);
    assert_eq!(first, second);
}

#[test]
fn looping_timeline_runs_until_stopped() {
    let mut rig = Rig::new();
    let mut tl = timeline(&[TrialKind::Interval]);
    tl.looping = true;
    rig.start(tl);

    rig.run_to(450);
    assert!(rig.engine.is_running());
    assert!(rig.engine.runner().unwrap().iteration() >= 3);

    rig.command(Command::StopExperiment).unwrap();
    rig.run_until_idle(1_000);

    let session = rig.saved_session();
    assert!(session.experiment_trials.len() >= 4);
    assert!(
        session
            .experiment_trials
            .iter()
            .all(|t| t.trial_outcome == Outcome::Success)
    );
}

#[test]
fn stop_mid_reward_lets_the_valve_finish() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke, TrialKind::NosePoke]));

    rig.edge(Channel::NosePort, true, 150);
    rig.edge(Channel::NosePort, false, 210);
    rig.run_to(250);
    rig.command(Command::StopExperiment).unwrap();

    rig.run_to(300);
    assert!(rig.io.level(Channel::WaterValve), "valve still open at 300 ms");
    rig.run_until_idle(1_000);
    assert!(!rig.io.level(Channel::WaterValve));

    let session = rig.saved_session();
    assert_eq!(session.experiment_trials.len(), 1);
    assert_eq!(session.experiment_trials[0].trial_outcome, Outcome::Success);
}

#[test]
fn stop_during_cue_records_aborted_trial() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));
    rig.run_to(150);
    rig.command(Command::StopExperiment).unwrap();
    rig.run_until_idle(1_000);

    let session = rig.saved_session();
    assert_eq!(session.experiment_trials.len(), 1);
    assert_eq!(session.experiment_trials[0].trial_outcome, Outcome::Aborted);
    assert_eq!(session.experiment_statistics.aborted, 1);
    assert!(!rig.io.level(Channel::NoseLight));
}

#[test]
fn stop_during_iti_discards_the_trial() {
    let mut rig = Rig::new();
    rig.start(timeline(&[TrialKind::NosePoke]));
    rig.run_to(50);
    rig.command(Command::StopExperiment).unwrap();
    rig.run_until_idle(1_000);

    assert!(rig.saved_session().experiment_trials.is_empty());
}
