//! Engine service: the hexagonal core.
//!
//! [`Engine`] owns the loaded timeline, the timeline runner, the session
//! logger and the event bus.  It exposes a hardware-agnostic API; all I/O
//! flows through port traits injected at call sites, so the whole engine
//! runs against mock adapters in tests.
//!
//! ```text
//!  EdgeStream ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                 │          Engine          │
//!  CommandQueue ─▶│  Runner · Logger · Bus   │ ──▶ StatusBoard
//!                 └──────────────────────────┘
//!                        ▲            │
//!                        └─ IoPort ◀──┘
//! ```
//!
//! One call to [`Engine::tick`] is one pass of the tick loop:
//!
//! 1. apply queued commands
//! 2. move sampler edges onto the bus and dispatch them
//! 3. step the running trial; record what it sealed
//! 4. expire IO self-tests
//! 5. write changed outputs and dispatch the resulting events
//! 6. retry deferred journal writes
//! 7. publish the status snapshot

use heapless::Vec as FixedVec;
use log::{debug, error, info, warn};
use rand::Rng;

use crate::channels::{CommandQueue, CommandSender, StatusBoard};
use crate::clock::Timebase;
use crate::config::DeviceConfig;
use crate::error::{EngineError, Result};
use crate::events::{BusEvent, EventBus};
use crate::io::queue::EdgeStream;
use crate::io::{Channel, IoEdge, IoState};
use crate::runner::{FinishReason, TimelineRunner};
use crate::session::logger::{SessionLogger, WriteStatus};
use crate::session::model::SessionMetadata;
use crate::timeline::Timeline;

use super::commands::Command;
use super::events::{EngineEvent, StatusSnapshot};
use super::ports::{EventSink, IoPort, SessionStore};

/// Reported in session metadata and the status snapshot.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Concurrent IO self-tests.
const MAX_SELF_TESTS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct SelfTest {
    channel: Channel,
    until_us: u64,
}

// ───────────────────────────────────────────────────────────────
// Engine
// ───────────────────────────────────────────────────────────────

pub struct Engine<S: SessionStore> {
    device: DeviceConfig,
    simulated: bool,
    timebase: Timebase,

    commands: CommandQueue,
    status: StatusBoard,
    edges: EdgeStream,
    bus: EventBus,

    timeline: Option<Timeline>,
    runner: Option<TimelineRunner>,
    logger: SessionLogger<S>,
    /// Why the live session is being aborted, if not by `stop`.
    abort_cause: Option<EngineError>,

    /// Output levels as last written.
    applied: IoState,
    output_tests: FixedVec<SelfTest, MAX_SELF_TESTS>,
    input_tests: FixedVec<SelfTest, MAX_SELF_TESTS>,
    /// An output write failed and has not succeeded since.
    degraded: bool,
    /// Input the sampler currently cannot read.
    input_fault: Option<Channel>,
    tick_count: u64,
}

impl<S: SessionStore> Engine<S> {
    /// `edges` is the stream taken from the IO port with
    /// [`IoPort::subscribe`]; `timebase` anchors monotonic time to UTC.
    pub fn new(
        device: DeviceConfig,
        store: S,
        edges: EdgeStream,
        simulated: bool,
        timebase: Timebase,
    ) -> Self {
        let logger = SessionLogger::new(store, u32::from(device.max_persist_retries));
        info!(
            "engine v{VERSION}: {} mode, tick {} ms",
            if simulated { "simulation" } else { "hardware" },
            device.tick_interval_ms
        );
        Self {
            device,
            simulated,
            timebase,
            commands: CommandQueue::new(),
            status: StatusBoard::new(),
            edges,
            bus: EventBus::new(),
            timeline: None,
            runner: None,
            logger,
            abort_cause: None,
            applied: IoState::default(),
            output_tests: FixedVec::new(),
            input_tests: FixedVec::new(),
            degraded: false,
            input_fault: None,
            tick_count: 0,
        }
    }

    /// Handle for the communication interface to queue commands.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Handle for the communication interface to read status.
    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.runner.is_some()
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn loaded_timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    pub fn runner(&self) -> Option<&TimelineRunner> {
        self.runner.as_ref()
    }

    pub fn logger(&self) -> &SessionLogger<S> {
        &self.logger
    }

    pub fn logger_mut(&mut self) -> &mut SessionLogger<S> {
        &mut self.logger
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // ── Command handling ──────────────────────────────────────

    /// Apply one command now.  Commands queued through
    /// [`Engine::command_sender`] go through here at the next tick, with
    /// rejections emitted as [`EngineEvent::CommandRejected`].
    pub fn handle_command(
        &mut self,
        command: Command,
        now_us: u64,
        hw: &mut impl IoPort,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        debug!("engine: command {}", command.name());
        match command {
            Command::StartExperiment {
                animal_id,
                timeline,
            } => self.start_session(animal_id, timeline, now_us, sink),
            Command::StopExperiment => self.stop_session(),
            Command::TestOutput {
                channel,
                duration_ms,
            } => self.start_output_test(channel, duration_ms, now_us, hw),
            Command::TestInput {
                channel,
                timeout_ms,
            } => self.start_input_test(channel, timeout_ms, now_us),
            Command::UploadTimeline(timeline) => self.load_timeline(timeline, sink),
        }
    }

    fn load_timeline(&mut self, timeline: Timeline, sink: &mut impl EventSink) -> Result<()> {
        let config = timeline
            .config
            .as_ref()
            .unwrap_or(&self.device.experiment);
        config.validate()?;
        timeline.validate_against(config)?;

        info!(
            "engine: timeline '{}' v{} loaded ({} trials)",
            timeline.name,
            timeline.version,
            timeline.trials.len()
        );
        sink.emit(&EngineEvent::TimelineLoaded {
            name: timeline.name.clone(),
            trials: timeline.trials.len(),
        });
        self.timeline = Some(timeline);
        Ok(())
    }

    fn start_session(
        &mut self,
        animal_id: String,
        timeline: Option<Timeline>,
        now_us: u64,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::SessionAlreadyRunning);
        }
        validate_animal_id(&animal_id)?;
        if let Some(timeline) = timeline {
            self.load_timeline(timeline, sink)?;
        }
        let timeline = self.timeline.clone().ok_or(EngineError::NoTimelineLoaded)?;
        let config = timeline
            .config
            .clone()
            .unwrap_or_else(|| self.device.experiment.clone());
        let seed = self.device.seed.unwrap_or_else(|| rand::rng().random());

        let runner =
            TimelineRunner::start(timeline.clone(), config.clone(), seed, self.timebase, now_us)?;
        let metadata = SessionMetadata {
            animal_id: animal_id.clone(),
            experiment_start: self.timebase.stamp(now_us),
            experiment_end: None,
            config,
            experiment_file: timeline,
            simulation_mode: self.simulated,
            seed,
            device_version: VERSION.to_string(),
        };
        self.logger.begin(metadata)?;

        info!("engine: session started for {animal_id} (seed {seed})");
        sink.emit(&EngineEvent::SessionStarted {
            animal_id,
            seed,
            simulated: self.simulated,
        });
        if let Some(trial) = runner.current_trial() {
            sink.emit(&EngineEvent::TrialStarted {
                index: 0,
                trial_id: trial.id.clone(),
            });
        }
        self.runner = Some(runner);
        self.abort_cause = None;
        Ok(())
    }

    fn stop_session(&mut self) -> Result<()> {
        match self.runner.as_mut() {
            Some(runner) => runner.stop(),
            None => Err(EngineError::InvalidState("no session running")),
        }
    }

    fn start_output_test(
        &mut self,
        channel: Channel,
        duration_ms: u64,
        now_us: u64,
        hw: &mut impl IoPort,
    ) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::SessionAlreadyRunning);
        }
        if channel.is_input() {
            return Err(EngineError::InvalidChannel(channel.name()));
        }
        let until_us = now_us.saturating_add(duration_ms.saturating_mul(1000));
        if let Some(test) = self.output_tests.iter_mut().find(|t| t.channel == channel) {
            test.until_us = until_us;
        } else {
            self.output_tests
                .push(SelfTest { channel, until_us })
                .map_err(|_| EngineError::InvalidState("too many IO tests running"))?;
        }
        info!("engine: test_output {} for {duration_ms} ms", channel.name());
        self.write_output(channel, true, now_us, hw)
    }

    fn start_input_test(&mut self, channel: Channel, timeout_ms: u64, now_us: u64) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::SessionAlreadyRunning);
        }
        if !channel.is_input() {
            return Err(EngineError::InvalidChannel(channel.name()));
        }
        let until_us = now_us.saturating_add(timeout_ms.saturating_mul(1000));
        self.input_tests
            .push(SelfTest { channel, until_us })
            .map_err(|_| EngineError::InvalidState("too many IO tests running"))?;
        info!("engine: test_input {} within {timeout_ms} ms", channel.name());
        Ok(())
    }

    // ── Per-tick orchestration ────────────────────────────────

    pub fn tick(&mut self, now_us: u64, hw: &mut impl IoPort, sink: &mut impl EventSink) {
        self.tick_count += 1;

        // 1. Commands
        while let Some(command) = self.commands.try_next() {
            let name = command.name();
            if let Err(error) = self.handle_command(command, now_us, hw, sink) {
                warn!("engine: {name} rejected: {error}");
                sink.emit(&EngineEvent::CommandRejected {
                    command: name,
                    error,
                });
            }
        }

        // 2. Inputs
        while !self.bus.is_full() {
            let Some(edge) = self.edges.try_next() else {
                break;
            };
            // Room was checked above.
            let _ = self.bus.publish(BusEvent::Input(edge));
        }
        self.watch_inputs(hw, sink);
        self.dispatch_bus(sink);

        // 3. Trial
        self.step_runner(now_us, sink);

        // 4. Self-tests
        self.expire_tests(now_us, hw, sink);

        // 5. Outputs
        self.apply_outputs(now_us, hw, sink);
        self.dispatch_bus(sink);

        // 6. Persistence
        self.retry_persistence(sink);

        // 7. Status
        self.publish_status(hw);
    }

    // ── Internal ──────────────────────────────────────────────

    fn dispatch_bus(&mut self, sink: &mut impl EventSink) {
        while let Some(event) = self.bus.pop() {
            if let BusEvent::Input(edge) = event {
                if let Some(runner) = self.runner.as_mut() {
                    runner.offer_edge(edge);
                }
                if edge.active {
                    self.finish_input_test(edge.channel, true, sink);
                }
            }
            sink.emit(&EngineEvent::Io(event));
        }
    }

    fn step_runner(&mut self, now_us: u64, sink: &mut impl EventSink) {
        let Some(runner) = self.runner.as_mut() else {
            return;
        };
        let report = runner.tick(now_us);

        if let Some((index, record)) = report.sealed {
            let trial_id = record.trial_id.clone();
            sink.emit(&EngineEvent::TrialCompleted {
                index,
                trial_id: trial_id.clone(),
                outcome: record.trial_outcome,
            });
            match self.logger.record(record) {
                Ok(WriteStatus::Durable) => {}
                Ok(WriteStatus::Deferred) => sink.emit(&EngineEvent::PersistenceRetry {
                    pending: self.logger.pending_frames(),
                }),
                Err(error) => {
                    error!("engine: trial {trial_id} not recorded: {error}");
                    sink.emit(&EngineEvent::TrialNotRecorded { trial_id, error });
                }
            }
        }

        if let Some(index) = report.started {
            if let Some(trial) = self.runner.as_ref().and_then(TimelineRunner::current_trial) {
                sink.emit(&EngineEvent::TrialStarted {
                    index,
                    trial_id: trial.id.clone(),
                });
            }
        }

        if let Some(reason) = report.finished {
            self.finish_session(reason, now_us, sink);
        }
    }

    fn finish_session(&mut self, reason: FinishReason, now_us: u64, sink: &mut impl EventSink) {
        self.runner = None;
        let cause = self.abort_cause.take();
        info!("engine: session finished ({reason:?})");

        match self.logger.finalize(self.timebase.stamp(now_us)) {
            Ok(path) => {
                let trials = self
                    .logger
                    .session()
                    .map_or(0, |s| s.experiment_trials.len());
                sink.emit(&EngineEvent::SessionFinalized {
                    path,
                    trials,
                    cause,
                });
            }
            Err(e) => {
                error!("engine: session could not be finalized: {e}");
                sink.emit(&EngineEvent::SessionFailed(e));
            }
        }
    }

    /// Report the sampler's read faults as they start and clear.
    fn watch_inputs(&mut self, hw: &impl IoPort, sink: &mut impl EventSink) {
        let fault = hw.input_fault();
        if fault == self.input_fault {
            return;
        }
        match fault {
            Some(channel) => {
                warn!("engine: input {} cannot be read", channel.name());
                sink.emit(&EngineEvent::Degraded(format!(
                    "{}: input read failing",
                    channel.name()
                )));
            }
            None => {
                info!("engine: inputs readable again");
                sink.emit(&EngineEvent::Recovered);
            }
        }
        self.input_fault = fault;
    }

    fn expire_tests(&mut self, now_us: u64, hw: &mut impl IoPort, sink: &mut impl EventSink) {
        while let Some(pos) = self.output_tests.iter().position(|t| now_us >= t.until_us) {
            let test = self.output_tests.swap_remove(pos);
            // A failed write is retried by apply_outputs.
            let passed = self.write_output(test.channel, false, now_us, hw).is_ok();
            sink.emit(&EngineEvent::TestFinished {
                channel: test.channel,
                passed,
            });
        }
        while let Some(pos) = self.input_tests.iter().position(|t| now_us >= t.until_us) {
            let test = self.input_tests.swap_remove(pos);
            sink.emit(&EngineEvent::TestFinished {
                channel: test.channel,
                passed: false,
            });
        }
    }

    fn finish_input_test(&mut self, channel: Channel, passed: bool, sink: &mut impl EventSink) {
        while let Some(pos) = self.input_tests.iter().position(|t| t.channel == channel) {
            self.input_tests.swap_remove(pos);
            sink.emit(&EngineEvent::TestFinished { channel, passed });
        }
    }

    /// Output levels wanted this tick: the trial's requests plus any
    /// output under self-test.
    fn desired_outputs(&self) -> IoState {
        let mut desired = self
            .runner
            .as_ref()
            .map(TimelineRunner::output_levels)
            .unwrap_or_default();
        for test in &self.output_tests {
            desired.set(test.channel, true);
        }
        desired
    }

    fn apply_outputs(&mut self, now_us: u64, hw: &mut impl IoPort, sink: &mut impl EventSink) {
        let desired = self.desired_outputs();
        let mut failure = None;

        for channel in Channel::OUTPUTS {
            let level = desired.get(channel);
            if level == self.applied.get(channel) {
                continue;
            }
            if let Err(e) = self.write_output(channel, level, now_us, hw) {
                failure.get_or_insert(format!("{}: {e}", channel.name()));
            }
        }

        match failure {
            Some(detail) => {
                if let Some(runner) = self.runner.as_mut() {
                    runner.report_fault(detail.clone());
                }
                if !self.degraded {
                    self.degraded = true;
                    sink.emit(&EngineEvent::Degraded(detail));
                }
            }
            None if self.degraded => {
                self.degraded = false;
                info!("engine: outputs writable again");
                sink.emit(&EngineEvent::Recovered);
            }
            None => {}
        }
    }

    fn write_output(
        &mut self,
        channel: Channel,
        level: bool,
        now_us: u64,
        hw: &mut impl IoPort,
    ) -> Result<()> {
        match hw.write(channel, level) {
            Ok(()) => {
                self.applied.set(channel, level);
                let published = self.bus.publish(BusEvent::Output(IoEdge {
                    channel,
                    active: level,
                    at_us: now_us,
                }));
                if !published {
                    warn!("engine: event bus full, {} transition not published", channel.name());
                }
                Ok(())
            }
            Err(e) => {
                warn!("engine: write {} = {level} failed: {e}", channel.name());
                Err(e.into())
            }
        }
    }

    fn retry_persistence(&mut self, sink: &mut impl EventSink) {
        if self.abort_cause.is_some() || !self.logger.is_open() {
            return;
        }
        match self.logger.retry_pending() {
            Ok(WriteStatus::Durable) => {}
            Ok(WriteStatus::Deferred) => sink.emit(&EngineEvent::PersistenceRetry {
                pending: self.logger.pending_frames(),
            }),
            Err(e) => {
                error!("engine: aborting session: {e}");
                if let Some(runner) = self.runner.as_mut() {
                    if let Err(stop_err) = runner.stop() {
                        warn!("engine: abort after finish: {stop_err}");
                    }
                }
                self.abort_cause = Some(e);
            }
        }
    }

    fn publish_status(&self, hw: &impl IoPort) {
        let runner = self.runner.as_ref();
        self.status.publish(StatusSnapshot {
            version: VERSION,
            simulated: self.simulated,
            running: runner.is_some(),
            degraded: self.degraded || self.input_fault.is_some(),
            io: hw.snapshot(),
            trial_index: runner.and_then(TimelineRunner::current_index),
            trial_id: runner
                .and_then(TimelineRunner::current_trial)
                .map(|t| t.id.clone()),
            iteration: runner.map_or(0, TimelineRunner::iteration),
            state: runner.and_then(TimelineRunner::current_state),
            statistics: self.logger.live_stats(),
            tick: self.tick_count,
        });
    }
}

/// Animal ids become part of the data file name.
fn validate_animal_id(id: &str) -> Result<()> {
    let trimmed = id.trim();
    if trimmed.is_empty()
        || trimmed != id
        || id.contains(['/', '\\'])
        || id.contains("..")
        || id.chars().any(char::is_control)
    {
        return Err(EngineError::InvalidAnimalId(id.to_string()));
    }
    Ok(())
}
