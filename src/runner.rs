//! Timeline runner: trial selection, looping and the hand-off from one
//! trial's `Complete` to the next trial's `Intertrial`.
//!
//! The runner owns the session's seeded generator; every trial's timing
//! plan is drawn here, before its state machine starts, so a trial kind
//! never influences how the next ITI is drawn.

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::clock::Timebase;
use crate::config::ExperimentConfig;
use crate::error::{EngineError, Result};
use crate::fsm::context::{TrialContext, TrialPlan};
use crate::fsm::{Fsm, StateId};
use crate::io::{Channel, IoEdge, IoState};
use crate::session::model::{Outcome, TrialRecord};
use crate::timeline::{Timeline, TrialDefinition};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Non-looping timeline ran out of trials.
    Exhausted,
    /// `stop()` was honoured.
    Stopped,
}

/// What happened during one [`TimelineRunner::tick`].
#[derive(Debug, Default)]
pub struct TickReport {
    /// Trial sealed this tick (timeline index, record), ready for the logger.
    pub sealed: Option<(usize, TrialRecord)>,
    /// Index of a trial whose state machine started this tick.
    pub started: Option<usize>,
    pub finished: Option<FinishReason>,
}

struct ActiveTrial {
    index: usize,
    definition: TrialDefinition,
    fsm: Fsm,
    ctx: TrialContext,
}

pub struct TimelineRunner {
    timeline: Timeline,
    config: ExperimentConfig,
    rng: StdRng,
    seed: u64,
    timebase: Timebase,
    cursor: usize,
    iteration: u32,
    active: Option<ActiveTrial>,
    stop_requested: bool,
    finished: bool,
}

impl TimelineRunner {
    /// Validate and begin the first trial's ITI at `now_us`.
    pub fn start(
        timeline: Timeline,
        config: ExperimentConfig,
        seed: u64,
        timebase: Timebase,
        now_us: u64,
    ) -> Result<Self> {
        config.validate()?;
        timeline.validate_against(&config)?;

        info!(
            "runner: starting '{}' ({} trials, loop={}, seed={seed})",
            timeline.name,
            timeline.trials.len(),
            timeline.looping
        );

        let mut runner = Self {
            timeline,
            config,
            rng: StdRng::seed_from_u64(seed),
            seed,
            timebase,
            cursor: 0,
            iteration: 0,
            active: None,
            stop_requested: false,
            finished: false,
        };
        runner.begin_trial(now_us)?;
        Ok(runner)
    }

    /// Request a cooperative stop.  Waiting states end at the next tick;
    /// an open valve or punish signal runs out its timer first.
    pub fn stop(&mut self) -> Result<()> {
        if self.finished {
            return Err(EngineError::InvalidState("timeline already finished"));
        }
        if !self.stop_requested {
            info!("runner: stop requested");
        }
        self.stop_requested = true;
        if let Some(trial) = self.active.as_mut() {
            trial.ctx.abort_requested = true;
        }
        Ok(())
    }

    pub fn current_trial(&self) -> Option<&TrialDefinition> {
        self.active.as_ref().map(|t| &t.definition)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.active.as_ref().map(|t| t.index)
    }

    pub fn current_state(&self) -> Option<StateId> {
        self.active.as_ref().map(|t| t.fsm.current_state())
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested
    }

    /// Hand an input edge to the running trial for this tick.
    pub fn offer_edge(&mut self, edge: IoEdge) {
        if let Some(trial) = self.active.as_mut() {
            trial.ctx.offer_edge(edge);
        }
    }

    /// Report an output failure; the running trial seals as `error`.
    pub fn report_fault(&mut self, detail: impl Into<String>) {
        if let Some(trial) = self.active.as_mut() {
            if trial.ctx.fault.is_none() {
                trial.ctx.fault = Some(detail.into());
            }
        }
    }

    /// Output levels the running trial requests.  Every output is listed,
    /// so applying the result also clears anything left on.
    pub fn output_levels(&self) -> IoState {
        let mut levels = IoState::default();
        if let Some(trial) = &self.active {
            let commands = trial.ctx.commands;
            if commands.cue {
                if let Some(protocol) = trial.ctx.protocol {
                    for &ch in protocol.cue_outputs {
                        levels.set(ch, true);
                    }
                }
            }
            levels.set(Channel::WaterValve, commands.reward);
            levels.set(Channel::PunishLight, commands.punish);
        }
        levels
    }

    /// Advance the running trial to `now_us`.  Edges must have been offered
    /// before the call; they are consumed by it.
    pub fn tick(&mut self, now_us: u64) -> TickReport {
        let mut report = TickReport::default();
        if self.finished {
            return report;
        }

        let Some(trial) = self.active.as_mut() else {
            report.finished = Some(self.finish());
            return report;
        };

        trial.ctx.now_us = now_us;
        trial.fsm.tick(&mut trial.ctx);
        trial.ctx.edges.clear();

        if !trial.fsm.is_complete() {
            return report;
        }

        let sealed = trial.ctx.take_sealed();
        let started = trial.ctx.started;
        let index = trial.index;
        self.active = None;

        match sealed {
            Some(record) if record.trial_outcome == Outcome::Aborted && !started => {
                info!("runner: trial {} stopped before it began, discarded", record.trial_id);
            }
            Some(record) => report.sealed = Some((index, record)),
            None => warn!("runner: trial {index} completed without a record"),
        }

        if self.stop_requested {
            report.finished = Some(self.finish());
            return report;
        }

        if let Some(reason) = self.advance_cursor() {
            report.finished = Some(reason);
            return report;
        }

        match self.begin_trial(now_us) {
            Ok(()) => report.started = self.current_index(),
            Err(e) => {
                warn!("runner: cannot begin next trial: {e}");
                report.finished = Some(self.finish());
            }
        }
        report
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn advance_cursor(&mut self) -> Option<FinishReason> {
        self.cursor += 1;
        if self.cursor < self.timeline.trials.len() {
            return None;
        }
        if self.timeline.looping {
            self.cursor = 0;
            self.iteration += 1;
            info!("runner: timeline wrapped, iteration {}", self.iteration);
            return None;
        }
        self.finished = true;
        info!("runner: timeline exhausted");
        Some(FinishReason::Exhausted)
    }

    fn finish(&mut self) -> FinishReason {
        self.finished = true;
        self.active = None;
        if self.stop_requested {
            FinishReason::Stopped
        } else {
            FinishReason::Exhausted
        }
    }

    fn begin_trial(&mut self, now_us: u64) -> Result<()> {
        let definition = self
            .timeline
            .trials
            .get(self.cursor)
            .cloned()
            .ok_or(EngineError::InvalidState("trial cursor out of range"))?;
        let (config, interval) = definition.effective_config(&self.config)?;
        let plan = TrialPlan::draw(&config, interval, &mut self.rng);

        info!(
            "runner: trial {} '{}' ({}), ITI {} ms",
            self.cursor,
            definition.id,
            definition.kind.name(),
            plan.iti_us / 1000
        );

        let mut ctx = TrialContext::new(
            definition.id.clone(),
            definition.kind,
            plan,
            self.timebase,
            now_us,
        );
        let mut fsm = Fsm::for_trial();
        fsm.start(&mut ctx);

        self.active = Some(ActiveTrial {
            index: self.cursor,
            definition,
            fsm,
            ctx,
        });
        Ok(())
    }
}
