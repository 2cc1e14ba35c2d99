//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`EngineEvent`] as one tagged
//! line through the `log` facade.  A dashboard or network adapter would
//! implement the same trait.

use log::{debug, error, info, warn};

use crate::app::events::EngineEvent;
use crate::app::ports::EventSink;
use crate::events::BusEvent;

/// Adapter that logs every [`EngineEvent`] to the console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::TimelineLoaded { name, trials } => {
                info!("TIMELINE | loaded '{}' ({} trials)", name, trials);
            }
            EngineEvent::SessionStarted {
                animal_id,
                seed,
                simulated,
            } => {
                info!(
                    "SESSION | started animal={} seed={} mode={}",
                    animal_id,
                    seed,
                    if *simulated { "simulated" } else { "hardware" }
                );
            }
            EngineEvent::TrialStarted { index, trial_id } => {
                info!("TRIAL | #{} '{}' started", index, trial_id);
            }
            EngineEvent::TrialCompleted {
                index,
                trial_id,
                outcome,
            } => {
                info!("TRIAL | #{} '{}' -> {}", index, trial_id, outcome.name());
            }
            EngineEvent::SessionFinalized {
                path,
                trials,
                cause,
            } => match cause {
                Some(cause) => warn!(
                    "SESSION | aborted ({}), {} trials saved to {}",
                    cause,
                    trials,
                    path.display()
                ),
                None => info!("SESSION | {} trials saved to {}", trials, path.display()),
            },
            EngineEvent::SessionFailed(e) => {
                error!("SESSION | not saved: {} (journal kept)", e);
            }
            EngineEvent::CommandRejected { command, error } => {
                warn!("CMD | {} rejected: {}", command, error);
            }
            EngineEvent::Degraded(detail) => {
                warn!("IO | degraded: {}", detail);
            }
            EngineEvent::Recovered => {
                info!("IO | recovered");
            }
            EngineEvent::TrialNotRecorded { trial_id, error } => {
                error!("TRIAL | {} not recorded: {}", trial_id, error);
            }
            EngineEvent::PersistenceRetry { pending } => {
                warn!("SESSION | {} journal frame(s) pending retry", pending);
            }
            EngineEvent::Io(bus) => {
                let (dir, edge) = match bus {
                    BusEvent::Input(edge) => ("in", edge),
                    BusEvent::Output(edge) => ("out", edge),
                };
                debug!(
                    "IO | {} {}={} @{}us",
                    dir,
                    edge.channel.name(),
                    u8::from(edge.active),
                    edge.at_us
                );
            }
            EngineEvent::TestFinished { channel, passed } => {
                info!(
                    "TEST | {} {}",
                    channel.name(),
                    if *passed { "PASS" } else { "FAIL" }
                );
            }
        }
    }
}
