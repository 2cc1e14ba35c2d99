//! Summary counts derived from the trial records.
//!
//! Always recomputed from scratch so the numbers cannot drift from the
//! event log they describe.

use serde::{Deserialize, Serialize};

use crate::session::model::{EventKind, Outcome, TrialRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub trial_count: usize,
    pub nose_pokes: usize,
    pub left_lever_presses: usize,
    pub right_lever_presses: usize,
    /// Number of `reward_triggered` events.
    pub water_deliveries: usize,

    // --- Outcomes ---
    pub successes: usize,
    pub no_responses: usize,
    pub premature_releases: usize,
    pub errors: usize,
    pub aborted: usize,
}

/// One O(n) pass over every event of every trial.
pub fn compute(trials: &[TrialRecord]) -> Statistics {
    let mut stats = Statistics {
        trial_count: trials.len(),
        ..Statistics::default()
    };
    for trial in trials {
        for event in &trial.events {
            match event.kind {
                EventKind::NosePortEntry => stats.nose_pokes += 1,
                EventKind::LeftLeverPress => stats.left_lever_presses += 1,
                EventKind::RightLeverPress => stats.right_lever_presses += 1,
                EventKind::RewardTriggered => stats.water_deliveries += 1,
                _ => {}
            }
        }
        match trial.trial_outcome {
            Outcome::Success => stats.successes += 1,
            Outcome::NoResponse => stats.no_responses += 1,
            Outcome::PrematureRelease => stats.premature_releases += 1,
            Outcome::Error => stats.errors += 1,
            Outcome::Aborted => stats.aborted += 1,
        }
    }
    stats
}
