//! Concrete trial state handlers and table builder.
//!
//! Each state is three plain `fn` pointers; no closures, no dynamic
//! dispatch.  Which inputs qualify and which count as the response come
//! from the trial's [`Protocol`](crate::protocol::Protocol).
//!
//! ```text
//!  INTERTRIAL ──[iti elapsed]──▶ CUE ──[qualifying edge]──▶ HOLD
//!      │                          │                          │   │
//!   [interval]               [timeout]             [held] [early release]
//!      │                          │                   ▼          ▼
//!      │                          │              RESPONSE      PUNISH
//!      │                          │              │      │        │
//!      │                          │        [match]  [timeout]    │
//!      │                          │           ▼         │        │
//!      │                          │        REWARD       │        │
//!      ▼                          ▼           ▼         ▼        ▼
//!      └───────────────────────▶ OUTCOME ◀────────────────────────┘
//!                                    │
//!                                    ▼
//!                                COMPLETE
//!
//!  Waiting states ──[abort | fault]──▶ OUTCOME
//!  REWARD / PUNISH run their timer out first (fault excepted).
//! ```

use super::context::{OutputCommands, TrialContext};
use super::{StateDescriptor, StateId};
use crate::protocol::ResponseRule;
use crate::session::model::{EventKind, Outcome};
use crate::timeline::TrialKind;
use log::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Intertrial,
            name: "Intertrial",
            on_enter: None,
            on_exit: None,
            on_update: intertrial_update,
        },
        StateDescriptor {
            id: StateId::Cue,
            name: "Cue",
            on_enter: Some(cue_enter),
            on_exit: Some(cue_exit),
            on_update: cue_update,
        },
        StateDescriptor {
            id: StateId::Hold,
            name: "Hold",
            on_enter: Some(hold_enter),
            on_exit: None,
            on_update: hold_update,
        },
        StateDescriptor {
            id: StateId::Response,
            name: "Response",
            on_enter: None,
            on_exit: None,
            on_update: response_update,
        },
        StateDescriptor {
            id: StateId::Reward,
            name: "Reward",
            on_enter: Some(reward_enter),
            on_exit: Some(reward_exit),
            on_update: reward_update,
        },
        StateDescriptor {
            id: StateId::Punish,
            name: "Punish",
            on_enter: Some(punish_enter),
            on_exit: Some(punish_exit),
            on_update: punish_update,
        },
        StateDescriptor {
            id: StateId::Outcome,
            name: "Outcome",
            on_enter: Some(outcome_enter),
            on_exit: None,
            on_update: outcome_update,
        },
        StateDescriptor {
            id: StateId::Complete,
            name: "Complete",
            on_enter: None,
            on_exit: None,
            on_update: complete_update,
        },
    ]
}

/// Guard shared by the waiting states: a fault or a stop request ends the
/// trial at this boundary.
fn interrupted(ctx: &mut TrialContext) -> Option<StateId> {
    if let Some(fault) = &ctx.fault {
        warn!("trial {}: sealing as error ({fault})", ctx.trial_id);
        ctx.outcome = Some(Outcome::Error);
        return Some(StateId::Outcome);
    }
    if ctx.abort_requested {
        info!("trial {}: stop requested, aborting", ctx.trial_id);
        ctx.outcome = Some(Outcome::Aborted);
        return Some(StateId::Outcome);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  INTERTRIAL
// ═══════════════════════════════════════════════════════════════════════════

fn intertrial_update(ctx: &mut TrialContext) -> Option<StateId> {
    if let Some(next) = interrupted(ctx) {
        return Some(next);
    }

    let deadline = ctx.entered_us.saturating_add(ctx.plan.iti_us);
    if ctx.now_us < deadline {
        return None;
    }

    ctx.mark_started(deadline);
    ctx.stamp_transition(deadline);
    if ctx.kind == TrialKind::Interval {
        ctx.outcome = Some(Outcome::Success);
        return Some(StateId::Outcome);
    }
    Some(StateId::Cue)
}

// ═══════════════════════════════════════════════════════════════════════════
//  CUE: cue outputs lit, waiting for a qualifying edge
// ═══════════════════════════════════════════════════════════════════════════

fn cue_enter(ctx: &mut TrialContext) {
    ctx.commands.cue = true;
    ctx.log_event(EventKind::CueOnset, ctx.entered_us);
    info!(
        "trial {}: CUE for up to {} ms",
        ctx.trial_id,
        ctx.plan.cue_window_us / 1000
    );
}

fn cue_exit(ctx: &mut TrialContext) {
    ctx.commands.cue = false;
    ctx.log_event(EventKind::CueOffset, ctx.entered_us);
}

fn cue_update(ctx: &mut TrialContext) -> Option<StateId> {
    if let Some(next) = interrupted(ctx) {
        return Some(next);
    }
    let protocol = ctx.protocol?;

    let deadline = ctx.entered_us.saturating_add(ctx.plan.cue_window_us);
    if let Some(edge) = ctx.winning_edge(protocol.triggers, true, ctx.entered_us, deadline) {
        ctx.trigger = Some((edge.channel, edge.at_us));
        ctx.stamp_transition(edge.at_us);
        return Some(StateId::Hold);
    }

    if ctx.now_us >= deadline {
        ctx.log_event(EventKind::CueTimeout, deadline);
        ctx.outcome = Some(Outcome::NoResponse);
        ctx.stamp_transition(deadline);
        return Some(StateId::Outcome);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  HOLD: the qualifying input must stay active
// ═══════════════════════════════════════════════════════════════════════════

fn hold_enter(ctx: &mut TrialContext) {
    let start = ctx.trigger.map_or(ctx.entered_us, |(_, at)| at);
    ctx.hold_end_us = start.saturating_add(ctx.plan.hold_us);
}

fn hold_update(ctx: &mut TrialContext) -> Option<StateId> {
    if let Some(next) = interrupted(ctx) {
        return Some(next);
    }
    let Some((held, since)) = ctx.trigger else {
        ctx.fault = Some("hold entered without a trigger".into());
        return interrupted(ctx);
    };

    if let Some(edge) = ctx.winning_edge(&[held], false, since, ctx.hold_end_us) {
        info!(
            "trial {}: {} released after {} ms",
            ctx.trial_id,
            held.name(),
            (edge.at_us - since) / 1000
        );
        ctx.outcome = Some(Outcome::PrematureRelease);
        ctx.stamp_transition(edge.at_us);
        return Some(StateId::Punish);
    }

    if ctx.now_us >= ctx.hold_end_us {
        ctx.log_event(EventKind::HoldComplete, ctx.hold_end_us);
        ctx.stamp_transition(ctx.hold_end_us);
        return Some(StateId::Response);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESPONSE: waiting for the designated response
// ═══════════════════════════════════════════════════════════════════════════

fn response_update(ctx: &mut TrialContext) -> Option<StateId> {
    if let Some(next) = interrupted(ctx) {
        return Some(next);
    }
    let protocol = ctx.protocol?;

    let opens = ctx.hold_end_us;

    // Debounced edges arrive up to a settle window plus a tick after they
    // happened, so a release from before the hold ended can show up here.
    if let Some((held, since)) = ctx.trigger {
        if let Some(edge) = ctx.winning_edge(&[held], false, since, opens) {
            info!(
                "trial {}: {} release at {} us reached us after the hold ended",
                ctx.trial_id,
                held.name(),
                edge.at_us
            );
            ctx.retract_last(EventKind::HoldComplete);
            ctx.outcome = Some(Outcome::PrematureRelease);
            ctx.stamp_transition(ctx.now_us);
            return Some(StateId::Punish);
        }
    }

    let deadline = opens.saturating_add(ctx.plan.response_limit_us);
    let matched = match protocol.response {
        ResponseRule::ReleaseTrigger => ctx
            .trigger
            .and_then(|(held, _)| ctx.winning_edge(&[held], false, opens, deadline)),
        ResponseRule::Press(channels) => ctx.winning_edge(channels, true, opens, deadline),
    };

    if let Some(edge) = matched {
        ctx.outcome = Some(Outcome::Success);
        ctx.stamp_transition(edge.at_us);
        return Some(StateId::Reward);
    }

    if ctx.now_us >= deadline {
        ctx.log_event(EventKind::ResponseTimeout, deadline);
        ctx.outcome = Some(Outcome::NoResponse);
        ctx.stamp_transition(deadline);
        return Some(StateId::Outcome);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  REWARD: valve open for `valve_open`
// ═══════════════════════════════════════════════════════════════════════════

fn reward_enter(ctx: &mut TrialContext) {
    ctx.commands.reward = true;
    ctx.log_event(EventKind::RewardTriggered, ctx.entered_us);
    info!(
        "trial {}: REWARD, valve open {} ms",
        ctx.trial_id,
        ctx.plan.valve_open_us / 1000
    );
}

fn reward_exit(ctx: &mut TrialContext) {
    ctx.commands.reward = false;
    ctx.log_event(EventKind::WaterDeliveryComplete, ctx.entered_us);
}

fn reward_update(ctx: &mut TrialContext) -> Option<StateId> {
    let duration = ctx.plan.valve_open_us;
    timed_actuation(ctx, duration)
}

// ═══════════════════════════════════════════════════════════════════════════
//  PUNISH: punish signal for `punish_time`
// ═══════════════════════════════════════════════════════════════════════════

fn punish_enter(ctx: &mut TrialContext) {
    ctx.commands.punish = true;
    ctx.log_event(EventKind::PunishOnset, ctx.entered_us);
}

fn punish_exit(ctx: &mut TrialContext) {
    ctx.commands.punish = false;
    ctx.log_event(EventKind::PunishComplete, ctx.entered_us);
}

fn punish_update(ctx: &mut TrialContext) -> Option<StateId> {
    let duration = ctx.plan.punish_us;
    timed_actuation(ctx, duration)
}

/// An actuation is never cut short by a stop request; only a fault ends it
/// early.
fn timed_actuation(ctx: &mut TrialContext, duration_us: u64) -> Option<StateId> {
    if ctx.fault.is_some() {
        return interrupted(ctx);
    }
    let done = ctx.entered_us.saturating_add(duration_us);
    if ctx.now_us >= done {
        ctx.stamp_transition(done);
        return Some(StateId::Outcome);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  OUTCOME / COMPLETE
// ═══════════════════════════════════════════════════════════════════════════

fn outcome_enter(ctx: &mut TrialContext) {
    ctx.commands = OutputCommands::all_off();
    if ctx.started {
        ctx.log_event(EventKind::TrialEnd, ctx.entered_us);
    }
    ctx.seal();
    if let Some(outcome) = ctx.outcome {
        info!("trial {}: outcome {}", ctx.trial_id, outcome.name());
    }
}

fn outcome_update(_ctx: &mut TrialContext) -> Option<StateId> {
    Some(StateId::Complete)
}

fn complete_update(_ctx: &mut TrialContext) -> Option<StateId> {
    None
}
