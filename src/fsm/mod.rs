//! Function-pointer finite state machine for a single trial.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable                                                  │
//! │  ┌────────────┬───────────┬──────────┬───────────────────┐   │
//! │  │ StateId    │ on_enter  │ on_exit  │ on_update         │   │
//! │  ├────────────┼───────────┼──────────┼───────────────────┤   │
//! │  │ Intertrial │ -         │ -        │ fn(ctx)->Option<> │   │
//! │  │ Cue        │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │   │
//! │  │ Hold       │ fn(ctx)   │ -        │ fn(ctx)->Option<> │   │
//! │  │ Response   │ -         │ -        │ fn(ctx)->Option<> │   │
//! │  │ Reward     │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │   │
//! │  │ Punish     │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │   │
//! │  │ Outcome    │ fn(ctx)   │ -        │ fn(ctx)->Option<> │   │
//! │  │ Complete   │ -         │ -        │ fn(ctx)->Option<> │   │
//! │  └────────────┴───────────┴──────────┴───────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** state.  If it
//! returns `Some(next_id)`, the engine runs `on_exit` for the current state,
//! then `on_enter` for the next, and immediately runs the new state's
//! `on_update` with the same inputs.  A tick therefore settles in one call
//! no matter how many windows expired since the last one; the chain is
//! bounded by the number of states.

pub mod context;
pub mod states;

use context::TrialContext;
use log::{debug, warn};
use serde::Serialize;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StateId {
    Intertrial = 0,
    Cue = 1,
    Hold = 2,
    Response = 3,
    Reward = 4,
    Punish = 5,
    Outcome = 6,
    Complete = 7,
}

impl StateId {
    pub const COUNT: usize = 8;

    /// Convert an index back to `StateId`.  Out-of-range indices assert in
    /// debug builds and map to `Complete` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Intertrial,
            1 => Self::Cue,
            2 => Self::Hold,
            3 => Self::Response,
            4 => Self::Reward,
            5 => Self::Punish,
            6 => Self::Outcome,
            7 => Self::Complete,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Complete
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut TrialContext);

/// Per-tick handler.  `Some(next)` requests a transition.
pub type StateUpdateFn = fn(&mut TrialContext) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// A fresh trial machine sitting in `Intertrial`.
    pub fn for_trial() -> Self {
        Self::new(states::build_state_table(), StateId::Intertrial)
    }

    /// Run the initial `on_enter` for the starting state.
    pub fn start(&mut self, ctx: &mut TrialContext) {
        debug!(
            "trial {}: FSM starting in state: {}",
            ctx.trial_id, self.table[self.current].name
        );
        ctx.entered_us = ctx.now_us;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance by one tick at `ctx.now_us`, following transitions until a
    /// state chooses to stay.
    pub fn tick(&mut self, ctx: &mut TrialContext) {
        for _ in 0..StateId::COUNT {
            match (self.table[self.current].on_update)(ctx) {
                Some(next) if next as usize != self.current => self.transition(next, ctx),
                _ => return,
            }
        }
        warn!(
            "trial {}: transition chain did not settle in one tick (stopped in {})",
            ctx.trial_id, self.table[self.current].name
        );
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    pub fn state_name(&self) -> &'static str {
        self.table[self.current].name
    }

    pub fn is_complete(&self) -> bool {
        self.current_state() == StateId::Complete
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut TrialContext) {
        let next_idx = next_id as usize;
        let at = ctx
            .transition_at
            .take()
            .map_or(ctx.now_us, |at| at.min(ctx.now_us));

        debug!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        ctx.entered_us = at;
        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
