//! Input/output wiring of each [`TrialKind`].
//!
//! The trial state machine is the same for every kind; only which edges
//! qualify in `Cue`, which count as the response, and which lights form the
//! cue differ.

use crate::io::Channel;
use crate::timeline::TrialKind;

/// What ends the `Response` state with a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRule {
    /// Release of the channel that qualified in `Cue`.
    ReleaseTrigger,
    /// Activation of any of these channels (priority tie-break applies).
    Press(&'static [Channel]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    /// Inputs whose activation qualifies during `Cue`, in priority order.
    pub triggers: &'static [Channel],
    pub response: ResponseRule,
    /// Outputs lit for the duration of `Cue`.
    pub cue_outputs: &'static [Channel],
}

const LEVERS: &[Channel] = &[Channel::LeftLever, Channel::RightLever];

impl TrialKind {
    /// `None` for interval trials, which never leave `Intertrial`.
    pub fn protocol(self) -> Option<Protocol> {
        let protocol = match self {
            Self::LeftLeverHold => Protocol {
                triggers: &[Channel::LeftLever],
                response: ResponseRule::ReleaseTrigger,
                cue_outputs: &[Channel::LeftLeverLight],
            },
            Self::RightLeverHold => Protocol {
                triggers: &[Channel::RightLever],
                response: ResponseRule::ReleaseTrigger,
                cue_outputs: &[Channel::RightLeverLight],
            },
            Self::LeverHold => Protocol {
                triggers: LEVERS,
                response: ResponseRule::ReleaseTrigger,
                cue_outputs: &[Channel::LeftLeverLight, Channel::RightLeverLight],
            },
            Self::NosePoke => Protocol {
                triggers: &[Channel::NosePort],
                response: ResponseRule::ReleaseTrigger,
                cue_outputs: &[Channel::NoseLight],
            },
            Self::NosePokeLever => Protocol {
                triggers: &[Channel::NosePort],
                response: ResponseRule::Press(LEVERS),
                cue_outputs: &[Channel::NoseLight],
            },
            Self::Interval => return None,
        };
        Some(protocol)
    }
}
