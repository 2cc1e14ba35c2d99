//! Inbound commands to the engine.
//!
//! These arrive from the communication interface (the console front-end,
//! or any other adapter holding a [`CommandSender`](crate::channels::CommandSender))
//! and are applied by [`Engine`](super::service::Engine) at tick boundaries.

use crate::io::Channel;
use crate::timeline::Timeline;

#[derive(Debug, Clone)]
pub enum Command {
    /// Begin a session.  `timeline` replaces the loaded timeline if given.
    StartExperiment {
        animal_id: String,
        timeline: Option<Timeline>,
    },

    /// Cooperative stop; the session finalizes at the next safe boundary.
    StopExperiment,

    /// Drive an output high for `duration_ms`, then low.
    TestOutput { channel: Channel, duration_ms: u64 },

    /// Wait up to `timeout_ms` for an activation edge on an input.
    TestInput { channel: Channel, timeout_ms: u64 },

    /// Validate and load a timeline for the next session.
    UploadTimeline(Timeline),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartExperiment { .. } => "start_experiment",
            Self::StopExperiment => "stop_experiment",
            Self::TestOutput { .. } => "test_output",
            Self::TestInput { .. } => "test_input",
            Self::UploadTimeline(_) => "upload_timeline",
        }
    }
}
