//! Default GPIO line assignments for the behavior box HAT.
//!
//! These seed [`PinMap::default`](crate::config::PinMap); a device config
//! can remap any of them.  BCM numbering.

// ---------------------------------------------------------------------------
// Inputs (active-low, internal pull-up)
// ---------------------------------------------------------------------------

/// Left lever microswitch.
pub const LEVER_LEFT_GPIO: u32 = 24;
/// Right lever microswitch.
pub const LEVER_RIGHT_GPIO: u32 = 23;
/// Nose-port IR beam.  Low while the beam is broken.
pub const NOSE_PORT_IR_GPIO: u32 = 17;

// ---------------------------------------------------------------------------
// Outputs (active-high)
// ---------------------------------------------------------------------------

/// Reward solenoid valve driver.
pub const WATER_VALVE_GPIO: u32 = 25;
/// Nose-port cue LED.
pub const NOSE_LIGHT_GPIO: u32 = 27;
pub const LEVER_LEFT_LIGHT_GPIO: u32 = 22;
pub const LEVER_RIGHT_LIGHT_GPIO: u32 = 26;

