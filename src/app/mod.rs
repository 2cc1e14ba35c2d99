//! Application core: pure engine logic, no direct I/O.
//!
//! The trial runner, session logger and event bus are orchestrated by
//! [`service::Engine`].  All interaction with GPIO, the filesystem and the
//! outside world goes through the **port traits** in [`ports`], keeping
//! this layer testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
