//! Behavior box trial engine library.
//!
//! Exposes the engine, the trial state machine and the IO and storage
//! adapters for integration testing and for front-ends other than the
//! bundled console binary.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channels;
pub mod clock;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod fsm;
pub mod io;
pub mod pins;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod stats;
pub mod timeline;
