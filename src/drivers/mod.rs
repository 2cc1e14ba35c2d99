//! Input conditioning: contact debouncing and the sampling loop.

pub mod debounce;
pub mod sampler;
