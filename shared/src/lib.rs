//! Shared types and utilities for smisend
//!
//! This crate contains the metric catalog, the sample row type and the
//! timestamp helpers used by the sampler and the agent.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{catalog::*, sample::*};
