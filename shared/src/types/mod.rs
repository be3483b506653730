//! Data types shared between the sampler and the agent

pub mod catalog;
pub mod sample;
