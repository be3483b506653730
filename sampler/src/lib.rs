//! GPU sampling
//!
//! Builds the `nvidia-smi` invocation for a metric catalog and decodes the
//! CSV rows it streams back.

pub mod command;
pub mod parser;

pub use command::{SamplerCommand, DEFAULT_TOOL};
pub use parser::{MalformedRowError, SampleParser};
