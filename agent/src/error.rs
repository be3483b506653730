//! Agent error types

use smisend_sampler::MalformedRowError;
use thiserror::Error;

use crate::buffer::BufferError;

/// Errors that end a streaming run.
///
/// Send failures are not here: they are absorbed into
/// [`SendOutcome::Rejected`](crate::shipper::SendOutcome) and retried by
/// accumulation.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to launch sampling tool '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sampling tool did not expose a stdout pipe")]
    NoStdout,

    #[error("malformed row at output line {line}: {source}")]
    MalformedRow {
        line: u64,
        #[source]
        source: MalformedRowError,
    },

    #[error("failed to read sampler output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}
