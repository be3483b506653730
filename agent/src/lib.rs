//! GPU Telemetry Agent Library
//!
//! Streams `nvidia-smi` samples into an in-memory buffer and pushes them to a
//! VictoriaMetrics bulk-import endpoint in fixed-size batches.
//!
//! NOTE: metrics are PUSHED to the destination; the agent opens no endpoint.

pub mod buffer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod shipper;

pub use config::Config;
pub use config::MalformedRowPolicy;
pub use error::AgentError;
pub use pipeline::{Pipeline, PipelineState, StreamReport};

use anyhow::{Context, Result};
use std::future::Future;
use tracing::info;

use shipper::VictoriaMetricsShipper;

/// Instance label from the hostname (or fallback to PID).
pub fn instance_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| format!("agent-{}", std::process::id()))
}

/// Run the agent until the sampler exits or `shutdown` resolves.
pub async fn run_agent<F>(config: Config, shutdown: F) -> Result<StreamReport>
where
    F: Future<Output = ()>,
{
    config.validate().context("Invalid configuration")?;

    let url = config.import_url();
    info!(
        "Sending remote metrics every {:.2} seconds (reading {} ms; batching {} samples per-send)",
        config.send_cadence().as_secs_f64(),
        config.interval_ms,
        config.batch_size
    );
    info!(
        "[{}] Created agent for sending GPU stats ({} metrics, job={}, instance={})",
        url,
        config.catalog.len(),
        config.job,
        config.instance
    );

    let shipper = VictoriaMetricsShipper::new(
        url,
        config.job.clone(),
        config.instance.clone(),
        config.request_timeout,
    )
    .context("Failed to build HTTP client")?;

    let report = Pipeline::new(config, shipper)
        .run(shutdown)
        .await
        .context("Telemetry pipeline failed")?;

    Ok(report)
}
