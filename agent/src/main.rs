//! GPU Telemetry Agent
//!
//! Main entry point: runs `nvidia-smi` in CSV streaming mode and pushes its
//! samples to a VictoriaMetrics server.

use anyhow::Result;
use clap::Parser;
use smisend_agent::config::{self, Config, MalformedRowPolicy};
use smisend_agent::{metrics, run_agent};
use smisend_shared::utils::time::TimestampZone;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "smisend-agent")]
#[command(about = "Push nvidia-smi GPU statistics to VictoriaMetrics", long_about = None)]
#[command(version)]
struct Args {
    /// Destination base URL
    #[arg(long, env = "SMISEND_HOST", default_value = config::DEFAULT_HOST)]
    host: String,

    /// Sampling interval in milliseconds
    #[arg(long, env = "SMISEND_MS", default_value_t = config::DEFAULT_INTERVAL_MS,
          value_parser = clap::value_parser!(u64).range(1..))]
    ms: u64,

    /// Samples collected per send
    #[arg(long, env = "SMISEND_BATCH_SIZE", default_value_t = config::DEFAULT_BATCH_SIZE,
          value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// `job` label attached to every series
    #[arg(long, env = "SMISEND_JOB", default_value = config::DEFAULT_JOB)]
    job: String,

    /// `instance` label attached to every series (default: hostname)
    #[arg(long, env = "SMISEND_INSTANCE")]
    instance: Option<String>,

    /// Sampling tool to run
    #[arg(long, env = "SMISEND_TOOL", default_value = smisend_sampler::DEFAULT_TOOL)]
    tool: String,

    /// TOML file listing the metrics to sample (default: built-in 26-metric set)
    #[arg(long, env = "SMISEND_CATALOG")]
    catalog: Option<PathBuf>,

    /// What to do with a row that cannot be decoded: fail or skip
    #[arg(long, env = "SMISEND_ON_MALFORMED", default_value = "fail")]
    on_malformed: MalformedRowPolicy,

    /// Evict the oldest samples beyond this many while the destination is down
    #[arg(long, env = "SMISEND_MAX_BUFFERED_SAMPLES")]
    max_buffered_samples: Option<usize>,

    /// Zone of the sampler's timestamps: local or utc
    #[arg(long, env = "SMISEND_TIMESTAMP_ZONE", default_value = "local")]
    timestamp_zone: TimestampZone,

    /// HTTP request timeout in seconds
    #[arg(long, env = "SMISEND_TIMEOUT_SECS", default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!("{}", e))?;

    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.verbose, args.json_logs)?;

    info!("Starting GPU telemetry agent");
    debug!("Configuration: {:?}", args);

    let catalog = match &args.catalog {
        Some(path) => config::load_catalog(path)?,
        None => smisend_shared::types::catalog::MetricCatalog::reference(),
    };

    let config = Config {
        host: args.host,
        interval_ms: args.ms,
        batch_size: args.batch_size,
        job: args.job,
        instance: args.instance.unwrap_or_else(smisend_agent::instance_id),
        tool: args.tool,
        catalog,
        on_malformed: args.on_malformed,
        max_buffered_samples: args.max_buffered_samples,
        timestamp_zone: args.timestamp_zone,
        request_timeout: Duration::from_secs(args.timeout_secs),
    };

    let report = run_agent(config, shutdown_signal()?).await?;

    info!(
        "Stopped: {} samples recorded, {} sends accepted, {} rejected, {} rows skipped",
        report.samples, report.sends_accepted, report.sends_rejected, report.skipped
    );
    if report.unflushed > 0 {
        warn!("{} samples were not delivered", report.unflushed);
    }
    debug!("Agent metrics:\n{}", metrics::encode_metrics());

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

/// Resolves on the first Ctrl-C or SIGTERM.
///
/// Handlers are installed before streaming starts so a signal that arrives
/// during a send is not lost.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
        }
    })
}
