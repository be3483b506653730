//! Configuration types for the telemetry agent

use anyhow::Context;
use serde::Deserialize;
use smisend_sampler::DEFAULT_TOOL;
use smisend_shared::types::catalog::{MetricCatalog, MetricSpec};
use smisend_shared::utils::time::TimestampZone;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://localhost:8428";
pub const DEFAULT_INTERVAL_MS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_JOB: &str = "nvidia-smi";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// VictoriaMetrics bulk-import path, relative to the host
const IMPORT_PATH: &str = "/api/v1/import";

/// What to do with a row that fails to decode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedRowPolicy {
    /// End the stream with an error
    #[default]
    Fail,
    /// Log the row, count it and keep streaming
    Skip,
}

impl std::str::FromStr for MalformedRowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(MalformedRowPolicy::Fail),
            "skip" => Ok(MalformedRowPolicy::Skip),
            _ => anyhow::bail!("Invalid malformed row policy: {}", s),
        }
    }
}

/// Agent configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination base URL (e.g. http://localhost:8428)
    pub host: String,

    /// Sampling interval handed to `nvidia-smi -lms`
    pub interval_ms: u64,

    /// Samples per send
    pub batch_size: u64,

    /// `job` label on every shipped series
    pub job: String,

    /// `instance` label on every shipped series
    pub instance: String,

    /// Sampling tool to launch
    pub tool: String,

    /// Metrics to sample, in query column order
    pub catalog: MetricCatalog,

    pub on_malformed: MalformedRowPolicy,

    /// Cap on buffered samples while the destination is unavailable (None = unbounded)
    pub max_buffered_samples: Option<usize>,

    /// Zone the sampler's timestamps are printed in
    pub timestamp_zone: TimestampZone,

    /// HTTP request timeout for a single send
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            interval_ms: DEFAULT_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            job: DEFAULT_JOB.to_string(),
            instance: crate::instance_id(),
            tool: DEFAULT_TOOL.to_string(),
            catalog: MetricCatalog::reference(),
            on_malformed: MalformedRowPolicy::Fail,
            max_buffered_samples: None,
            timestamp_zone: TimestampZone::Local,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Full bulk-import URL
    pub fn import_url(&self) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), IMPORT_PATH)
    }

    /// Time between sends when every sample arrives on schedule
    pub fn send_cadence(&self) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(self.batch_size))
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_ms == 0 {
            anyhow::bail!("Sampling interval must be greater than 0 ms");
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            anyhow::bail!("Host must be an http:// or https:// URL: {}", self.host);
        }

        if self.job.trim().is_empty() || self.instance.trim().is_empty() {
            anyhow::bail!("Job and instance labels must not be empty");
        }

        if let Some(max) = self.max_buffered_samples {
            if (max as u64) < self.batch_size {
                anyhow::bail!(
                    "Buffer cap ({}) must be at least the batch size ({})",
                    max,
                    self.batch_size
                );
            }
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        Ok(())
    }
}

/// On-disk catalog layout: an ordered list of `[[metric]]` tables.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    metric: Vec<MetricSpec>,
}

/// Parse a TOML catalog.
pub fn parse_catalog(contents: &str) -> anyhow::Result<MetricCatalog> {
    let file: CatalogFile = toml::from_str(contents).context("Failed to parse catalog")?;
    MetricCatalog::new(file.metric).context("Invalid catalog")
}

/// Load a TOML catalog from disk.
pub fn load_catalog(path: &Path) -> anyhow::Result<MetricCatalog> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    parse_catalog(&contents).with_context(|| format!("In catalog file {}", path.display()))
}
