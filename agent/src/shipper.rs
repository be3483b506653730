//! Batch shipper
//!
//! Serializes a buffer snapshot into the VictoriaMetrics JSON-line import
//! format and POSTs it in a single request. There is no retry here: a
//! rejected send leaves the buffer untouched and the samples go out with the
//! next batch.
//!
//! <https://docs.victoriametrics.com/Single-server-VictoriaMetrics.html#how-to-import-data-in-json-line-format>

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::BufferSnapshot;
use crate::metrics;

/// Why a send was not accepted.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("destination responded with HTTP {0}")]
    Status(StatusCode),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SendError {
    fn label(&self) -> &'static str {
        match self {
            SendError::Transport(_) => "rejected_transport",
            SendError::Status(_) => "rejected_status",
            SendError::Encode(_) => "rejected_encode",
        }
    }
}

/// Result of a single send attempt
#[derive(Debug)]
pub enum SendOutcome {
    Accepted,
    Rejected(SendError),
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted)
    }
}

/// Destination for buffered batches.
///
/// Implementations never fail loudly: every problem is reported as
/// [`SendOutcome::Rejected`].
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send(&self, batch: BufferSnapshot<'_>) -> SendOutcome;
}

#[derive(Serialize)]
struct SeriesLabels<'a> {
    #[serde(rename = "__name__")]
    name: &'a str,
    job: &'a str,
    instance: &'a str,
}

#[derive(Serialize)]
struct ImportSeries<'a> {
    metric: SeriesLabels<'a>,
    values: &'a [f64],
    timestamps: &'a [i64],
}

/// Encode a snapshot as newline-separated JSON documents, one per catalog
/// metric. The import endpoint needs JSON lines, not a JSON array.
pub fn encode_ndjson(
    batch: &BufferSnapshot<'_>,
    job: &str,
    instance: &str,
) -> Result<Vec<u8>, serde_json::Error> {
    let timestamps = batch.timestamps();
    // ~16 bytes per number plus labels
    let mut buf = Vec::with_capacity(batch.catalog().len() * (timestamps.len() * 32 + 128));

    for (i, (name, values)) in batch.series().enumerate() {
        if i > 0 {
            buf.push(b'\n');
        }
        let series = ImportSeries {
            metric: SeriesLabels {
                name,
                job,
                instance,
            },
            values,
            timestamps,
        };
        serde_json::to_writer(&mut buf, &series)?;
    }

    Ok(buf)
}

/// HTTP shipper for a VictoriaMetrics `/api/v1/import` endpoint
pub struct VictoriaMetricsShipper {
    client: reqwest::Client,
    url: String,
    job: String,
    instance: String,
}

impl VictoriaMetricsShipper {
    pub fn new(
        url: impl Into<String>,
        job: impl Into<String>,
        instance: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            job: job.into(),
            instance: instance.into(),
        })
    }

    async fn post(&self, batch: &BufferSnapshot<'_>) -> Result<(), SendError> {
        let body = encode_ndjson(batch, &self.job, &self.instance)?;

        info!(
            "[metrics {}, batch size {}] Sending metrics...",
            batch.catalog().len(),
            batch.len()
        );

        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(SendError::Transport)?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        // VictoriaMetrics answers 204; some proxies answer 200.
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(SendError::Status(status))
        }
    }
}

#[async_trait]
impl BatchSink for VictoriaMetricsShipper {
    async fn send(&self, batch: BufferSnapshot<'_>) -> SendOutcome {
        let started = Instant::now();
        let result = self.post(&batch).await;
        metrics::SEND_DURATION.observe(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                metrics::SEND_TOTAL.with_label_values(&["accepted"]).inc();
                debug!("Destination accepted {} samples", batch.len());
                SendOutcome::Accepted
            }
            Err(e) => {
                metrics::SEND_TOTAL.with_label_values(&[e.label()]).inc();
                warn!("Sending failed? {}", e);
                SendOutcome::Rejected(e)
            }
        }
    }
}
