//! Prometheus metrics describing the agent's own activity

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Sampling ─────────────────────────────────────────────────────────────────

pub static SAMPLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("smisend_samples_total", "Sample rows recorded into the buffer").unwrap()
});

pub static ROWS_SKIPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "smisend_rows_skipped_total",
        "Malformed sampler rows skipped"
    )
    .unwrap()
});

// ── Buffer ───────────────────────────────────────────────────────────────────

pub static BUFFERED_SAMPLES: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "smisend_buffered_samples",
        "Samples currently waiting for an accepted send"
    )
    .unwrap()
});

pub static SAMPLES_EVICTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "smisend_samples_evicted_total",
        "Samples dropped from the buffer due to its cap"
    )
    .unwrap()
});

// ── Sends ────────────────────────────────────────────────────────────────────

pub static SEND_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "smisend_send_total",
        "Bulk-import sends by outcome",
        &["outcome"]
    )
    .unwrap()
});

pub static SEND_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "smisend_send_duration_seconds",
        "Bulk-import request latency",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
