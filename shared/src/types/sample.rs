//! Sample row type
//!
//! One decoded `nvidia-smi` output line.

use crate::types::catalog::MetricCatalog;

/// Timestamp in milliseconds since the UNIX epoch
pub type TimestampMs = i64;

/// A parsed observation. `values[i]` belongs to catalog entry `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    /// Generation time reported by the sampling tool
    pub timestamp_ms: TimestampMs,

    /// One value per catalog metric, in catalog order
    pub values: Vec<f64>,
}

impl SampleRow {
    pub fn new(timestamp_ms: TimestampMs, values: Vec<f64>) -> Self {
        Self {
            timestamp_ms,
            values,
        }
    }

    /// Number of metric values carried by the row
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Look up a value by metric name
    pub fn value_of(&self, catalog: &MetricCatalog, name: &str) -> Option<f64> {
        catalog
            .index_of(name)
            .and_then(|i| self.values.get(i).copied())
    }
}
