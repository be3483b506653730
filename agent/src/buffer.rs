//! In-memory metric buffer
//!
//! Accumulates samples between sends: one shared timestamp sequence and one
//! value sequence per catalog metric, all index aligned. The buffer is owned
//! by the pipeline and is only cleared after the destination accepts a send,
//! so a rejected batch is retried as part of the next, larger one.

use smisend_shared::types::catalog::MetricCatalog;
use smisend_shared::types::sample::{SampleRow, TimestampMs};
use thiserror::Error;
use tracing::warn;

use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("row carries {found} values but the catalog has {expected} metrics")]
    WidthMismatch { expected: usize, found: usize },
}

#[derive(Debug)]
pub struct MetricBuffer {
    catalog: MetricCatalog,
    timestamps: Vec<TimestampMs>,
    /// `values[i]` belongs to catalog entry `i`
    values: Vec<Vec<f64>>,
    /// Oldest samples are evicted beyond this many (None = unbounded)
    max_samples: Option<usize>,
}

impl MetricBuffer {
    pub fn new(catalog: MetricCatalog) -> Self {
        let values = vec![Vec::new(); catalog.len()];
        Self {
            catalog,
            timestamps: Vec::new(),
            values,
            max_samples: None,
        }
    }

    /// Cap the number of buffered samples. Once exceeded, the oldest samples
    /// are dropped from every sequence together.
    pub fn with_max_samples(mut self, max_samples: Option<usize>) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Append one row. Returns the number of samples evicted to honour the cap.
    ///
    /// A row of the wrong width is rejected before anything is appended.
    pub fn record(&mut self, row: SampleRow) -> Result<usize, BufferError> {
        if row.width() != self.values.len() {
            return Err(BufferError::WidthMismatch {
                expected: self.values.len(),
                found: row.width(),
            });
        }

        self.timestamps.push(row.timestamp_ms);
        for (series, value) in self.values.iter_mut().zip(row.values) {
            series.push(value);
        }

        let evicted = self.evict_overflow();
        metrics::BUFFERED_SAMPLES.set(self.len() as f64);
        Ok(evicted)
    }

    fn evict_overflow(&mut self) -> usize {
        let Some(max) = self.max_samples else {
            return 0;
        };
        let excess = self.timestamps.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        self.timestamps.drain(..excess);
        for series in &mut self.values {
            series.drain(..excess);
        }

        warn!(
            "Buffer cap of {} samples reached, evicted {} oldest samples",
            max, excess
        );
        metrics::SAMPLES_EVICTED.inc_by(excess as f64);
        excess
    }

    /// Borrowed view of everything currently buffered.
    pub fn snapshot(&self) -> BufferSnapshot<'_> {
        BufferSnapshot {
            catalog: &self.catalog,
            timestamps: &self.timestamps,
            values: &self.values,
        }
    }

    /// Drop all buffered samples. Capacity is kept for the next batch.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        for series in &mut self.values {
            series.clear();
        }
        metrics::BUFFERED_SAMPLES.set(0.0);
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Read-only view of a [`MetricBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferSnapshot<'a> {
    catalog: &'a MetricCatalog,
    timestamps: &'a [TimestampMs],
    values: &'a [Vec<f64>],
}

impl<'a> BufferSnapshot<'a> {
    pub fn catalog(&self) -> &'a MetricCatalog {
        self.catalog
    }

    pub fn timestamps(&self) -> &'a [TimestampMs] {
        self.timestamps
    }

    /// `(metric name, values)` pairs in catalog order
    pub fn series(&self) -> impl Iterator<Item = (&'a str, &'a [f64])> + 'a {
        self.catalog
            .names()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smisend_shared::types::catalog::FieldKind;

    fn catalog() -> MetricCatalog {
        MetricCatalog::from_parts(
            &["temperature_gpu", "memory_used", "power_draw"],
            &["temperature.gpu", "memory.used", "power.draw"],
            &[FieldKind::Number; 3],
        )
        .unwrap()
    }

    fn row(i: i64) -> SampleRow {
        SampleRow::new(1_000 + i, vec![i as f64, (i * 10) as f64, (i * 100) as f64])
    }

    fn assert_aligned(buffer: &MetricBuffer, expected: usize) {
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), expected);
        assert_eq!(snapshot.timestamps().len(), expected);
        for (name, values) in snapshot.series() {
            assert_eq!(values.len(), expected, "series {}", name);
        }
    }

    #[test]
    fn test_record_keeps_alignment() {
        let mut buffer = MetricBuffer::new(catalog());
        assert!(buffer.is_empty());
        assert_aligned(&buffer, 0);

        for i in 0..250 {
            assert_eq!(buffer.record(row(i)), Ok(0));
            assert_aligned(&buffer, i as usize + 1);
        }
        assert_eq!(buffer.len(), 250);
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut buffer = MetricBuffer::new(catalog());
        for i in 0..3 {
            buffer.record(row(i)).unwrap();
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.timestamps(), &[1_000, 1_001, 1_002]);
        let series: Vec<_> = snapshot.series().collect();
        assert_eq!(series[0], ("temperature_gpu", &[0.0, 1.0, 2.0][..]));
        assert_eq!(series[1], ("memory_used", &[0.0, 10.0, 20.0][..]));
        assert_eq!(series[2], ("power_draw", &[0.0, 100.0, 200.0][..]));
    }

    #[test]
    fn test_width_mismatch_is_atomic() {
        let mut buffer = MetricBuffer::new(catalog());
        buffer.record(row(0)).unwrap();

        let err = buffer.record(SampleRow::new(5, vec![1.0])).unwrap_err();
        assert_eq!(err, BufferError::WidthMismatch { expected: 3, found: 1 });
        assert_aligned(&buffer, 1);
    }

    #[test]
    fn test_clear_empties_every_series() {
        let mut buffer = MetricBuffer::new(catalog());
        for i in 0..10 {
            buffer.record(row(i)).unwrap();
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert_aligned(&buffer, 0);

        buffer.record(row(42)).unwrap();
        assert_eq!(buffer.snapshot().timestamps(), &[1_042]);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut buffer = MetricBuffer::new(catalog()).with_max_samples(Some(4));
        for i in 0..4 {
            assert_eq!(buffer.record(row(i)).unwrap(), 0);
        }
        assert_eq!(buffer.record(row(4)).unwrap(), 1);
        assert_eq!(buffer.record(row(5)).unwrap(), 1);

        assert_aligned(&buffer, 4);
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.timestamps(), &[1_002, 1_003, 1_004, 1_005]);
        let (_, temps) = snapshot.series().next().unwrap();
        assert_eq!(temps, &[2.0, 3.0, 4.0, 5.0]);
    }
}
