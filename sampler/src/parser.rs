//! CSV row parser
//!
//! Decodes one line of `nvidia-smi --format=csv,nounits` output into a
//! [`SampleRow`]. The decode table is built once from the catalog, so the
//! column at position `i` is always decoded by the rule of catalog entry `i`.

use smisend_shared::types::catalog::{FieldKind, MetricCatalog};
use smisend_shared::types::sample::SampleRow;
use smisend_shared::utils::time::{parse_smi_timestamp, TimestampError, TimestampZone};
use thiserror::Error;

/// A streamed line that does not match the expected layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRowError {
    #[error("expected {expected} fields, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("column {column} ({metric}): cannot decode '{value}': {reason}")]
    Field {
        column: usize,
        metric: String,
        value: String,
        reason: String,
    },

    #[error("timestamp column: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("row is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

type DecodeFn = fn(&str) -> Result<f64, String>;

fn decode_perf_state(raw: &str) -> Result<f64, String> {
    let digits = raw
        .strip_prefix('P')
        .ok_or_else(|| "performance state must look like P<digit>".to_string())?;
    digits
        .parse::<u8>()
        .map(f64::from)
        .map_err(|e| e.to_string())
}

fn decode_enabled(raw: &str) -> Result<f64, String> {
    Ok(if raw.contains("Enabled") { 1.0 } else { 0.0 })
}

fn decode_supported(raw: &str) -> Result<f64, String> {
    Ok(if raw.contains("Not") { 0.0 } else { 1.0 })
}

fn decode_number(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>().map_err(|e| e.to_string())
}

fn decoder_for(kind: FieldKind) -> DecodeFn {
    match kind {
        FieldKind::PerfState => decode_perf_state,
        FieldKind::Enabled => decode_enabled,
        FieldKind::Supported => decode_supported,
        FieldKind::Number => decode_number,
    }
}

/// Decode a single field according to its kind.
pub fn decode_field(kind: FieldKind, raw: &str) -> Result<f64, String> {
    decoder_for(kind)(raw.trim())
}

/// Stateless row decoder for one catalog.
#[derive(Debug, Clone)]
pub struct SampleParser {
    /// Decode function per column, in catalog order
    decoders: Vec<DecodeFn>,

    /// Metric names, for error reporting
    names: Vec<String>,

    zone: TimestampZone,
}

impl SampleParser {
    pub fn new(catalog: &MetricCatalog, zone: TimestampZone) -> Self {
        Self {
            decoders: catalog.specs().iter().map(|s| decoder_for(s.kind)).collect(),
            names: catalog.names().map(str::to_string).collect(),
            zone,
        }
    }

    /// Fields per row: one per metric plus the trailing timestamp
    pub fn expected_fields(&self) -> usize {
        self.decoders.len() + 1
    }

    /// Parse one data line.
    pub fn parse_line(&self, line: &str) -> Result<SampleRow, MalformedRowError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != self.expected_fields() {
            return Err(MalformedRowError::ColumnCount {
                expected: self.expected_fields(),
                found: fields.len(),
            });
        }

        let (timestamp, metric_fields) = fields
            .split_last()
            .ok_or(MalformedRowError::ColumnCount {
                expected: self.expected_fields(),
                found: 0,
            })?;

        let mut values = Vec::with_capacity(self.decoders.len());
        for (column, (raw, decode)) in metric_fields.iter().zip(&self.decoders).enumerate() {
            let value = decode(raw).map_err(|reason| MalformedRowError::Field {
                column,
                metric: self.names[column].clone(),
                value: raw.to_string(),
                reason,
            })?;
            values.push(value);
        }

        let timestamp_ms = parse_smi_timestamp(timestamp, self.zone)?;

        Ok(SampleRow::new(timestamp_ms, values))
    }

    /// Parse one data line as read from the pipe, before any UTF-8 check.
    pub fn parse_bytes(&self, line: &[u8]) -> Result<SampleRow, MalformedRowError> {
        self.parse_line(std::str::from_utf8(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use smisend_shared::types::catalog::MetricSpec;

    const REFERENCE_ROW: &str = "P2, Enabled, 71.52, 70.10, 72.03, 300.00, 300.00, 100.00, 300.00, \
        45, 50, 4096, 16384, 12288, 1410, 1215, \
        Not Active, Active, Not Active, Not Active, Not Active, Active, \
        Not Active, Not Active, Not Active, Not Active, 2024/01/01 00:00:00.000000";

    fn two_metric_catalog() -> MetricCatalog {
        MetricCatalog::from_parts(
            &["temperature_gpu", "memory_used"],
            &["temperature.gpu", "memory.used"],
            &[FieldKind::Number, FieldKind::Number],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_reference_row() {
        let catalog = MetricCatalog::reference();
        let parser = SampleParser::new(&catalog, TimestampZone::Utc);

        let row = parser.parse_line(REFERENCE_ROW).unwrap();
        assert_eq!(row.timestamp_ms, 1_704_067_200_000);
        assert_eq!(row.width(), 26);
        assert_eq!(row.value_of(&catalog, "pstate"), Some(2.0));
        assert_eq!(row.value_of(&catalog, "power_management"), Some(1.0));
        assert_eq!(row.value_of(&catalog, "power_draw"), Some(71.52));
        assert_eq!(row.value_of(&catalog, "memory_free"), Some(12288.0));
        assert_eq!(row.value_of(&catalog, "throttle_reasons_supported"), Some(0.0));
        assert_eq!(row.value_of(&catalog, "throttle_reasons_active"), Some(1.0));
        assert_eq!(row.value_of(&catalog, "throttle_reasons_hw_slowdown"), Some(1.0));
        assert_eq!(row.value_of(&catalog, "throttle_reasons_sync_boost"), Some(0.0));
    }

    #[test]
    fn test_two_metric_row() {
        let parser = SampleParser::new(&two_metric_catalog(), TimestampZone::Utc);
        let row = parser
            .parse_line("76, 4100, 2024/01/01 00:00:00.010000\n")
            .unwrap();
        assert_eq!(row, SampleRow::new(1_704_067_200_010, vec![76.0, 4100.0]));
    }

    #[test]
    fn test_column_count_mismatch() {
        let parser = SampleParser::new(&two_metric_catalog(), TimestampZone::Utc);
        assert_eq!(
            parser.parse_line("75, 2024/01/01 00:00:00.000000"),
            Err(MalformedRowError::ColumnCount {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            parser.parse_line("75, 4096, 1, 2024/01/01 00:00:00.000000"),
            Err(MalformedRowError::ColumnCount {
                expected: 3,
                found: 4
            })
        );
    }

    #[test]
    fn test_bad_number_names_metric() {
        let parser = SampleParser::new(&two_metric_catalog(), TimestampZone::Utc);
        match parser.parse_line("75, [N/A], 2024/01/01 00:00:00.000000") {
            Err(MalformedRowError::Field { column, metric, value, .. }) => {
                assert_eq!(column, 1);
                assert_eq!(metric, "memory_used");
                assert_eq!(value, "[N/A]");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_bad_timestamp() {
        let parser = SampleParser::new(&two_metric_catalog(), TimestampZone::Utc);
        assert!(matches!(
            parser.parse_line("75, 4096, not-a-time"),
            Err(MalformedRowError::Timestamp(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let parser = SampleParser::new(&two_metric_catalog(), TimestampZone::Utc);
        assert!(matches!(
            parser.parse_bytes(b"7\xff5, 4096, 2024/01/01 00:00:00.000000"),
            Err(MalformedRowError::Encoding(_))
        ));
        assert_eq!(
            parser.parse_bytes(b"75, 4096, 2024/01/01 00:00:00.000000\n"),
            Ok(SampleRow::new(1_704_067_200_000, vec![75.0, 4096.0]))
        );
    }

    #[test]
    fn test_perf_state_decode() {
        assert_eq!(decode_field(FieldKind::PerfState, "P0"), Ok(0.0));
        assert_eq!(decode_field(FieldKind::PerfState, " P8 "), Ok(8.0));
        assert_eq!(decode_field(FieldKind::PerfState, "P12"), Ok(12.0));
        assert!(decode_field(FieldKind::PerfState, "8").is_err());
        assert!(decode_field(FieldKind::PerfState, "P").is_err());
    }

    #[test]
    fn test_enabled_decode_is_substring() {
        assert_eq!(decode_field(FieldKind::Enabled, "Enabled"), Ok(1.0));
        assert_eq!(decode_field(FieldKind::Enabled, "[Enabled]"), Ok(1.0));
        assert_eq!(decode_field(FieldKind::Enabled, "Disabled"), Ok(0.0));
        assert_eq!(decode_field(FieldKind::Enabled, "[N/A]"), Ok(0.0));
    }

    #[test]
    fn test_throttle_reason_decode() {
        for text in ["Not Active", "Not Supported", "[Not Supported]"] {
            assert_eq!(decode_field(FieldKind::Supported, text), Ok(0.0), "{}", text);
        }
        for text in ["Active", "0x0000000000000004", "Supported"] {
            assert_eq!(decode_field(FieldKind::Supported, text), Ok(1.0), "{}", text);
        }
    }

    proptest! {
        /// Shuffling the catalog and the row columns the same way keeps every
        /// value attributed to its own metric.
        #[test]
        fn prop_columns_follow_catalog_order(
            (values, order) in proptest::collection::vec(0u32..100_000, 1..12)
                .prop_flat_map(|values| {
                    let order: Vec<usize> = (0..values.len()).collect();
                    (Just(values), Just(order).prop_shuffle())
                }),
        ) {
            let specs: Vec<MetricSpec> = (0..values.len())
                .map(|i| MetricSpec::new(format!("metric_{i}"), format!("query.{i}"), FieldKind::Number))
                .collect();

            let catalog = MetricCatalog::new(order.iter().map(|&i| specs[i].clone()).collect()).unwrap();
            let mut line: Vec<String> = order.iter().map(|&i| values[i].to_string()).collect();
            line.push("2024/01/01 00:00:00.000000".to_string());

            let parser = SampleParser::new(&catalog, TimestampZone::Utc);
            let row = parser.parse_line(&line.join(", ")).unwrap();

            for (i, value) in values.iter().enumerate() {
                prop_assert_eq!(row.value_of(&catalog, &format!("metric_{i}")), Some(*value as f64));
            }
            let expected_query: Vec<String> = order.iter().map(|&i| format!("query.{i}")).collect();
            prop_assert_eq!(catalog.query_columns(), expected_query.join(","));
        }

        #[test]
        fn prop_not_always_decodes_to_zero(prefix in "[a-zA-Z ]{0,8}", suffix in "[a-zA-Z ]{0,8}") {
            let text = format!("{prefix}Not{suffix}");
            prop_assert_eq!(decode_field(FieldKind::Supported, &text), Ok(0.0));
        }
    }
}
