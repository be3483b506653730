//! Metric catalog
//!
//! The catalog is the ordered list of metrics an agent samples. Its order is
//! the single source of truth for three things that must agree: the columns
//! requested from `nvidia-smi`, the column order a CSV row is decoded in, and
//! the series the agent ships.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while building a catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog is empty")]
    Empty,

    #[error("catalog lists {names} metric names but {columns} query columns")]
    LengthMismatch { names: usize, columns: usize },

    #[error("catalog lists {names} metric names but {kinds} field kinds")]
    KindMismatch { names: usize, kinds: usize },

    #[error("duplicate metric name '{0}'")]
    DuplicateName(String),

    #[error("metric at position {0} has an empty name or query column")]
    BlankEntry(usize),
}

/// How a single CSV field is turned into a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Performance state such as `P2`, decoded to its digits.
    PerfState,
    /// Management flag: 1 when the text contains `Enabled`.
    Enabled,
    /// Throttle reason: 0 when the text contains `Not`, otherwise 1.
    Supported,
    /// Plain floating point value with units already stripped.
    #[default]
    Number,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Series name shipped as `__name__`
    pub name: String,

    /// Column passed to `nvidia-smi --query-gpu`
    pub query: String,

    /// Decode rule for the column
    #[serde(default)]
    pub kind: FieldKind,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, query: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            kind,
        }
    }
}

/// Reference metric set: (series name, nvidia-smi column, decode rule).
const REFERENCE_METRICS: [(&str, &str, FieldKind); 26] = [
    ("pstate", "pstate", FieldKind::PerfState),
    ("power_management", "power.management", FieldKind::Enabled),
    ("power_draw", "power.draw", FieldKind::Number),
    ("power_draw_average", "power.draw.average", FieldKind::Number),
    ("power_draw_instant", "power.draw.instant", FieldKind::Number),
    ("power_limit", "power.limit", FieldKind::Number),
    ("power_default_limit", "power.default_limit", FieldKind::Number),
    ("power_min_limit", "power.min_limit", FieldKind::Number),
    ("power_max_limit", "power.max_limit", FieldKind::Number),
    ("temperature_gpu", "temperature.gpu", FieldKind::Number),
    ("temperature_memory", "temperature.memory", FieldKind::Number),
    ("memory_used", "memory.used", FieldKind::Number),
    ("memory_total", "memory.total", FieldKind::Number),
    ("memory_free", "memory.free", FieldKind::Number),
    ("current_clocks", "clocks.current.sm", FieldKind::Number),
    ("current_memory_clocks", "clocks.current.memory", FieldKind::Number),
    (
        "throttle_reasons_supported",
        "clocks_throttle_reasons.supported",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_active",
        "clocks_throttle_reasons.active",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_gpu_idle",
        "clocks_throttle_reasons.gpu_idle",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_applications_clocks_setting",
        "clocks_throttle_reasons.applications_clocks_setting",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_sw_power_cap",
        "clocks_throttle_reasons.sw_power_cap",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_hw_slowdown",
        "clocks_throttle_reasons.hw_slowdown",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_hw_thermal_slowdown",
        "clocks_throttle_reasons.hw_thermal_slowdown",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_hw_power_brake_slowdown",
        "clocks_throttle_reasons.hw_power_brake_slowdown",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_sw_thermal_slowdown",
        "clocks_throttle_reasons.sw_thermal_slowdown",
        FieldKind::Supported,
    ),
    (
        "throttle_reasons_sync_boost",
        "clocks_throttle_reasons.sync_boost",
        FieldKind::Supported,
    ),
];

/// Immutable, validated, ordered list of metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    specs: Vec<MetricSpec>,
}

impl MetricCatalog {
    /// Build a catalog from entries, rejecting empty catalogs, blank entries
    /// and duplicate names.
    pub fn new(specs: Vec<MetricSpec>) -> Result<Self, CatalogError> {
        if specs.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() || spec.query.trim().is_empty() {
                return Err(CatalogError::BlankEntry(i));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(CatalogError::DuplicateName(spec.name.clone()));
            }
        }

        Ok(Self { specs })
    }

    /// Build a catalog from parallel name / query / kind lists.
    ///
    /// The three lists are correlated by position, so any length mismatch
    /// is an error.
    pub fn from_parts<N, Q>(names: &[N], queries: &[Q], kinds: &[FieldKind]) -> Result<Self, CatalogError>
    where
        N: AsRef<str>,
        Q: AsRef<str>,
    {
        if names.len() != queries.len() {
            return Err(CatalogError::LengthMismatch {
                names: names.len(),
                columns: queries.len(),
            });
        }
        if names.len() != kinds.len() {
            return Err(CatalogError::KindMismatch {
                names: names.len(),
                kinds: kinds.len(),
            });
        }

        let specs = names
            .iter()
            .zip(queries)
            .zip(kinds)
            .map(|((name, query), kind)| MetricSpec::new(name.as_ref(), query.as_ref(), *kind))
            .collect();

        Self::new(specs)
    }

    /// The 26-metric reference catalog.
    pub fn reference() -> Self {
        Self {
            specs: REFERENCE_METRICS
                .iter()
                .map(|(name, query, kind)| MetricSpec::new(*name, *query, *kind))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[MetricSpec] {
        &self.specs
    }

    /// Metric names in catalog order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Position of a metric by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    /// Comma-joined query columns in catalog order, as `--query-gpu` expects.
    pub fn query_columns(&self) -> String {
        self.specs
            .iter()
            .map(|s| s.query.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_catalog_is_valid() {
        let catalog = MetricCatalog::reference();
        assert_eq!(catalog.len(), 26);
        assert_eq!(MetricCatalog::new(catalog.specs().to_vec()), Ok(catalog.clone()));
        assert_eq!(catalog.index_of("pstate"), Some(0));
        assert_eq!(catalog.index_of("throttle_reasons_sync_boost"), Some(25));
        assert_eq!(catalog.index_of("fan_speed"), None);
    }

    #[test]
    fn test_query_columns_follow_catalog_order() {
        let catalog = MetricCatalog::reference();
        let columns = catalog.query_columns();
        assert!(columns.starts_with("pstate,power.management,power.draw,"));
        assert!(columns.ends_with("clocks_throttle_reasons.sync_boost"));
        assert_eq!(columns.split(',').count(), catalog.len());
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        let err = MetricCatalog::from_parts(
            &["temperature_gpu", "memory_used"],
            &["temperature.gpu"],
            &[FieldKind::Number, FieldKind::Number],
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::LengthMismatch { names: 2, columns: 1 });

        let err = MetricCatalog::from_parts(
            &["temperature_gpu"],
            &["temperature.gpu"],
            &[FieldKind::Number, FieldKind::Number],
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::KindMismatch { names: 1, kinds: 2 });
    }

    #[test]
    fn test_rejects_duplicates_and_blanks() {
        let dup = vec![
            MetricSpec::new("memory_used", "memory.used", FieldKind::Number),
            MetricSpec::new("memory_used", "memory.total", FieldKind::Number),
        ];
        assert_eq!(
            MetricCatalog::new(dup),
            Err(CatalogError::DuplicateName("memory_used".to_string()))
        );

        let blank = vec![MetricSpec::new("memory_used", " ", FieldKind::Number)];
        assert_eq!(MetricCatalog::new(blank), Err(CatalogError::BlankEntry(0)));

        assert_eq!(MetricCatalog::new(Vec::new()), Err(CatalogError::Empty));
    }
}
