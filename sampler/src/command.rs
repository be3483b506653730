//! nvidia-smi invocation
//!
//! For details of the fields and their meanings see `nvidia-smi --help-query-gpu`.

use smisend_shared::types::catalog::MetricCatalog;
use std::ffi::OsString;
use std::process::{Command, Stdio};
use tracing::debug;

/// Sampling tool looked up on `PATH` when none is configured
pub const DEFAULT_TOOL: &str = "nvidia-smi";

/// Trailing column carrying the generation time of each row
const TIMESTAMP_COLUMN: &str = "timestamp";

/// Continuous CSV sampling invocation for one catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerCommand {
    program: OsString,
    interval_ms: u64,
    query: String,
}

impl SamplerCommand {
    /// The query column list is taken from the catalog in catalog order.
    pub fn new(program: impl Into<OsString>, interval_ms: u64, catalog: &MetricCatalog) -> Self {
        Self {
            program: program.into(),
            interval_ms,
            query: format!("{},{}", catalog.query_columns(), TIMESTAMP_COLUMN),
        }
    }

    /// Arguments: loop every `interval_ms`, the ordered column query, and CSV
    /// output without units.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-lms".to_string(),
            self.interval_ms.to_string(),
            format!("--query-gpu={}", self.query),
            "--format=csv,nounits".to_string(),
        ]
    }

    /// A ready-to-spawn command with stdout piped and stdin closed.
    pub fn to_command(&self) -> Command {
        let args = self.args();
        debug!("Sampler command: {:?} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smisend_shared::types::catalog::FieldKind;

    #[test]
    fn test_args_follow_catalog_order() {
        let catalog = MetricCatalog::from_parts(
            &["temperature_gpu", "memory_used"],
            &["temperature.gpu", "memory.used"],
            &[FieldKind::Number, FieldKind::Number],
        )
        .unwrap();
        let command = SamplerCommand::new(DEFAULT_TOOL, 10, &catalog);

        assert_eq!(
            command.args(),
            vec![
                "-lms",
                "10",
                "--query-gpu=temperature.gpu,memory.used,timestamp",
                "--format=csv,nounits",
            ]
        );
        assert_eq!(command.to_command().get_program(), "nvidia-smi");
    }

    #[test]
    fn test_reference_query_has_one_column_per_metric() {
        let catalog = MetricCatalog::reference();
        let args = SamplerCommand::new(DEFAULT_TOOL, 250, &catalog).args();
        assert_eq!(args[1], "250");

        let query = args[2].strip_prefix("--query-gpu=").unwrap();
        let columns: Vec<&str> = query.split(',').collect();
        assert_eq!(columns.len(), catalog.len() + 1);
        assert_eq!(columns[0], "pstate");
        assert_eq!(columns[catalog.len()], "timestamp");
    }
}
