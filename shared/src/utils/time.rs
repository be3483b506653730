//! Time-related utilities

use chrono::{LocalResult, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::sample::TimestampMs;

/// Timestamp layout printed by `nvidia-smi`, e.g. `2024/01/01 00:00:00.010000`
pub const SMI_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("'{value}' is not a valid timestamp: {reason}")]
    Invalid { value: String, reason: String },

    #[error("'{0}' does not exist in the local time zone")]
    Nonexistent(String),
}

/// Zone the sampling tool's wall-clock timestamps are read in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampZone {
    /// Host local time, which is what `nvidia-smi` prints
    #[default]
    Local,
    Utc,
}

impl std::str::FromStr for TimestampZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(TimestampZone::Local),
            "utc" => Ok(TimestampZone::Utc),
            _ => Err(format!("Invalid timestamp zone: {}", s)),
        }
    }
}

/// Parse an `nvidia-smi` timestamp into epoch milliseconds.
///
/// Ambiguous local times (DST fold) resolve to the earlier instant.
pub fn parse_smi_timestamp(value: &str, zone: TimestampZone) -> Result<TimestampMs, TimestampError> {
    let value = value.trim();
    let naive = NaiveDateTime::parse_from_str(value, SMI_TIMESTAMP_FORMAT).map_err(|e| {
        TimestampError::Invalid {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    match zone {
        TimestampZone::Utc => Ok(naive.and_utc().timestamp_millis()),
        TimestampZone::Local => match chrono::Local.from_local_datetime(&naive) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => Ok(t.timestamp_millis()),
            LocalResult::None => Err(TimestampError::Nonexistent(value.to_string())),
        },
    }
}
