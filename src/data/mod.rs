//! Data storage module
//!
//! Append-only CSV logs, the on-disk layout of the capture directory, and
//! Parquet export of the tick log.

mod layout;
mod log;
mod parquet;
mod records;

pub use layout::{dir_megabytes, file_megabytes, DataLayout};
pub use log::{complete_lines, last_record, last_records, AppendLog};
pub use parquet::{tick_schema, TickExporter};
pub use records::{
    BarRecord, DepthRecord, HeartbeatRecord, SessionRecord, SupervisorRecord, SymbolRecord,
    TickRecord,
};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Render a UTC instant the way every log writes it
pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render epoch milliseconds; out-of-range values render empty
pub fn format_time_msc(time_msc: i64) -> String {
    DateTime::from_timestamp_millis(time_msc)
        .map(format_time)
        .unwrap_or_default()
}

/// Parse a time written by [`format_time`]
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time_msc() {
        assert_eq!(format_time_msc(1_704_067_200_123), "2024-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_parse_time_roundtrip() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_time(&format_time(t)), Some(t));
        assert_eq!(parse_time("not a time"), None);
    }
}
