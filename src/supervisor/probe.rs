//! Heartbeat probe

use super::SupervisorError;
use crate::data::{last_record, parse_time, HeartbeatRecord};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Time of the newest heartbeat in the log at `path`; `None` when the log
/// is missing or empty
pub fn last_heartbeat(path: &Path) -> Result<Option<DateTime<Utc>>, SupervisorError> {
    let record = last_record::<HeartbeatRecord>(path).map_err(|e| SupervisorError::HeartbeatUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match record {
        None => Ok(None),
        Some(record) => parse_time(&record.time_dt).map(Some).ok_or_else(|| {
            SupervisorError::HeartbeatUnreadable {
                path: path.to_path_buf(),
                reason: format!("bad timestamp {:?}", record.time_dt),
            }
        }),
    }
}
