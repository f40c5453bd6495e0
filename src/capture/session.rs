//! Trading session tracking

use super::CaptureError;
use crate::data::{format_time, last_record, AppendLog, SessionRecord};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Named trading-hours window, derived from UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    Asia,
    London,
    NewYork,
    #[serde(rename = "LondonNY_Overlap")]
    LondonNyOverlap,
}

impl Session {
    pub fn as_str(self) -> &'static str {
        match self {
            Session::Asia => "Asia",
            Session::London => "London",
            Session::NewYork => "NewYork",
            Session::LondonNyOverlap => "LondonNY_Overlap",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session active at `t`
pub fn session_at(t: DateTime<Utc>) -> Session {
    let minutes = t.hour() * 60 + t.minute();
    let hour = |h: u32| h * 60;

    if (hour(12)..hour(16)).contains(&minutes) {
        Session::LondonNyOverlap
    } else if (hour(7)..hour(16)).contains(&minutes) {
        Session::London
    } else if (hour(12)..hour(21)).contains(&minutes) {
        Session::NewYork
    } else {
        Session::Asia
    }
}

/// Appends a [`SessionRecord`] whenever the active session changes
pub struct SessionTracker {
    log: AppendLog<SessionRecord>,
    current: Option<Session>,
}

impl SessionTracker {
    /// Open the session log, recovering the last emitted session from it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let path = path.into();
        let current = last_record::<SessionRecord>(&path)
            .map_err(|e| CaptureError::write("session", e))?
            .map(|r| r.session);
        let log = AppendLog::open(path).map_err(|e| CaptureError::write("session", e))?;

        if let Some(session) = current {
            tracing::debug!(%session, "Recovered last session from log");
        }

        Ok(Self { log, current })
    }

    /// Session most recently written to the log
    pub fn current(&self) -> Option<Session> {
        self.current
    }

    /// Record a transition if the session at `now` differs from the last one
    pub fn observe(&mut self, now: DateTime<Utc>) -> Result<Option<SessionRecord>, CaptureError> {
        let session = session_at(now);
        if self.current == Some(session) {
            return Ok(None);
        }

        let record = SessionRecord {
            time_dt: format_time(now),
            session,
            prev: self.current,
            weekday: now.format("%A").to_string(),
        };
        self.log
            .append_one(&record)
            .map_err(|e| CaptureError::write("session", e))?;

        tracing::info!(
            prev = %self.current.map(Session::as_str).unwrap_or("-"),
            session = %session,
            "Session transition"
        );
        self.current = Some(session);

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::last_records;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).unwrap()
    }

    #[test]
    fn test_session_boundaries() {
        assert_eq!(session_at(at(0, 0)), Session::Asia);
        assert_eq!(session_at(at(6, 59)), Session::Asia);
        assert_eq!(session_at(at(7, 0)), Session::London);
        assert_eq!(session_at(at(11, 59)), Session::London);
        assert_eq!(session_at(at(12, 0)), Session::LondonNyOverlap);
        assert_eq!(session_at(at(15, 59)), Session::LondonNyOverlap);
        assert_eq!(session_at(at(16, 0)), Session::NewYork);
        assert_eq!(session_at(at(20, 59)), Session::NewYork);
        assert_eq!(session_at(at(21, 0)), Session::Asia);
    }

    #[test]
    fn test_session_serializes_legacy_name() {
        assert_eq!(
            serde_json::to_string(&Session::LondonNyOverlap).unwrap(),
            "\"LondonNY_Overlap\""
        );
    }

    #[test]
    fn test_tracker_emits_only_on_transition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_log.csv");
        let mut tracker = SessionTracker::open(&path).unwrap();

        let first = tracker.observe(at(6, 0)).unwrap().unwrap();
        assert_eq!(first.session, Session::Asia);
        assert_eq!(first.prev, None);
        assert_eq!(first.weekday, "Monday");

        assert!(tracker.observe(at(6, 30)).unwrap().is_none());

        let second = tracker.observe(at(7, 0)).unwrap().unwrap();
        assert_eq!(second.prev, Some(Session::Asia));
        assert_eq!(second.session, Session::London);
    }

    #[test]
    fn test_tracker_does_not_repeat_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_log.csv");

        let mut tracker = SessionTracker::open(&path).unwrap();
        tracker.observe(at(8, 0)).unwrap();
        drop(tracker);

        let mut tracker = SessionTracker::open(&path).unwrap();
        assert_eq!(tracker.current(), Some(Session::London));
        assert!(tracker.observe(at(9, 0)).unwrap().is_none());

        let rows: Vec<SessionRecord> = last_records(&path, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
