//! Resume-state store
//!
//! The checkpoint records how far each stream has been durably captured.
//! It is written with write-temp, fsync, rename, so a crash leaves either the
//! previous or the new checkpoint, never a truncated one.

use super::CaptureError;
use crate::data::format_time_msc;
use crate::source::{RawTick, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const STATE_VERSION: u32 = 1;

/// Position of the last captured tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCursor {
    pub time_msc: i64,
    /// Sequence id of the last tick. `None` means every tick at `time_msc`
    /// counts as captured.
    pub seq: Option<u64>,
}

impl TickCursor {
    /// Cursor that treats everything up to and including `time_msc` as captured
    pub fn at(time_msc: i64) -> Self {
        Self { time_msc, seq: None }
    }

    /// Cursor positioned on `tick`
    pub fn after(tick: &RawTick) -> Self {
        Self {
            time_msc: tick.time_msc,
            seq: Some(tick.seq),
        }
    }

    fn key(&self) -> (i64, u64) {
        (self.time_msc, self.seq.unwrap_or(u64::MAX))
    }

    /// Whether `tick` lies strictly beyond this cursor
    pub fn admits(&self, tick: &RawTick) -> bool {
        (tick.time_msc, tick.seq) > self.key()
    }

    /// The further of two cursors
    pub fn max(self, other: TickCursor) -> TickCursor {
        if other.key() > self.key() {
            other
        } else {
            self
        }
    }
}

/// Recovery checkpoint of the capture process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub symbol: String,
    pub last_tick_time_msc: i64,
    #[serde(default)]
    pub last_tick_seq: Option<u64>,
    #[serde(default)]
    pub last_tick_dt: String,
    /// Open time (epoch seconds) of the last persisted bar per timeframe
    #[serde(default)]
    pub bars: BTreeMap<Timeframe, i64>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl ResumeState {
    /// State for a capture with no usable history: ticks start at `now`
    pub fn fresh(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        let time_msc = now.timestamp_millis();
        Self {
            version: STATE_VERSION,
            symbol: symbol.into(),
            last_tick_time_msc: time_msc,
            last_tick_seq: None,
            last_tick_dt: format_time_msc(time_msc),
            bars: BTreeMap::new(),
            updated_at: now,
        }
    }

    pub fn tick_cursor(&self) -> TickCursor {
        TickCursor {
            time_msc: self.last_tick_time_msc,
            seq: self.last_tick_seq,
        }
    }

    pub fn with_tick_cursor(mut self, cursor: TickCursor, now: DateTime<Utc>) -> Self {
        self.last_tick_time_msc = cursor.time_msc;
        self.last_tick_seq = cursor.seq;
        self.last_tick_dt = format_time_msc(cursor.time_msc);
        self.updated_at = now;
        self
    }

    pub fn last_bar(&self, timeframe: Timeframe) -> Option<i64> {
        self.bars.get(&timeframe).copied()
    }

    pub fn with_last_bar(mut self, timeframe: Timeframe, open_time: i64, now: DateTime<Utc>) -> Self {
        self.bars.insert(timeframe, open_time);
        self.updated_at = now;
        self
    }
}

/// Persists [`ResumeState`] as a small JSON file
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
    symbol: String,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            symbol: symbol.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, falling back to a fresh state at `now` when it
    /// is absent or unusable. Never guesses an earlier start.
    pub fn load(&self, now: DateTime<Utc>) -> ResumeState {
        match self.try_load(now) {
            Ok(Some(state)) => {
                tracing::info!(
                    path = ?self.path,
                    last_tick = %state.last_tick_dt,
                    timeframes = state.bars.len(),
                    "Resuming from checkpoint"
                );
                state
            }
            Ok(None) => {
                tracing::warn!(
                    path = ?self.path,
                    "No resume state found, tick capture starts from now"
                );
                ResumeState::fresh(&self.symbol, now)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Recovery state corrupt, tick capture starts from now without backfill"
                );
                ResumeState::fresh(&self.symbol, now)
            }
        }
    }

    /// Read and validate the checkpoint; `Ok(None)` when it does not exist
    pub fn try_load(&self, now: DateTime<Utc>) -> Result<Option<ResumeState>, CaptureError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };

        let state: ResumeState =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        if !state.symbol.eq_ignore_ascii_case(&self.symbol) {
            return Err(self.corrupt(format!(
                "checkpoint belongs to {}, not {}",
                state.symbol, self.symbol
            )));
        }
        let now_msc = now.timestamp_millis();
        if state.last_tick_time_msc <= 0 || state.last_tick_time_msc > now_msc {
            return Err(self.corrupt(format!(
                "last tick time {} outside (0, now]",
                state.last_tick_time_msc
            )));
        }
        if let Some((tf, open)) = state.bars.iter().find(|(_, open)| **open > now.timestamp()) {
            return Err(self.corrupt(format!("{} bar time {} is in the future", tf, open)));
        }

        Ok(Some(state))
    }

    /// Atomically replace the checkpoint
    pub fn save(&self, state: &ResumeState) -> Result<(), CaptureError> {
        let err = |e: io::Error| CaptureError::write("resume_state", e);

        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| CaptureError::write("resume_state", e))?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(err)?;
        }

        let mut file = File::create(&tmp).map_err(err)?;
        file.write_all(&body).map_err(err)?;
        file.sync_all().map_err(err)?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(err)?;
        sync_parent(&self.path).map_err(err)?;

        tracing::trace!(last_tick = %state.last_tick_dt, "Checkpoint saved");
        Ok(())
    }

    fn corrupt(&self, reason: String) -> CaptureError {
        CaptureError::RecoveryStateCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}
