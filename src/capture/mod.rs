//! Capture module
//!
//! The capture process: resumable tick capture, closed-bar aggregation,
//! depth sampling, session tracking, metadata snapshots and heartbeats,
//! all driven by one cooperative scheduler so each log has a single writer.

mod bars;
mod depth;
mod heartbeat;
mod lock;
mod metadata;
mod resume;
mod runner;
mod session;
mod ticks;

pub use bars::{select_closed_bars, BarAggregator};
pub use depth::{DepthOutcome, DepthSampler};
pub use heartbeat::{HealthReporter, HeartbeatInput};
pub use lock::InstanceLock;
pub use metadata::MetadataLogger;
pub use resume::{ResumeState, ResumeStore, TickCursor};
pub use runner::{wait_for_stop_signal, CaptureRunner, CaptureSummary};
pub use session::{session_at, Session, SessionTracker};
pub use ticks::{dedup_ticks, flag_description, TickCapture, TickEnricher, TickPoll};

use crate::data::StorageError;
use crate::source::SourceError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the capture process
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Checkpoint unreadable; the store recovers from this itself
    #[error("resume state at {path:?} is unusable: {reason}")]
    RecoveryStateCorrupt { path: PathBuf, reason: String },

    /// Durable write failed; fatal for the stream
    #[error("write to {stream} log failed: {source}")]
    WriteFailure {
        stream: &'static str,
        #[source]
        source: StorageError,
    },

    /// Another capture process holds the instance lock
    #[error("another capture process is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

impl CaptureError {
    pub(crate) fn write(stream: &'static str, source: impl Into<StorageError>) -> Self {
        CaptureError::WriteFailure {
            stream,
            source: source.into(),
        }
    }
}

/// Tick capture state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Disconnected,
    Polling,
    Appending,
    Stopping,
}

impl CaptureState {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureState::Disconnected => "DISCONNECTED",
            CaptureState::Polling => "POLLING",
            CaptureState::Appending => "APPENDING",
            CaptureState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
