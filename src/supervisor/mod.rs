//! Supervisor module
//!
//! A separate watchdog process that keeps the capture process alive: it
//! starts or adopts it, reads its heartbeat log, and restarts it when it
//! exits or stops reporting.

mod policy;
mod probe;
pub mod process;
mod watchdog;

pub use policy::RestartPolicy;
pub use probe::last_heartbeat;
pub use process::{
    pid_alive, read_identity, read_pid, write_identity, CommandSpec, OsProcessControl, ProcessControl,
    ProcessIdentity,
};
pub use watchdog::{assess, Verdict, Watchdog, WatchdogSettings};

use crate::data::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn capture process: {0}")]
    Spawn(String),

    #[error("failed to terminate capture process {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    #[error("heartbeat log {path:?} unreadable: {reason}")]
    HeartbeatUnreadable { path: PathBuf, reason: String },

    #[error("capture process {pid} stalled: no heartbeat for {age_secs}s")]
    StallDetected { pid: u32, age_secs: u64 },

    #[error("activity log write failed: {0}")]
    ActivityLog(#[from] StorageError),
}
