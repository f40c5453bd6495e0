//! Single-instance guard for the capture process

use super::CaptureError;
use crate::supervisor::process::{read_identity, write_identity, ProcessIdentity};
use std::fs;
use std::path::PathBuf;

/// Pid file held for the lifetime of the capture process.
///
/// Records the pid with the process start time, so a recycled pid never
/// reads as a running capture. Removed on drop if it still names this process.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    identity: ProcessIdentity,
}

impl InstanceLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        Self::acquire_as(path, ProcessIdentity::current())
    }

    fn acquire_as(path: impl Into<PathBuf>, identity: ProcessIdentity) -> Result<Self, CaptureError> {
        let path = path.into();
        if let Some(holder) = read_identity(&path) {
            if holder.pid != identity.pid && holder.is_live() {
                return Err(CaptureError::AlreadyRunning(holder.pid));
            }
            tracing::info!(stale_pid = holder.pid, "Replacing stale pid file");
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CaptureError::write("pid", e))?;
        }
        write_identity(&path, &identity).map_err(|e| CaptureError::write("pid", e))?;

        Ok(Self { path, identity })
    }

    pub fn pid(&self) -> u32 {
        self.identity.pid
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if read_identity(&self.path).as_ref() == Some(&self.identity) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(error = %e, path = ?self.path, "Failed to remove pid file");
            }
        }
    }
}
