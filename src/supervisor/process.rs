//! OS process control for the capture process

use super::SupervisorError;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Pid recorded in a pid file, if the file exists and parses
pub fn read_pid(path: &Path) -> Option<u32> {
    read_identity(path).map(|identity| identity.pid)
}

/// A pid together with the start time of the process that held it.
///
/// Pids are recycled after a crash or reboot; the start token tells the
/// original holder apart from an unrelated process that got the same number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub started: Option<String>,
}

impl ProcessIdentity {
    /// Identity of the running process `pid`, as the OS reports it now
    pub fn of(pid: u32) -> Self {
        Self {
            pid,
            started: start_token(pid),
        }
    }

    /// Identity of this process
    pub fn current() -> Self {
        Self::of(std::process::id())
    }

    /// Still the same process: alive, and started at the recorded time.
    ///
    /// A recorded identity without a start token only matches on a platform
    /// that cannot report one either.
    pub fn is_live(&self) -> bool {
        pid_alive(self.pid) && start_token(self.pid) == self.started
    }
}

/// Pid file contents: pid on the first line, start token on the second
pub fn read_identity(path: &Path) -> Option<ProcessIdentity> {
    let contents = fs::read_to_string(path).ok()?;
    let mut lines = contents.lines().map(str::trim);
    let pid = lines.next()?.parse().ok()?;
    let started = lines.next().filter(|t| !t.is_empty()).map(str::to_string);
    Some(ProcessIdentity { pid, started })
}

pub fn write_identity(path: &Path, identity: &ProcessIdentity) -> std::io::Result<()> {
    let contents = match &identity.started {
        Some(started) => format!("{}\n{}\n", identity.pid, started),
        None => format!("{}\n", identity.pid),
    };
    fs::write(path, contents)
}

/// Opaque start time of `pid`: boot id plus start ticks on Linux
#[cfg(target_os = "linux")]
fn start_token(pid: u32) -> Option<String> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parens; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let start_ticks = rest.split_whitespace().nth(19)?;
    let boot_id = fs::read_to_string("/proc/sys/kernel/random/boot_id").unwrap_or_default();
    Some(format!("{}:{}", boot_id.trim(), start_ticks))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn start_token(pid: u32) -> Option<String> {
    let out = std::process::Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let started = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (out.status.success() && !started.is_empty()).then_some(started)
}

#[cfg(windows)]
fn start_token(pid: u32) -> Option<String> {
    let script = format!("(Get-Process -Id {}).StartTime.ToFileTimeUtc()", pid);
    let out = std::process::Command::new("powershell")
        .args(["-NoProfile", "-Command", &script])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let started = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (out.status.success() && !started.is_empty()).then_some(started)
}

/// OS-level liveness check, independent of any in-memory handle
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
        .stderr(Stdio::null())
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid)))
        .unwrap_or(false)
}

/// Ask the process to stop gracefully with SIGTERM.
///
/// Windows offers no signal a console process without a window can catch
/// from outside its process group, so stops there are always forced and
/// recovery relies on the torn-tail repair of every log.
#[cfg(unix)]
pub async fn request_stop(pid: u32) -> std::io::Result<bool> {
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

/// Kill the process without giving it a chance to clean up
pub async fn force_kill(pid: u32) -> std::io::Result<bool> {
    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = Command::new("kill");
        cmd.args(["-KILL", &pid.to_string()]);
        cmd
    };
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/F", "/PID", &pid.to_string()]);
        cmd
    };
    let status = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status().await?;
    Ok(status.success())
}

/// Program and arguments that start the capture process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Use `command` when configured, else this executable's `capture`
    /// subcommand with the same config file
    pub fn resolve(command: Option<&[String]>, config_path: &Path) -> Result<Self, SupervisorError> {
        if let Some((program, args)) = command.and_then(|c| c.split_first()) {
            return Ok(Self {
                program: PathBuf::from(program),
                args: args.to_vec(),
            });
        }

        let exe = std::env::current_exe().map_err(|e| SupervisorError::Spawn(e.to_string()))?;
        Ok(Self {
            program: exe,
            args: vec![
                "--config".to_string(),
                config_path.display().to_string(),
                "capture".to_string(),
            ],
        })
    }
}

/// Start, probe and stop the capture process
#[async_trait]
pub trait ProcessControl: Send {
    /// Start a new capture process; returns its pid
    async fn spawn(&mut self) -> Result<u32, SupervisorError>;

    fn is_alive(&mut self, pid: u32) -> bool;

    /// Whether `identity` still names the process that recorded it
    fn is_same_process(&mut self, identity: &ProcessIdentity) -> bool;

    /// Graceful stop, then forced kill once `grace` has passed.
    /// Forced at once on Windows.
    async fn terminate(&mut self, pid: u32, grace: Duration) -> Result<(), SupervisorError>;
}

/// [`ProcessControl`] over real OS processes
pub struct OsProcessControl {
    spec: CommandSpec,
    child: Option<Child>,
}

impl OsProcessControl {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec, child: None }
    }

    /// Reap our own child if it exited, so a zombie never reads as alive
    fn reap(&mut self, pid: u32) -> Option<bool> {
        let child = self.child.as_mut().filter(|c| c.id() == Some(pid))?;
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(pid, %status, "Capture process exited");
                self.child = None;
                Some(false)
            }
            Ok(None) => Some(true),
            Err(e) => {
                tracing::warn!(pid, error = %e, "Could not poll capture process");
                None
            }
        }
    }
}

#[async_trait]
impl ProcessControl for OsProcessControl {
    async fn spawn(&mut self) -> Result<u32, SupervisorError> {
        let child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {}", self.spec.program.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn("process exited before reporting a pid".into()))?;
        self.child = Some(child);

        tracing::info!(pid, program = ?self.spec.program, "Spawned capture process");
        Ok(pid)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.reap(pid).unwrap_or_else(|| pid_alive(pid))
    }

    fn is_same_process(&mut self, identity: &ProcessIdentity) -> bool {
        identity.is_live()
    }

    async fn terminate(&mut self, pid: u32, grace: Duration) -> Result<(), SupervisorError> {
        let term_err = |e: std::io::Error| SupervisorError::Terminate { pid, reason: e.to_string() };

        #[cfg(unix)]
        {
            request_stop(pid).await.map_err(term_err)?;
            let deadline = tokio::time::Instant::now() + grace;
            while tokio::time::Instant::now() < deadline {
                if !self.is_alive(pid) {
                    tracing::info!(pid, "Capture process stopped gracefully");
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tracing::warn!(pid, grace_secs = grace.as_secs(), "Capture process ignored stop request, killing");
        }
        #[cfg(windows)]
        tracing::info!(pid, grace_secs = grace.as_secs(), "Forced stop of capture process");

        force_kill(pid).await.map_err(term_err)?;
        if let Some(mut child) = self.child.take().filter(|c| c.id() == Some(pid)) {
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }

        if pid_alive(pid) {
            return Err(SupervisorError::Terminate {
                pid,
                reason: "still alive after forced kill".into(),
            });
        }
        Ok(())
    }
}
