//! Watchdog loop

use super::{last_heartbeat, read_identity, ProcessControl, ProcessIdentity, RestartPolicy, SupervisorError};
use crate::config::SupervisorConfig;
use crate::data::{format_time, AppendLog, DataLayout, SupervisorRecord};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Timing knobs of the watchdog
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub stall: Duration,
    pub poll: Duration,
    pub startup_grace: Duration,
    pub terminate_grace: Duration,
    pub leave_running_on_exit: bool,
}

impl From<&SupervisorConfig> for WatchdogSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            stall: Duration::from_secs(config.stall_secs),
            poll: Duration::from_secs(config.poll_secs.max(1)),
            startup_grace: Duration::from_secs(config.startup_grace_secs),
            terminate_grace: Duration::from_secs(config.terminate_grace_secs),
            leave_running_on_exit: config.leave_running_on_exit,
        }
    }
}

/// Health of the capture process as seen by one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Alive and reporting
    Healthy,
    /// Freshly started, first heartbeat not yet due
    Starting,
    /// Alive but silent; `age` is `None` when it never reported
    Stalled { age: Option<Duration> },
    /// Tracked process is gone
    Exited,
    /// No capture process is tracked
    NotRunning,
}

/// Judge the capture process from its liveness and newest heartbeat
pub fn assess(
    pid: Option<u32>,
    alive: bool,
    heartbeat: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    settings: &WatchdogSettings,
) -> Verdict {
    if pid.is_none() {
        return Verdict::NotRunning;
    }
    if !alive {
        return Verdict::Exited;
    }

    let since = |t: DateTime<Utc>| (now - t).to_std().unwrap_or_default();
    let reported_since_start = match (heartbeat, started_at) {
        (Some(beat), Some(start)) => beat >= start,
        (Some(_), None) => true,
        (None, _) => false,
    };
    let in_grace = started_at.is_some_and(|start| since(start) < settings.startup_grace);
    if in_grace && !reported_since_start {
        return Verdict::Starting;
    }

    match heartbeat.map(since) {
        Some(age) if age <= settings.stall => Verdict::Healthy,
        age => Verdict::Stalled { age },
    }
}

/// Keeps one capture process running
pub struct Watchdog<P: ProcessControl> {
    control: P,
    layout: DataLayout,
    settings: WatchdogSettings,
    policy: RestartPolicy,
    activity: AppendLog<SupervisorRecord>,
    pid: Option<u32>,
    /// Set when `pid` was adopted rather than spawned by us
    adopted: Option<ProcessIdentity>,
    started_at: Option<DateTime<Utc>>,
    restart_at: Option<Instant>,
    pending_reason: String,
    attempt: u32,
}

impl<P: ProcessControl> Watchdog<P> {
    /// Open the activity log and adopt a capture process that is already running
    pub fn open(mut control: P, layout: DataLayout, config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        let activity = AppendLog::open(layout.supervisor_log())?;
        let policy = RestartPolicy::new(
            config.max_restarts,
            Duration::from_secs(config.restart_window_secs),
            Duration::from_secs(config.backoff_initial_secs),
            Duration::from_secs(config.backoff_max_secs),
        );

        let recorded = read_identity(&layout.pid_file());
        let adopted = recorded.clone().filter(|identity| control.is_same_process(identity));
        let stale = recorded.filter(|identity| adopted.is_none() && control.is_alive(identity.pid));

        let mut watchdog = Self {
            control,
            layout,
            settings: WatchdogSettings::from(config),
            policy,
            activity,
            pid: None,
            adopted: None,
            started_at: None,
            restart_at: None,
            pending_reason: String::new(),
            attempt: 0,
        };

        if let Some(identity) = adopted {
            let pid = identity.pid;
            tracing::info!(pid, "Adopting running capture process");
            watchdog.pid = Some(pid);
            watchdog.adopted = Some(identity);
            watchdog.started_at = Some(Utc::now());
            watchdog.record("adopt", Some(pid), "capture process already running")?;
        } else if let Some(identity) = stale {
            tracing::warn!(pid = identity.pid, "Pid file names an unrelated process, ignoring it");
            watchdog.record("stale_pid", Some(identity.pid), "pid reused by another process")?;
        }

        Ok(watchdog)
    }

    /// Pid of the tracked capture process
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn control_mut(&mut self) -> &mut P {
        &mut self.control
    }

    /// Probe once and act on the verdict
    pub async fn step(&mut self, now: DateTime<Utc>, instant: Instant) -> Result<Verdict, SupervisorError> {
        let heartbeat = match last_heartbeat(&self.layout.heartbeat_log()) {
            Ok(beat) => beat,
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat probe failed");
                None
            }
        };
        let alive = self.tracked_alive();

        let verdict = assess(self.pid, alive, heartbeat, self.started_at, now, &self.settings);
        match verdict {
            Verdict::Healthy | Verdict::Starting => {}
            Verdict::Stalled { age } => {
                if let Some(pid) = self.pid {
                    self.on_stall(pid, age, instant).await?;
                }
            }
            Verdict::Exited => {
                let pid = self.pid.take();
                self.adopted = None;
                self.started_at = None;
                tracing::warn!(pid = ?pid, "Capture process exited");
                self.record("exited", pid, "process no longer alive")?;
                self.schedule_restart("capture process exited", instant)?;
            }
            Verdict::NotRunning => {
                self.schedule_restart("capture process not running", instant)?;
            }
        }

        if self.restart_at.is_some_and(|at| instant >= at) {
            self.start(now, instant).await?;
        }

        Ok(verdict)
    }

    async fn on_stall(&mut self, pid: u32, age: Option<Duration>, instant: Instant) -> Result<(), SupervisorError> {
        let stall = SupervisorError::StallDetected {
            pid,
            age_secs: age.map_or(u64::MAX, |a| a.as_secs()),
        };
        let reason = match age {
            Some(_) => stall.to_string(),
            None => format!("capture process {} never reported a heartbeat", pid),
        };
        tracing::warn!(pid, reason = %reason, "Capture process stalled, terminating");
        self.record("stall", Some(pid), &reason)?;

        if let Err(e) = self.control.terminate(pid, self.settings.terminate_grace).await {
            // keep tracking it; the next probe retries
            tracing::error!(error = %e, "Could not terminate stalled capture process");
            self.record("terminate_failed", Some(pid), &e.to_string())?;
            return Ok(());
        }

        self.pid = None;
        self.adopted = None;
        self.started_at = None;
        self.schedule_restart(&reason, instant)
    }

    /// Liveness of the tracked process; an adopted one must also still be
    /// the process that wrote the pid file
    fn tracked_alive(&mut self) -> bool {
        match (self.pid, &self.adopted) {
            (Some(_), Some(identity)) => self.control.is_same_process(identity),
            (Some(pid), None) => self.control.is_alive(pid),
            (None, _) => false,
        }
    }

    fn schedule_restart(&mut self, reason: &str, instant: Instant) -> Result<(), SupervisorError> {
        if self.restart_at.is_some() {
            return Ok(());
        }

        let capped = self.policy.capped(instant);
        let delay = self.policy.delay(instant);
        self.restart_at = Some(instant + delay);
        self.pending_reason = reason.to_string();

        if capped {
            tracing::warn!(
                delay_secs = delay.as_secs(),
                reason,
                "Restart cap reached, deferring restart"
            );
            self.record("restart_deferred", None, &format!("restart cap reached; {}", reason))?;
        } else if !delay.is_zero() {
            tracing::info!(delay_secs = delay.as_secs(), reason, "Restart scheduled");
        }
        Ok(())
    }

    async fn start(&mut self, now: DateTime<Utc>, instant: Instant) -> Result<(), SupervisorError> {
        self.restart_at = None;
        self.attempt += 1;
        self.policy.record(instant);
        let reason = std::mem::take(&mut self.pending_reason);

        match self.control.spawn().await {
            Ok(pid) => {
                self.pid = Some(pid);
                self.adopted = None;
                self.started_at = Some(now);
                telemetry::increment(CounterMetric::SupervisorRestarts, 1);
                tracing::info!(pid, attempt = self.attempt, reason = %reason, "Capture process started");
                self.record("start", Some(pid), &reason)
            }
            Err(e) => {
                tracing::error!(error = %e, attempt = self.attempt, "Failed to start capture process");
                self.record("spawn_failed", None, &e.to_string())?;
                self.schedule_restart(&format!("retry after spawn failure: {}", e), instant)
            }
        }
    }

    fn record(&mut self, event: &str, pid: Option<u32>, reason: &str) -> Result<(), SupervisorError> {
        self.activity.append_one(&SupervisorRecord {
            time_dt: format_time(Utc::now()),
            event: event.to_string(),
            pid,
            attempt: self.attempt,
            reason: reason.to_string(),
        })?;
        Ok(())
    }

    /// Probe every poll interval until `shutdown` flips to true, then stop
    /// the capture process unless configured to leave it running
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        self.record("supervisor_start", self.pid, "")?;
        tracing::info!(
            stall_secs = self.settings.stall.as_secs(),
            poll_secs = self.settings.poll.as_secs(),
            "Watchdog running"
        );

        let mut timer = interval(self.settings.poll);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    match self.step(Utc::now(), Instant::now()).await {
                        Ok(verdict) => tracing::trace!(?verdict, "Watchdog probe"),
                        Err(e @ SupervisorError::ActivityLog(_)) => return Err(e),
                        Err(e) => tracing::warn!(error = %e, "Watchdog step failed"),
                    }
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<(), SupervisorError> {
        let tracked = self.pid;
        let pid = match tracked {
            Some(pid) if self.tracked_alive() => Some(pid),
            _ => None,
        };
        match pid {
            Some(pid) if !self.settings.leave_running_on_exit => {
                tracing::info!(pid, "Stopping capture process");
                if let Err(e) = self.control.terminate(pid, self.settings.terminate_grace).await {
                    tracing::error!(error = %e, "Could not stop capture process");
                }
                self.record("supervisor_stop", Some(pid), "capture process stopped")
            }
            pid => self.record("supervisor_stop", pid, "capture process left running"),
        }
    }
}
