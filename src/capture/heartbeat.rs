//! Heartbeat emission

use super::{session_at, CaptureError, CaptureState};
use crate::data::{dir_megabytes, file_megabytes, format_time, format_time_msc, AppendLog, DataLayout, HeartbeatRecord};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Progress figures reported by one heartbeat
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatInput {
    pub last_time_msc: i64,
    /// Ticks appended by this process so far
    pub total_ticks: u64,
    pub state: CaptureState,
}

/// Appends periodic liveness records for the supervisor
pub struct HealthReporter {
    layout: DataLayout,
    log: AppendLog<HeartbeatRecord>,
    interval: Duration,
    last_emit: Option<Instant>,
    reported_ticks: u64,
    run_id: Uuid,
}

impl HealthReporter {
    pub fn open(layout: &DataLayout, interval: Duration) -> Result<Self, CaptureError> {
        let log = AppendLog::open(layout.heartbeat_log()).map_err(|e| CaptureError::write("heartbeat", e))?;
        Ok(Self {
            layout: layout.clone(),
            log,
            interval,
            last_emit: None,
            reported_ticks: 0,
            run_id: Uuid::new_v4(),
        })
    }

    /// Identifier of this capture process run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether a heartbeat is due at `now`
    pub fn due(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |last| now.duration_since(last) >= self.interval)
    }

    pub fn emit(&mut self, input: HeartbeatInput, now: DateTime<Utc>) -> Result<HeartbeatRecord, CaptureError> {
        let record = HeartbeatRecord {
            time_dt: format_time(now),
            last_time_msc: input.last_time_msc,
            last_tick_dt: format_time_msc(input.last_time_msc),
            ticks_batch: input.total_ticks.saturating_sub(self.reported_ticks),
            total_ticks: input.total_ticks,
            tick_mb: file_megabytes(&self.layout.tick_log()),
            ohlcv_mb: dir_megabytes(&self.layout.ohlcv_dir()),
            dom_mb: file_megabytes(&self.layout.depth_log()),
            session: session_at(now),
            state: input.state.to_string(),
            run_id: self.run_id.to_string(),
        };

        self.log
            .append_one(&record)
            .map_err(|e| CaptureError::write("heartbeat", e))?;
        self.last_emit = Some(Instant::now());
        self.reported_ticks = input.total_ticks;
        telemetry::increment(CounterMetric::Heartbeats, 1);

        tracing::info!(
            ticks_batch = record.ticks_batch,
            total_ticks = record.total_ticks,
            last_tick = %record.last_tick_dt,
            tick_mb = record.tick_mb,
            state = %record.state,
            "Heartbeat"
        );

        Ok(record)
    }
}
