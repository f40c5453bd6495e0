//! Capture scheduler
//!
//! Every capture task runs on its own interval inside one `select!` loop.
//! A branch body always runs to completion before the next branch is
//! polled, so each log has exactly one writer and shutdown is only
//! observed between appends.

use super::{
    BarAggregator, CaptureError, DepthOutcome, DepthSampler, HealthReporter, HeartbeatInput,
    InstanceLock, MetadataLogger, ResumeState, ResumeStore, SessionTracker, TickCapture,
    TickCursor, TickEnricher, TickPoll,
};
use crate::backoff::Backoff;
use crate::config::{CaptureConfig, Config};
use crate::data::{last_record, DataLayout, TickRecord};
use crate::source::{MarketDataSource, Timeframe};
use crate::telemetry::{self, GaugeMetric};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

/// What a capture run achieved, reported on shutdown
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub run_id: Uuid,
    pub ticks_written: u64,
    pub last_tick_time_msc: i64,
    pub last_tick_dt: String,
}

/// Owns every capture task and the resume state they advance
pub struct CaptureRunner {
    config: CaptureConfig,
    store: ResumeStore,
    state: ResumeState,
    ticks: TickCapture,
    bars: BarAggregator,
    depth: Option<DepthSampler>,
    sessions: SessionTracker,
    health: HealthReporter,
    metadata: MetadataLogger,
    /// Timeframes still to sync in the current bar cycle
    pending_bars: VecDeque<Timeframe>,
    _lock: InstanceLock,
}

impl CaptureRunner {
    /// Open every log, load the checkpoint and reconcile it with the log tails
    pub fn open(
        config: &Config,
        source: Arc<dyn MarketDataSource>,
        now: DateTime<Utc>,
    ) -> Result<Self, CaptureError> {
        let capture = config.capture.clone();
        let layout = DataLayout::new(&config.storage.data_dir, &capture.symbol);
        layout
            .ensure_dirs()
            .map_err(|e| CaptureError::write("layout", e))?;

        let lock = InstanceLock::acquire(layout.pid_file())?;
        let call_timeout = config.source.request_timeout();
        let symbol = layout.symbol().to_string();

        let ticks = TickCapture::open(
            &symbol,
            source.clone(),
            layout.tick_log(),
            TickEnricher::new(capture.point),
            capture.tick_batch,
            call_timeout,
            Backoff::new(
                Duration::from_millis(capture.backoff_initial_ms),
                Duration::from_millis(capture.backoff_max_ms),
            ),
        )?;
        let bars = BarAggregator::open(&layout, source.clone(), &capture.timeframes, call_timeout)?;
        let depth = if capture.depth_enabled {
            Some(DepthSampler::open(&symbol, source.clone(), layout.depth_log(), call_timeout)?)
        } else {
            None
        };
        let sessions = SessionTracker::open(layout.session_log())?;
        let health = HealthReporter::open(&layout, Duration::from_secs(capture.heartbeat_interval_secs))?;
        let metadata = MetadataLogger::open(&symbol, source, layout.symbol_info_log(), call_timeout)?;

        let store = ResumeStore::new(layout.resume_state(), &symbol);
        let state = reconcile(store.load(now), &layout, &bars, now)?;

        tracing::info!(
            symbol = %symbol,
            data_dir = ?layout.root(),
            from = %state.last_tick_dt,
            run_id = %health.run_id(),
            "Capture opened"
        );

        Ok(Self {
            config: capture,
            store,
            state,
            ticks,
            bars,
            depth,
            sessions,
            health,
            metadata,
            pending_bars: VecDeque::new(),
            _lock: lock,
        })
    }

    /// Current resume state
    pub fn state(&self) -> &ResumeState {
        &self.state
    }

    /// Run until `shutdown` flips to true or its sender is dropped, then
    /// persist the checkpoint.
    ///
    /// Returns an error only for a failed durable write.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<CaptureSummary, CaptureError> {
        let mut tick_timer = interval(Duration::from_millis(self.config.tick_poll_ms.max(1)));
        let mut depth_timer = interval(Duration::from_secs(self.config.depth_interval_secs.max(1)));
        let mut bar_timer = interval(Duration::from_secs(self.config.bar_interval_secs.max(1)));
        let mut metadata_timer = interval(Duration::from_secs(self.config.metadata_interval_secs.max(1)));
        for timer in [&mut tick_timer, &mut depth_timer, &mut bar_timer, &mut metadata_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        // Point size is needed before the first tick is enriched
        metadata_timer.tick().await;
        self.metadata_cycle().await?;

        while !*shutdown.borrow() {
            let depth_active = self.depth.as_ref().is_some_and(|d| !d.is_disabled());
            let bars_pending = !self.pending_bars.is_empty();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tick_timer.tick() => self.tick_cycle().await?,
                _ = bar_timer.tick() => self.queue_bar_sync(),
                _ = depth_timer.tick(), if depth_active => self.depth_cycle().await?,
                _ = metadata_timer.tick() => self.metadata_cycle().await?,
                // one timeframe per turn, so ticks and heartbeats interleave
                _ = std::future::ready(()), if bars_pending => self.bar_step().await?,
            }
        }

        self.finish()
    }

    async fn tick_cycle(&mut self) -> Result<(), CaptureError> {
        let now = Utc::now();
        self.sessions.observe(now)?;

        if let TickPoll::Appended { cursor, .. } = self.ticks.poll(self.state.tick_cursor()).await? {
            self.state = self.state.clone().with_tick_cursor(cursor, now);
            self.store.save(&self.state)?;
            telemetry::set_gauge(
                GaugeMetric::LastTickLagMs,
                (now.timestamp_millis() - cursor.time_msc) as f64,
            );
        }

        // A wedged terminal must look dead to the supervisor
        if !self.ticks.is_wedged() && self.health.due(Instant::now()) {
            self.health.emit(
                HeartbeatInput {
                    last_time_msc: self.state.last_tick_time_msc,
                    total_ticks: self.ticks.total_ticks(),
                    state: self.ticks.state(),
                },
                now,
            )?;
        }
        Ok(())
    }

    fn queue_bar_sync(&mut self) {
        if self.pending_bars.is_empty() {
            self.pending_bars.extend(self.bars.timeframes());
        }
    }

    async fn bar_step(&mut self) -> Result<(), CaptureError> {
        let Some(tf) = self.pending_bars.pop_front() else {
            return Ok(());
        };
        let now = Utc::now();
        match self.bars.sync_timeframe(tf, self.state.last_bar(tf), now).await {
            Ok(Some(open)) => {
                self.state = self.state.clone().with_last_bar(tf, open, now);
                self.store.save(&self.state)?;
            }
            Ok(None) => {}
            Err(CaptureError::Source(e)) => {
                telemetry::increment(telemetry::CounterMetric::SourceErrors, 1);
                tracing::warn!(timeframe = %tf, error = %e, "Bar request failed, retrying next cycle");
                self.pending_bars.clear();
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn depth_cycle(&mut self) -> Result<(), CaptureError> {
        let Some(depth) = self.depth.as_mut() else {
            return Ok(());
        };
        if let DepthOutcome::Written { levels } = depth.sample(Utc::now()).await? {
            tracing::trace!(levels, "Depth snapshot written");
        }
        Ok(())
    }

    async fn metadata_cycle(&mut self) -> Result<(), CaptureError> {
        if let Some(info) = self.metadata.log_snapshot(Utc::now()).await? {
            if info.point > rust_decimal::Decimal::ZERO {
                self.ticks.enricher_mut().set_point(info.point);
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<CaptureSummary, CaptureError> {
        self.ticks.stop();
        self.store.save(&self.state)?;

        let summary = CaptureSummary {
            run_id: self.health.run_id(),
            ticks_written: self.ticks.total_ticks(),
            last_tick_time_msc: self.state.last_tick_time_msc,
            last_tick_dt: self.state.last_tick_dt.clone(),
        };
        tracing::info!(
            ticks = summary.ticks_written,
            last_tick = %summary.last_tick_dt,
            "Capture stopped, resume state persisted"
        );
        Ok(summary)
    }
}

/// Raise the checkpoint cursors to what the logs already contain
fn reconcile(
    mut state: ResumeState,
    layout: &DataLayout,
    bars: &BarAggregator,
    now: DateTime<Utc>,
) -> Result<ResumeState, CaptureError> {
    let tail = last_record::<TickRecord>(&layout.tick_log())
        .map_err(|e| CaptureError::write("tick", e))?
        .map(|r| TickCursor {
            time_msc: r.time_msc,
            seq: Some(r.seq),
        });
    if let Some(tail) = tail {
        let cursor = state.tick_cursor().max(tail);
        if cursor != state.tick_cursor() {
            tracing::warn!(
                checkpoint = state.last_tick_time_msc,
                log_tail = tail.time_msc,
                "Tick log is ahead of the checkpoint, skipping ticks already logged"
            );
            state = state.with_tick_cursor(cursor, now);
        }
    }

    let timeframes: Vec<Timeframe> = bars.timeframes().collect();
    for tf in timeframes {
        if let Some(logged) = bars.logged_tail(tf)? {
            if state.last_bar(tf).map_or(true, |open| logged > open) {
                tracing::debug!(timeframe = %tf, open = logged, "Bar cursor raised from log tail");
                state = state.with_last_bar(tf, logged, now);
            }
        }
    }

    Ok(state)
}

/// Resolve on Ctrl+C or, on unix, SIGTERM
pub async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Stop signal received");
}
