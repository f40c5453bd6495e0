//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Ticks appended to the tick log
    TicksWritten,
    /// Closed bars appended across all timeframes
    BarsWritten,
    /// Order book snapshots appended
    DepthSnapshots,
    /// Failed or timed-out source calls
    SourceErrors,
    /// Heartbeat records appended
    Heartbeats,
    /// Capture restarts issued by the supervisor
    SupervisorRestarts,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Wall clock minus the time of the last captured tick
    LastTickLagMs,
    /// 1 while the terminal answers, 0 while disconnected
    SourceConnected,
}

fn counter_name(metric: CounterMetric) -> &'static str {
    match metric {
        CounterMetric::TicksWritten => "tape_ticks_written_total",
        CounterMetric::BarsWritten => "tape_bars_written_total",
        CounterMetric::DepthSnapshots => "tape_depth_snapshots_total",
        CounterMetric::SourceErrors => "tape_source_errors_total",
        CounterMetric::Heartbeats => "tape_heartbeats_total",
        CounterMetric::SupervisorRestarts => "tape_supervisor_restarts_total",
    }
}

fn gauge_name(metric: GaugeMetric) -> &'static str {
    match metric {
        GaugeMetric::LastTickLagMs => "tape_last_tick_lag_ms",
        GaugeMetric::SourceConnected => "tape_source_connected",
    }
}

/// Install the Prometheus exporter on `0.0.0.0:port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;

    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Add to a counter
pub fn increment(metric: CounterMetric, by: u64) {
    metrics::counter!(counter_name(metric)).increment(by);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(gauge_name(metric)).set(value);
}
