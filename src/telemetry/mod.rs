//! Telemetry module
//!
//! Structured logging and Prometheus metrics

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{increment, init_metrics, set_gauge, CounterMetric, GaugeMetric};

use crate::config::TelemetryConfig;

/// Guard that keeps telemetry alive for the life of the process
pub struct TelemetryGuard {
    _priv: (),
}

/// Initialize all telemetry subsystems
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    init_logging(&config.log_level, config.log_format)?;

    if let Some(port) = config.metrics_port {
        init_metrics(port)?;
    }

    Ok(TelemetryGuard { _priv: () })
}
