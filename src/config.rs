//! Configuration types for tape-keeper

use crate::source::Timeframe;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub supervisor: SupervisorConfig,
    pub telemetry: TelemetryConfig,
}

/// Terminal bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for every request to the terminal
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    crate::source::DEFAULT_BRIDGE_URL.to_string()
}
fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Capture process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Point size used until the terminal reports symbol info
    #[serde(default = "default_point")]
    pub point: Decimal,

    #[serde(default = "default_tick_poll_ms")]
    pub tick_poll_ms: u64,

    /// Maximum ticks requested per poll
    #[serde(default = "default_tick_batch")]
    pub tick_batch: usize,

    #[serde(default = "default_bar_interval_secs")]
    pub bar_interval_secs: u64,

    #[serde(default = "default_depth_interval_secs")]
    pub depth_interval_secs: u64,

    #[serde(default = "default_true")]
    pub depth_enabled: bool,

    #[serde(default = "default_metadata_interval_secs")]
    pub metadata_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    /// First reconnect delay
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Reconnect delay cap
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_symbol() -> String {
    "XAUUSD".to_string()
}
fn default_point() -> Decimal {
    Decimal::new(1, 2) // 0.01
}
fn default_tick_poll_ms() -> u64 {
    250
}
fn default_tick_batch() -> usize {
    1000
}
fn default_bar_interval_secs() -> u64 {
    60
}
fn default_depth_interval_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_metadata_interval_secs() -> u64 {
    3600
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::ALL.to_vec()
}
fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            point: default_point(),
            tick_poll_ms: default_tick_poll_ms(),
            tick_batch: default_tick_batch(),
            bar_interval_secs: default_bar_interval_secs(),
            depth_interval_secs: default_depth_interval_secs(),
            depth_enabled: true,
            metadata_interval_secs: default_metadata_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            timeframes: default_timeframes(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Watchdog configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Heartbeat age after which the capture counts as stalled
    #[serde(default = "default_stall_secs")]
    pub stall_secs: u64,

    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Time a freshly started capture has to write its first heartbeat
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,

    /// Wait between the graceful stop signal and a forced kill
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,

    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Leave the capture process running when the supervisor stops
    #[serde(default)]
    pub leave_running_on_exit: bool,

    /// Command that starts the capture process; defaults to this binary's
    /// `capture` subcommand
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_stall_secs() -> u64 {
    60
}
fn default_poll_secs() -> u64 {
    5
}
fn default_startup_grace_secs() -> u64 {
    30
}
fn default_terminate_grace_secs() -> u64 {
    10
}
fn default_max_restarts() -> u32 {
    5
}
fn default_restart_window_secs() -> u64 {
    600
}
fn default_backoff_initial_secs() -> u64 {
    5
}
fn default_backoff_max_secs() -> u64 {
    300
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stall_secs: default_stall_secs(),
            poll_secs: default_poll_secs(),
            startup_grace_secs: default_startup_grace_secs(),
            terminate_grace_secs: default_terminate_grace_secs(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window_secs(),
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            leave_running_on_exit: false,
            command: None,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [source]
            base_url = "http://10.0.0.5:8765"
            request_timeout_ms = 2500

            [capture]
            symbol = "EURUSD"
            point = "0.00001"
            timeframes = ["M1", "H1", "D1"]
            depth_enabled = false

            [storage]
            data_dir = "/var/lib/tape"

            [supervisor]
            stall_secs = 90
            command = ["/usr/local/bin/tape-keeper", "capture"]

            [telemetry]
            log_level = "debug"
            log_format = "json"
            metrics_port = 9100
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.source.base_url, "http://10.0.0.5:8765");
        assert_eq!(config.source.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.capture.symbol, "EURUSD");
        assert_eq!(config.capture.point, Decimal::new(1, 5));
        assert_eq!(
            config.capture.timeframes,
            vec![Timeframe::M1, Timeframe::H1, Timeframe::D1]
        );
        assert!(!config.capture.depth_enabled);
        assert_eq!(config.capture.tick_batch, 1000);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/tape"));
        assert_eq!(config.supervisor.stall_secs, 90);
        assert_eq!(config.supervisor.poll_secs, 5);
        assert_eq!(config.supervisor.command.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert_eq!(config.telemetry.metrics_port, Some(9100));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.capture.symbol, "XAUUSD");
        assert_eq!(config.capture.tick_poll_ms, 250);
        assert_eq!(config.capture.timeframes.len(), 9);
        assert_eq!(config.capture.backoff_max_ms, 30_000);
        assert_eq!(config.supervisor.max_restarts, 5);
        assert_eq!(config.supervisor.restart_window_secs, 600);
        assert!(!config.supervisor.leave_running_on_exit);
        assert_eq!(config.telemetry.metrics_port, None);
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config.toml.example")).unwrap();
        assert_eq!(config.capture.symbol, "XAUUSD");
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
