//! CLI interface for tape-keeper
//!
//! Provides subcommands for:
//! - `capture`: Run the capture process in the foreground
//! - `supervise`: Run the watchdog that keeps the capture process alive
//! - `export`: Convert the tick log to Parquet
//! - `status`: Show what is on disk and whether capture is running
//! - `config`: Show the effective configuration

mod capture;
mod export;
mod status;
mod supervise;

pub use capture::CaptureArgs;
pub use export::ExportArgs;
pub use status::StatusArgs;
pub use supervise::SuperviseArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tape-keeper")]
#[command(about = "Gap-free tick, bar and depth capture with a supervising watchdog")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture ticks, bars and depth until stopped
    Capture(CaptureArgs),
    /// Start and watch the capture process
    Supervise(SuperviseArgs),
    /// Export the tick log to Parquet
    Export(ExportArgs),
    /// Show capture state
    Status(StatusArgs),
    /// Show configuration
    Config,
}
