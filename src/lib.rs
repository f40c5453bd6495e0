//! tape-keeper: gap-free market data capture for a single instrument
//!
//! This library provides the core components for:
//! - Resumable tick capture with crash-safe checkpoints
//! - Closed-bar capture across timeframes
//! - Order book snapshots
//! - Trading session tracking and heartbeats
//! - A watchdog that restarts a stalled or dead capture process
//! - Parquet export of the tick log
//! - Structured logging and Prometheus metrics

pub mod backoff;
pub mod capture;
pub mod cli;
pub mod config;
pub mod data;
pub mod source;
pub mod supervisor;
pub mod telemetry;
