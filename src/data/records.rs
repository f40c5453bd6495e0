//! Row schemas of the CSV logs
//!
//! Field order is the column order. Columns may only ever be added at the end.

use crate::capture::Session;
use crate::source::BookSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Enriched tick, one row of the tick log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub time_msc: i64,
    pub time_dt: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: u64,
    pub volume_real: Decimal,
    pub flags: u32,
    pub flag_desc: String,
    /// Spread in instrument points
    pub spread: Decimal,
    /// Spread as a percentage of bid
    pub spread_pct: Decimal,
    pub mid: Decimal,
    pub bid_ask_imbalance: Decimal,
    pub session: Session,
    pub day_of_week: String,
    pub hour_utc: u32,
    pub seq: u64,
}

/// Closed OHLCV bar, one row of a per-timeframe bar log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    /// Open time, seconds since the Unix epoch
    pub time: i64,
    pub time_dt: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_volume: u64,
    pub real_volume: Decimal,
    pub spread: Decimal,
}

/// One order book level of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthRecord {
    /// Snapshot time shared by every row of the snapshot
    pub time_msc: i64,
    pub time_dt: String,
    #[serde(rename = "type")]
    pub side: BookSide,
    pub price: Decimal,
    pub volume: Decimal,
    /// Number of rows in this snapshot
    pub levels: u32,
}

/// Trading session transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub time_dt: String,
    pub session: Session,
    pub prev: Option<Session>,
    pub weekday: String,
}

/// Liveness sample read by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub time_dt: String,
    pub last_time_msc: i64,
    pub last_tick_dt: String,
    /// Ticks appended since the previous heartbeat
    pub ticks_batch: u64,
    pub total_ticks: u64,
    pub tick_mb: f64,
    pub ohlcv_mb: f64,
    pub dom_mb: f64,
    pub session: Session,
    /// Capture loop state when the sample was taken
    pub state: String,
    pub run_id: String,
}

/// Contract specification snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub logged_at: String,
    pub name: String,
    pub description: String,
    pub currency_base: String,
    pub currency_profit: String,
    pub currency_margin: String,
    pub digits: u32,
    pub point: Decimal,
    pub trade_tick_size: Decimal,
    pub trade_tick_value: Decimal,
    pub trade_contract_size: Decimal,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub spread: i64,
    pub spread_float: bool,
    pub swap_long: Decimal,
    pub swap_short: Decimal,
    pub trade_stops_level: i64,
    pub trade_freeze_level: i64,
    pub margin_initial: Decimal,
    pub margin_maintenance: Decimal,
    pub margin_hedged: Decimal,
}

/// Supervisor activity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorRecord {
    pub time_dt: String,
    pub event: String,
    pub pid: Option<u32>,
    pub attempt: u32,
    pub reason: String,
}
