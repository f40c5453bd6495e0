//! Symbol contract snapshots

use super::CaptureError;
use crate::data::{format_time, AppendLog, SymbolRecord};
use crate::source::{with_timeout, MarketDataSource, SymbolInfo};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Periodically records the instrument's contract specification
pub struct MetadataLogger {
    symbol: String,
    source: Arc<dyn MarketDataSource>,
    log: AppendLog<SymbolRecord>,
    call_timeout: Duration,
}

impl MetadataLogger {
    pub fn open(
        symbol: impl Into<String>,
        source: Arc<dyn MarketDataSource>,
        path: impl Into<PathBuf>,
        call_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let log = AppendLog::open(path).map_err(|e| CaptureError::write("metadata", e))?;
        Ok(Self {
            symbol: symbol.into(),
            source,
            log,
            call_timeout,
        })
    }

    /// Fetch and append one snapshot. Source failures are logged and yield `None`.
    pub async fn log_snapshot(&mut self, now: DateTime<Utc>) -> Result<Option<SymbolInfo>, CaptureError> {
        let info = match with_timeout(self.call_timeout, self.source.symbol_info(&self.symbol)).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "Symbol info request failed");
                return Ok(None);
            }
        };

        self.log
            .append_one(&to_record(&info, now))
            .map_err(|e| CaptureError::write("metadata", e))?;
        tracing::debug!(point = %info.point, digits = info.digits, "Logged symbol info");

        Ok(Some(info))
    }
}

fn to_record(info: &SymbolInfo, now: DateTime<Utc>) -> SymbolRecord {
    let info = info.clone();
    SymbolRecord {
        logged_at: format_time(now),
        name: info.name,
        description: info.description,
        currency_base: info.currency_base,
        currency_profit: info.currency_profit,
        currency_margin: info.currency_margin,
        digits: info.digits,
        point: info.point,
        trade_tick_size: info.trade_tick_size,
        trade_tick_value: info.trade_tick_value,
        trade_contract_size: info.trade_contract_size,
        volume_min: info.volume_min,
        volume_max: info.volume_max,
        volume_step: info.volume_step,
        spread: info.spread,
        spread_float: info.spread_float,
        swap_long: info.swap_long,
        swap_short: info.swap_short,
        trade_stops_level: info.trade_stops_level,
        trade_freeze_level: info.trade_freeze_level,
        margin_initial: info.margin_initial,
        margin_maintenance: info.margin_maintenance,
        margin_hedged: info.margin_hedged,
    }
}
