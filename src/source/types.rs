//! Market data source types

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single tick as delivered by the terminal, before enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    /// Terminal sequence id, strictly increasing per symbol
    pub seq: u64,
    /// Tick time in milliseconds since the Unix epoch
    pub time_msc: i64,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub last: Decimal,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub volume_real: Decimal,
    /// Raw tick flag bits
    #[serde(default)]
    pub flags: u32,
}

/// Bar resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    MN1,
}

impl Timeframe {
    /// Every captured timeframe, finest first
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::MN1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
        }
    }

    /// Length of one bar. Months are approximated as 31 days; use
    /// [`Timeframe::close_time`] for exact boundaries.
    pub fn nominal_duration(self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::weeks(1),
            Timeframe::MN1 => Duration::days(31),
        }
    }

    /// Instant at which a bar opened at `open` is final
    pub fn close_time(self, open: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::MN1 => open.checked_add_months(Months::new(1)),
            other => open.checked_add_signed(other.nominal_duration()),
        }
    }

    /// Bars to backfill when no checkpoint exists for this timeframe
    pub fn default_lookback(self) -> u32 {
        match self {
            Timeframe::W1 => 200,
            Timeframe::MN1 => 100,
            _ => 500,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown timeframe: {}", s))
    }
}

/// OHLCV bar as delivered by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time in seconds since the Unix epoch
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub tick_volume: u64,
    #[serde(default)]
    pub real_volume: Decimal,
    /// Average spread over the bar, in points
    #[serde(default)]
    pub spread: Decimal,
}

impl Bar {
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.open_time, 0)
    }

    /// Whether the bar's interval has fully elapsed at `now`
    pub fn is_closed(&self, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        self.opened_at()
            .and_then(|open| timeframe.close_time(open))
            .is_some_and(|close| close < now)
    }
}

/// Side of an order book row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    Bid,
    Ask,
}

/// One price level of an order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub side: BookSide,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Point-in-time view of the order book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub levels: Vec<DepthLevel>,
}

impl OrderBookSnapshot {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Contract specification of an instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolInfo {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timeframe_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("mn1".parse::<Timeframe>().unwrap(), Timeframe::MN1);
        assert!("M2".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_month_close_uses_calendar() {
        let open = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let close = Timeframe::MN1.close_time(open).unwrap();
        assert_eq!(close, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_bar_closed_only_after_interval() {
        let open = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let bar = Bar {
            open_time: open.timestamp(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            tick_volume: 1,
            real_volume: Decimal::ZERO,
            spread: Decimal::ZERO,
        };

        assert!(!bar.is_closed(Timeframe::M5, open + Duration::minutes(4)));
        assert!(!bar.is_closed(Timeframe::M5, open + Duration::minutes(5)));
        assert!(bar.is_closed(Timeframe::M5, open + Duration::seconds(301)));
        assert!(!bar.is_closed(Timeframe::H1, open + Duration::minutes(30)));
    }

    #[test]
    fn test_book_side_serializes_uppercase() {
        let json = serde_json::to_string(&BookSide::Bid).unwrap();
        assert_eq!(json, "\"BID\"");
    }

    #[test]
    fn test_symbol_info_tolerates_partial_payload() {
        let info: SymbolInfo = serde_json::from_str(r#"{"name":"XAUUSD","digits":2}"#).unwrap();
        assert_eq!(info.name, "XAUUSD");
        assert_eq!(info.digits, 2);
        assert_eq!(info.point, Decimal::ZERO);
    }
}
