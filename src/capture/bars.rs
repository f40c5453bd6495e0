//! Closed-bar aggregation per timeframe

use super::CaptureError;
use crate::data::{format_time, last_record, AppendLog, BarRecord, DataLayout};
use crate::source::{with_timeout, Bar, MarketDataSource, Timeframe};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Keep only bars that are closed at `now` and newer than `last_open`.
///
/// Output is sorted by open time with duplicates removed.
pub fn select_closed_bars(
    mut bars: Vec<Bar>,
    last_open: Option<i64>,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Vec<Bar> {
    bars.sort_by_key(|b| b.open_time);
    bars.dedup_by_key(|b| b.open_time);
    bars.retain(|b| last_open.map_or(true, |last| b.open_time > last) && b.is_closed(timeframe, now));
    bars
}

fn to_record(bar: &Bar) -> BarRecord {
    BarRecord {
        time: bar.open_time,
        time_dt: bar.opened_at().map(format_time).unwrap_or_default(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        tick_volume: bar.tick_volume,
        real_volume: bar.real_volume,
        spread: bar.spread,
    }
}

/// Appends finished bars to one log per timeframe
pub struct BarAggregator {
    symbol: String,
    source: Arc<dyn MarketDataSource>,
    logs: BTreeMap<Timeframe, AppendLog<BarRecord>>,
    call_timeout: Duration,
}

impl BarAggregator {
    pub fn open(
        layout: &DataLayout,
        source: Arc<dyn MarketDataSource>,
        timeframes: &[Timeframe],
        call_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let mut logs = BTreeMap::new();
        for &tf in timeframes {
            let log = AppendLog::open(layout.bar_log(tf)).map_err(|e| CaptureError::write("bar", e))?;
            logs.insert(tf, log);
        }
        Ok(Self {
            symbol: layout.symbol().to_string(),
            source,
            logs,
            call_timeout,
        })
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.logs.keys().copied()
    }

    /// Open time of the newest bar already in the log of `timeframe`
    pub fn logged_tail(&self, timeframe: Timeframe) -> Result<Option<i64>, CaptureError> {
        let Some(log) = self.logs.get(&timeframe) else {
            return Ok(None);
        };
        let last = last_record::<BarRecord>(log.path()).map_err(|e| CaptureError::write("bar", e))?;
        Ok(last.map(|r| r.time))
    }

    /// Fetch bars after `last_open` and append the closed ones.
    ///
    /// Without a checkpoint the fetch starts one lookback window before
    /// `now`. Returns the open time of the newest appended bar, if any.
    pub async fn sync_timeframe(
        &mut self,
        timeframe: Timeframe,
        last_open: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, CaptureError> {
        let Some(log) = self.logs.get_mut(&timeframe) else {
            return Ok(None);
        };

        let lookback = timeframe.default_lookback();
        let from = match last_open.and_then(|t| DateTime::from_timestamp(t, 0)) {
            Some(open) => open,
            None => now - timeframe.nominal_duration() * lookback as i32,
        };

        let bars = with_timeout(
            self.call_timeout,
            self.source
                .bars_since(&self.symbol, timeframe, from, lookback as usize + 1),
        )
        .await?;

        let closed = select_closed_bars(bars, last_open, timeframe, now);
        let Some(newest) = closed.last().map(|b| b.open_time) else {
            return Ok(None);
        };

        let records: Vec<BarRecord> = closed.iter().map(to_record).collect();
        log.append(&records).map_err(|e| CaptureError::write("bar", e))?;

        telemetry::increment(CounterMetric::BarsWritten, records.len() as u64);
        tracing::debug!(timeframe = %timeframe, count = records.len(), newest, "Appended closed bars");

        Ok(Some(newest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::last_records;
    use crate::source::{InMemorySource, SourceError};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn bar(open_time: i64) -> Bar {
        Bar {
            open_time,
            open: dec!(2350.0),
            high: dec!(2351.5),
            low: dec!(2349.2),
            close: dec!(2350.8),
            tick_volume: 120,
            real_volume: dec!(0),
            spread: dec!(18),
        }
    }

    fn minute(m: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 5, 6, 10, m, 0).unwrap().timestamp()
    }

    #[test]
    fn test_in_progress_bar_is_excluded() {
        // 10:02:30, the 10:02 bar is still forming
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 10, 2, 30).unwrap();
        let bars = vec![bar(minute(2)), bar(minute(0)), bar(minute(1))];

        let closed = select_closed_bars(bars, None, Timeframe::M1, now);
        assert_eq!(
            closed.iter().map(|b| b.open_time).collect::<Vec<_>>(),
            vec![minute(0), minute(1)]
        );
    }

    #[test]
    fn test_already_logged_and_duplicate_bars_are_skipped() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 10, 5, 0).unwrap();
        let bars = vec![bar(minute(1)), bar(minute(2)), bar(minute(2)), bar(minute(3))];

        let closed = select_closed_bars(bars, Some(minute(1)), Timeframe::M1, now);
        assert_eq!(
            closed.iter().map(|b| b.open_time).collect::<Vec<_>>(),
            vec![minute(2), minute(3)]
        );
    }

    #[test]
    fn test_bar_closing_exactly_now_is_not_final() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 10, 1, 0).unwrap();
        assert!(select_closed_bars(vec![bar(minute(0))], None, Timeframe::M1, now).is_empty());
    }

    #[tokio::test]
    async fn test_sync_appends_each_bar_once() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path(), "XAUUSD");
        let source = Arc::new(InMemorySource::new());
        source.set_bars(Timeframe::M1, vec![bar(minute(0)), bar(minute(1)), bar(minute(2))]);

        let mut bars = BarAggregator::open(
            &layout,
            source.clone(),
            &[Timeframe::M1],
            Duration::from_secs(1),
        )
        .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 6, 10, 2, 30).unwrap();
        let newest = bars.sync_timeframe(Timeframe::M1, None, now).await.unwrap();
        assert_eq!(newest, Some(minute(1)));

        let later = Utc.with_ymd_and_hms(2024, 5, 6, 10, 3, 5).unwrap();
        let newest = bars.sync_timeframe(Timeframe::M1, newest, later).await.unwrap();
        assert_eq!(newest, Some(minute(2)));
        assert_eq!(bars.sync_timeframe(Timeframe::M1, newest, later).await.unwrap(), None);

        let rows: Vec<BarRecord> = last_records(&layout.bar_log(Timeframe::M1), 10).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.time).collect::<Vec<_>>(),
            vec![minute(0), minute(1), minute(2)]
        );
        assert_eq!(bars.logged_tail(Timeframe::M1).unwrap(), Some(minute(2)));
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path(), "XAUUSD");
        let source = Arc::new(InMemorySource::new());
        source.set_disconnected(true);

        let mut bars =
            BarAggregator::open(&layout, source, &[Timeframe::H1], Duration::from_secs(1)).unwrap();
        let err = bars
            .sync_timeframe(Timeframe::H1, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Source(SourceError::Disconnected(_))));
    }
}
