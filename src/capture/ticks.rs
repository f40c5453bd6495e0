//! Tick capture: dedup, enrichment and durable append

use super::{session_at, CaptureError, CaptureState, TickCursor};
use crate::backoff::Backoff;
use crate::data::{format_time, AppendLog, TickRecord};
use crate::source::{with_timeout, MarketDataSource, RawTick, SourceError};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use chrono::{DateTime, Timelike};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const FLAG_NAMES: [(u32, &str); 6] = [
    (0x02, "BID"),
    (0x04, "ASK"),
    (0x08, "LAST"),
    (0x10, "VOLUME"),
    (0x20, "BUY"),
    (0x40, "SELL"),
];

/// Human-readable form of the tick flag bits, e.g. `BID|ASK`
pub fn flag_description(flags: u32) -> String {
    let parts: Vec<&str> = FLAG_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if parts.is_empty() {
        "TICK".to_string()
    } else {
        parts.join("|")
    }
}

/// Drop every tick at or before `cursor`, including repeats within the batch.
///
/// Returns the ticks to append, oldest first, and the cursor after them.
pub fn dedup_ticks(cursor: TickCursor, mut ticks: Vec<RawTick>) -> (Vec<RawTick>, TickCursor) {
    ticks.sort_by_key(|t| (t.time_msc, t.seq));

    let mut cursor = cursor;
    let mut fresh = Vec::with_capacity(ticks.len());
    for tick in ticks {
        if cursor.admits(&tick) {
            cursor = TickCursor::after(&tick);
            fresh.push(tick);
        }
    }
    (fresh, cursor)
}

/// Derives the research fields of a tick
#[derive(Debug, Clone)]
pub struct TickEnricher {
    point: Decimal,
}

impl TickEnricher {
    /// `point` is the instrument's minimal price increment
    pub fn new(point: Decimal) -> Self {
        Self { point }
    }

    pub fn point(&self) -> Decimal {
        self.point
    }

    pub fn set_point(&mut self, point: Decimal) {
        self.point = point;
    }

    pub fn enrich(&self, tick: &RawTick) -> TickRecord {
        let time = DateTime::from_timestamp_millis(tick.time_msc).unwrap_or_default();
        let raw_spread = tick.ask - tick.bid;

        TickRecord {
            time_msc: tick.time_msc,
            time_dt: format_time(time),
            bid: tick.bid,
            ask: tick.ask,
            last: tick.last,
            volume: tick.volume,
            volume_real: tick.volume_real,
            flags: tick.flags,
            flag_desc: flag_description(tick.flags),
            spread: raw_spread
                .checked_div(self.point)
                .unwrap_or_default()
                .round_dp(1),
            spread_pct: raw_spread
                .checked_div(tick.bid)
                .map(|ratio| ratio * Decimal::ONE_HUNDRED)
                .unwrap_or_default()
                .round_dp(6),
            mid: ((tick.bid + tick.ask) / Decimal::TWO).round_dp(5),
            bid_ask_imbalance: tick.bid.checked_div(tick.ask).unwrap_or_default().round_dp(6),
            session: session_at(time),
            day_of_week: time.format("%A").to_string(),
            hour_utc: time.hour(),
            seq: tick.seq,
        }
    }
}

/// Result of one tick poll
#[derive(Debug, Clone)]
pub enum TickPoll {
    /// Ticks were appended and flushed; `cursor` is the new position
    Appended { count: usize, cursor: TickCursor },
    /// Source answered with nothing new
    Idle,
    /// Waiting out a reconnect delay, source not called
    Backoff,
    /// Source call failed; retried after a delay
    Failed(SourceError),
}

/// Polls ticks since a cursor and appends the new ones to the tick log
pub struct TickCapture {
    symbol: String,
    source: Arc<dyn MarketDataSource>,
    log: AppendLog<TickRecord>,
    enricher: TickEnricher,
    batch_size: usize,
    call_timeout: Duration,
    state: CaptureState,
    backoff: Backoff,
    retry_at: Option<Instant>,
    wedged: bool,
    total_ticks: u64,
}

impl TickCapture {
    pub fn open(
        symbol: impl Into<String>,
        source: Arc<dyn MarketDataSource>,
        path: impl Into<PathBuf>,
        enricher: TickEnricher,
        batch_size: usize,
        call_timeout: Duration,
        backoff: Backoff,
    ) -> Result<Self, CaptureError> {
        let log = AppendLog::open(path).map_err(|e| CaptureError::write("tick", e))?;
        Ok(Self {
            symbol: symbol.into(),
            source,
            log,
            enricher,
            batch_size: batch_size.max(1),
            call_timeout,
            state: CaptureState::Polling,
            backoff,
            retry_at: None,
            wedged: false,
            total_ticks: 0,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether the last source call hung until its timeout
    pub fn is_wedged(&self) -> bool {
        self.wedged
    }

    /// Ticks appended by this process
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn enricher_mut(&mut self) -> &mut TickEnricher {
        &mut self.enricher
    }

    pub fn stop(&mut self) {
        self.state = CaptureState::Stopping;
    }

    /// Request ticks since `cursor`, append the new ones durably.
    ///
    /// Only a failed append is an error; source failures move the capture to
    /// `DISCONNECTED` and schedule a retry.
    pub async fn poll(&mut self, cursor: TickCursor) -> Result<TickPoll, CaptureError> {
        if let Some(retry_at) = self.retry_at {
            if Instant::now() < retry_at {
                return Ok(TickPoll::Backoff);
            }
        }

        let result = with_timeout(
            self.call_timeout,
            self.source
                .ticks_since(&self.symbol, cursor.time_msc, self.batch_size),
        )
        .await;

        let ticks = match result {
            Ok(ticks) => ticks,
            Err(e) => {
                self.on_source_error(&e);
                return Ok(TickPoll::Failed(e));
            }
        };

        if self.state == CaptureState::Disconnected {
            tracing::info!(
                failed_attempts = self.backoff.attempts(),
                "Terminal reachable again, resuming tick capture"
            );
        }
        self.state = CaptureState::Polling;
        self.backoff.reset();
        self.retry_at = None;
        self.wedged = false;
        telemetry::set_gauge(GaugeMetric::SourceConnected, 1.0);

        let received = ticks.len();
        let (fresh, next) = dedup_ticks(cursor, ticks);
        if received > fresh.len() {
            tracing::trace!(dropped = received - fresh.len(), "Skipped already captured ticks");
        }
        if fresh.is_empty() {
            return Ok(TickPoll::Idle);
        }

        self.state = CaptureState::Appending;
        let records: Vec<TickRecord> = fresh.iter().map(|t| self.enricher.enrich(t)).collect();
        self.log
            .append(&records)
            .map_err(|e| CaptureError::write("tick", e))?;
        self.state = CaptureState::Polling;

        let count = records.len();
        self.total_ticks += count as u64;
        telemetry::increment(CounterMetric::TicksWritten, count as u64);
        tracing::debug!(count, last_time_msc = next.time_msc, "Appended ticks");

        Ok(TickPoll::Appended {
            count,
            cursor: next,
        })
    }

    fn on_source_error(&mut self, error: &SourceError) {
        self.wedged = matches!(error, SourceError::Timeout(_));
        self.state = CaptureState::Disconnected;
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);

        telemetry::increment(CounterMetric::SourceErrors, 1);
        telemetry::set_gauge(GaugeMetric::SourceConnected, 0.0);
        tracing::warn!(
            error = %error,
            attempt = self.backoff.attempts(),
            retry_in_ms = delay.as_millis() as u64,
            "Tick request failed, capture disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::last_records;
    use crate::source::InMemorySource;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn tick(seq: u64, time_msc: i64) -> RawTick {
        RawTick {
            seq,
            time_msc,
            bid: dec!(2350.10),
            ask: dec!(2350.35),
            last: dec!(0),
            volume: 0,
            volume_real: dec!(0),
            flags: 0x06,
        }
    }

    fn open_capture(dir: &TempDir, source: Arc<InMemorySource>) -> TickCapture {
        TickCapture::open(
            "XAUUSD",
            source,
            dir.path().join("ticks.csv"),
            TickEnricher::new(dec!(0.01)),
            1000,
            Duration::from_millis(200),
            Backoff::new(Duration::from_millis(20), Duration::from_millis(100)),
        )
        .unwrap()
    }

    #[test]
    fn test_flag_description() {
        assert_eq!(flag_description(0), "TICK");
        assert_eq!(flag_description(0x06), "BID|ASK");
        assert_eq!(flag_description(0x02 | 0x08 | 0x40), "BID|LAST|SELL");
        assert_eq!(flag_description(0x01), "TICK");
    }

    #[test]
    fn test_enrich_derived_fields() {
        let enricher = TickEnricher::new(dec!(0.01));
        // 2024-05-06 13:30:00.250 UTC, a Monday
        let record = enricher.enrich(&RawTick {
            time_msc: 1_715_002_200_250,
            ..tick(9, 0)
        });

        assert_eq!(record.spread, dec!(25));
        assert_eq!(record.mid, dec!(2350.225));
        assert_eq!(record.spread_pct, dec!(0.010638));
        assert_eq!(record.bid_ask_imbalance, dec!(0.999894));
        assert_eq!(record.flag_desc, "BID|ASK");
        assert_eq!(record.session, crate::capture::Session::LondonNyOverlap);
        assert_eq!(record.day_of_week, "Monday");
        assert_eq!(record.hour_utc, 13);
        assert_eq!(record.time_dt, "2024-05-06T13:30:00.250Z");
        assert_eq!(record.seq, 9);
    }

    #[test]
    fn test_enrich_zero_prices_do_not_panic() {
        let enricher = TickEnricher::new(dec!(0));
        let record = enricher.enrich(&RawTick {
            bid: dec!(0),
            ask: dec!(0),
            ..tick(1, 1_000)
        });
        assert_eq!(record.spread, dec!(0));
        assert_eq!(record.spread_pct, dec!(0));
        assert_eq!(record.bid_ask_imbalance, dec!(0));
    }

    #[test]
    fn test_dedup_resume_scenario() {
        let (fresh, cursor) = dedup_ticks(
            TickCursor::at(101),
            vec![tick(1, 100), tick(2, 101), tick(3, 103)],
        );
        assert_eq!(fresh.iter().map(|t| t.time_msc).collect::<Vec<_>>(), vec![103]);
        assert_eq!(cursor, TickCursor::after(&tick(3, 103)));
    }

    #[test]
    fn test_dedup_drops_repeats_within_batch() {
        let (fresh, _) = dedup_ticks(
            TickCursor::at(0),
            vec![tick(2, 101), tick(1, 100), tick(2, 101), tick(3, 101)],
        );
        assert_eq!(fresh.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_poll_appends_only_new_ticks() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.push_ticks([tick(1, 100), tick(2, 101), tick(3, 103)]);
        let mut capture = open_capture(&dir, source.clone());

        let poll = capture.poll(TickCursor::at(101)).await.unwrap();
        let cursor = match poll {
            TickPoll::Appended { count, cursor } => {
                assert_eq!(count, 1);
                cursor
            }
            other => panic!("unexpected poll result: {:?}", other),
        };

        assert!(matches!(capture.poll(cursor).await.unwrap(), TickPoll::Idle));
        assert_eq!(source.tick_requests(), vec![101, 103]);

        let rows: Vec<TickRecord> = last_records(&dir.path().join("ticks.csv"), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time_msc, 103);
        assert_eq!(capture.total_ticks(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_backs_off_then_recovers() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.set_disconnected(true);
        let mut capture = open_capture(&dir, source.clone());

        let poll = capture.poll(TickCursor::at(0)).await.unwrap();
        assert!(matches!(poll, TickPoll::Failed(SourceError::Disconnected(_))));
        assert_eq!(capture.state(), CaptureState::Disconnected);
        assert!(!capture.is_wedged());

        assert!(matches!(capture.poll(TickCursor::at(0)).await.unwrap(), TickPoll::Backoff));

        source.set_disconnected(false);
        source.push_ticks([tick(1, 100)]);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let poll = capture.poll(TickCursor::at(0)).await.unwrap();
        assert!(matches!(poll, TickPoll::Appended { count: 1, .. }));
        assert_eq!(capture.state(), CaptureState::Polling);
    }

    #[tokio::test]
    async fn test_hanging_source_marks_wedged() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.set_hanging(true);
        let mut capture = open_capture(&dir, source);

        let poll = capture.poll(TickCursor::at(0)).await.unwrap();
        assert!(matches!(poll, TickPoll::Failed(SourceError::Timeout(_))));
        assert!(capture.is_wedged());
    }
}
