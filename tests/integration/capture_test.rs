//! Capture process end to end against the in-memory source

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tape_keeper::capture::{CaptureRunner, CaptureSummary, ResumeState, ResumeStore, TickCursor};
use tape_keeper::config::Config;
use tape_keeper::data::{last_records, BarRecord, DataLayout, DepthRecord, TickRecord};
use tape_keeper::source::{Bar, BookSide, DepthLevel, InMemorySource, RawTick, Timeframe};
use tempfile::TempDir;
use tokio::sync::watch;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.capture.tick_poll_ms = 10;
    config.capture.depth_interval_secs = 1;
    config.capture.timeframes = vec![Timeframe::M1];
    config.capture.backoff_initial_ms = 20;
    config.capture.backoff_max_ms = 40;
    config.source.request_timeout_ms = 200;
    config
}

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

fn layout(dir: &TempDir) -> DataLayout {
    DataLayout::new(dir.path(), "XAUUSD")
}

fn checkpoint(dir: &TempDir, cursor: TickCursor, now: DateTime<Utc>) {
    ResumeStore::new(layout(dir).resume_state(), "XAUUSD")
        .save(&ResumeState::fresh("XAUUSD", now).with_tick_cursor(cursor, now))
        .unwrap();
}

async fn run_for(config: &Config, source: Arc<InMemorySource>, duration: Duration) -> CaptureSummary {
    let runner = CaptureRunner::open(config, source, Utc::now()).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));
    tokio::time::sleep(duration).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap()
}

fn logged_ticks(dir: &TempDir) -> Vec<TickRecord> {
    last_records(&layout(dir).tick_log(), 10_000).unwrap()
}

#[tokio::test]
async fn test_resume_appends_only_ticks_after_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let now = Utc::now();
    let base = now.timestamp_millis() - 60_000;

    checkpoint(&dir, TickCursor::at(base + 101), now);
    let source = Arc::new(InMemorySource::new());
    source.push_ticks([tick(1, base + 100), tick(2, base + 101), tick(3, base + 103)]);

    run_for(&config, source.clone(), Duration::from_millis(120)).await;

    let times: Vec<i64> = logged_ticks(&dir).iter().map(|t| t.time_msc - base).collect();
    assert_eq!(times, vec![103]);
    assert_eq!(source.tick_requests().first(), Some(&(base + 101)));
}

#[tokio::test]
async fn test_crash_between_append_and_checkpoint_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let now = Utc::now();
    let base = now.timestamp_millis() - 60_000;

    checkpoint(&dir, TickCursor::at(base), now);
    let source = Arc::new(InMemorySource::new());
    source.push_ticks([tick(1, base + 1), tick(2, base + 2), tick(3, base + 2)]);
    run_for(&config, source.clone(), Duration::from_millis(120)).await;
    assert_eq!(logged_ticks(&dir).len(), 3);

    // Crash: the checkpoint never saw the appended ticks, and a forced kill
    // left half a row behind.
    checkpoint(&dir, TickCursor::at(base), now);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(layout(&dir).tick_log())
        .unwrap();
    file.write_all(b"1715002200999,2024-05-06T13:3").unwrap();
    drop(file);

    source.push_ticks([tick(4, base + 5)]);
    let summary = run_for(&config, source, Duration::from_millis(120)).await;
    assert_eq!(summary.ticks_written, 1);

    let ticks = logged_ticks(&dir);
    let keys: Vec<(i64, u64)> = ticks.iter().map(|t| (t.time_msc - base, t.seq)).collect();
    assert_eq!(keys, vec![(1, 1), (2, 2), (2, 3), (5, 4)]);
}

#[tokio::test]
async fn test_disconnection_leaves_no_fabricated_rows() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let now = Utc::now();
    let base = now.timestamp_millis() - 60_000;

    checkpoint(&dir, TickCursor::at(base), now);
    let source = Arc::new(InMemorySource::new());
    source.set_disconnected(true);

    let runner = CaptureRunner::open(&config, source.clone(), Utc::now()).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(stop_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(logged_ticks(&dir).is_empty());

    source.push_ticks([tick(1, base + 10), tick(2, base + 20)]);
    source.set_disconnected(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let times: Vec<i64> = logged_ticks(&dir).iter().map(|t| t.time_msc - base).collect();
    assert_eq!(times, vec![10, 20]);
}

#[tokio::test]
async fn test_only_closed_bars_are_written() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.capture.timeframes = vec![Timeframe::H1];
    let hour = (Utc::now().timestamp() / 3600) * 3600;

    let bar = |open_time: i64| Bar {
        open_time,
        open: dec!(2350.0),
        high: dec!(2351.0),
        low: dec!(2349.0),
        close: dec!(2350.5),
        tick_volume: 10,
        real_volume: dec!(0),
        spread: dec!(20),
    };
    let source = Arc::new(InMemorySource::new());
    source.set_bars(
        Timeframe::H1,
        vec![bar(hour - 7200), bar(hour - 3600), bar(hour)],
    );

    run_for(&config, source, Duration::from_millis(100)).await;

    let bars: Vec<BarRecord> = last_records(&layout(&dir).bar_log(Timeframe::H1), 10).unwrap();
    let opens: Vec<i64> = bars.iter().map(|b| b.time).collect();
    assert_eq!(opens, vec![hour - 7200, hour - 3600]);

    let state = ResumeStore::new(layout(&dir).resume_state(), "XAUUSD")
        .try_load(Utc::now())
        .unwrap()
        .unwrap();
    assert_eq!(state.last_bar(Timeframe::H1), Some(hour - 3600));
}

#[tokio::test]
async fn test_depth_snapshot_rows_are_grouped() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let source = Arc::new(InMemorySource::new());
    source.set_depth(Some(vec![
        DepthLevel { side: BookSide::Ask, price: dec!(2350.40), volume: dec!(2) },
        DepthLevel { side: BookSide::Bid, price: dec!(2350.10), volume: dec!(5) },
    ]));

    run_for(&config, source, Duration::from_millis(100)).await;

    let rows: Vec<DepthRecord> = last_records(&layout(&dir).depth_log(), 10).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].time_msc, rows[1].time_msc);
    assert_eq!(rows[0].side, BookSide::Ask);
    assert!(rows.iter().all(|r| r.levels == 2));
}
