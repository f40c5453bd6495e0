//! In-memory market data source
//!
//! Serves scripted ticks, bars and books. Used for dry runs and tests; it can
//! also simulate a disconnected or hanging terminal.

use super::{
    Bar, DepthLevel, MarketDataSource, OrderBookSnapshot, RawTick, SourceError, SymbolInfo,
    Timeframe,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    ticks: Vec<RawTick>,
    bars: HashMap<Timeframe, Vec<Bar>>,
    depth: Option<Vec<DepthLevel>>,
    symbol: Option<SymbolInfo>,
    disconnected: bool,
    hanging: bool,
    tick_requests: Vec<i64>,
}

/// Scriptable source backed by vectors
#[derive(Debug, Default)]
pub struct InMemorySource {
    inner: Mutex<Inner>,
}

impl InMemorySource {
    /// Create an empty, connected source with depth unsupported
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn push_ticks(&self, ticks: impl IntoIterator<Item = RawTick>) {
        self.with_inner(|inner| {
            inner.ticks.extend(ticks);
            inner.ticks.sort_by_key(|t| (t.time_msc, t.seq));
        });
    }

    pub fn push_bars(&self, timeframe: Timeframe, bars: impl IntoIterator<Item = Bar>) {
        self.with_inner(|inner| {
            let series = inner.bars.entry(timeframe).or_default();
            series.extend(bars);
            series.sort_by_key(|b| b.open_time);
        });
    }

    /// Replace the bars of a timeframe, e.g. to update an in-progress bar
    pub fn set_bars(&self, timeframe: Timeframe, bars: Vec<Bar>) {
        self.with_inner(|inner| {
            inner.bars.insert(timeframe, bars);
        });
    }

    /// Serve a book; `None` makes depth unsupported
    pub fn set_depth(&self, levels: Option<Vec<DepthLevel>>) {
        self.with_inner(|inner| inner.depth = levels);
    }

    pub fn set_symbol_info(&self, info: SymbolInfo) {
        self.with_inner(|inner| inner.symbol = Some(info));
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.with_inner(|inner| inner.disconnected = disconnected);
    }

    /// Make every call block forever
    pub fn set_hanging(&self, hanging: bool) {
        self.with_inner(|inner| inner.hanging = hanging);
    }

    /// `from_time_msc` of every tick request served so far
    pub fn tick_requests(&self) -> Vec<i64> {
        self.with_inner(|inner| inner.tick_requests.clone())
    }

    async fn gate(&self) -> Result<(), SourceError> {
        let (hanging, disconnected) = self.with_inner(|inner| (inner.hanging, inner.disconnected));
        if hanging {
            std::future::pending::<()>().await;
        }
        if disconnected {
            return Err(SourceError::Disconnected("terminal offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for InMemorySource {
    async fn ticks_since(
        &self,
        _symbol: &str,
        from_time_msc: i64,
        limit: usize,
    ) -> Result<Vec<RawTick>, SourceError> {
        self.gate().await?;
        Ok(self.with_inner(|inner| {
            inner.tick_requests.push(from_time_msc);
            inner
                .ticks
                .iter()
                .filter(|t| t.time_msc >= from_time_msc)
                .take(limit)
                .cloned()
                .collect()
        }))
    }

    async fn bars_since(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, SourceError> {
        self.gate().await?;
        let from_secs = from.timestamp();
        Ok(self.with_inner(|inner| {
            inner
                .bars
                .get(&timeframe)
                .map(|bars| {
                    bars.iter()
                        .filter(|b| b.open_time >= from_secs)
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn depth_snapshot(&self, _symbol: &str) -> Result<OrderBookSnapshot, SourceError> {
        self.gate().await?;
        self.with_inner(|inner| match &inner.depth {
            Some(levels) => Ok(OrderBookSnapshot {
                levels: levels.clone(),
            }),
            None => Err(SourceError::Unsupported("market depth")),
        })
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError> {
        self.gate().await?;
        self.with_inner(|inner| inner.symbol.clone())
            .ok_or_else(|| SourceError::Malformed(format!("no symbol info for {}", symbol)))
    }
}
