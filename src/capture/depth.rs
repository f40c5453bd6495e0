//! Order book snapshots

use super::CaptureError;
use crate::data::{format_time, last_records, AppendLog, DepthRecord};
use crate::source::{with_timeout, MarketDataSource, SourceError};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Rows inspected when repairing a torn snapshot
const REPAIR_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Support {
    Unknown,
    Supported,
    Disabled,
}

/// Result of one depth sample
#[derive(Debug)]
pub enum DepthOutcome {
    Written { levels: usize },
    /// Book was empty, nothing written
    Empty,
    /// Depth is unavailable for this symbol; sampling stopped
    Disabled,
    Failed(SourceError),
}

/// Samples the order book and appends each snapshot as one group of rows
pub struct DepthSampler {
    symbol: String,
    source: Arc<dyn MarketDataSource>,
    log: AppendLog<DepthRecord>,
    call_timeout: Duration,
    support: Support,
}

impl DepthSampler {
    /// Open the depth log, dropping a trailing snapshot that was only
    /// partially written
    pub fn open(
        symbol: impl Into<String>,
        source: Arc<dyn MarketDataSource>,
        path: impl Into<PathBuf>,
        call_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let path = path.into();
        let tail: Vec<DepthRecord> =
            last_records(&path, REPAIR_WINDOW).map_err(|e| CaptureError::write("depth", e))?;
        let mut log = AppendLog::open(path).map_err(|e| CaptureError::write("depth", e))?;

        let torn = torn_group_len(&tail);
        if torn > 0 {
            tracing::warn!(rows = torn, "Dropping partially written depth snapshot");
            log.pop_records(torn).map_err(|e| CaptureError::write("depth", e))?;
        }

        Ok(Self {
            symbol: symbol.into(),
            source,
            log,
            call_timeout,
            support: Support::Unknown,
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.support == Support::Disabled
    }

    pub async fn sample(&mut self, now: DateTime<Utc>) -> Result<DepthOutcome, CaptureError> {
        if self.is_disabled() {
            return Ok(DepthOutcome::Disabled);
        }

        let snapshot = match with_timeout(self.call_timeout, self.source.depth_snapshot(&self.symbol)).await {
            Ok(snapshot) => snapshot,
            Err(SourceError::Unsupported(what)) => {
                tracing::info!(what, "Market depth not supported, depth sampling disabled");
                self.support = Support::Disabled;
                return Ok(DepthOutcome::Disabled);
            }
            Err(e) => {
                telemetry::increment(CounterMetric::SourceErrors, 1);
                tracing::warn!(error = %e, "Depth request failed");
                return Ok(DepthOutcome::Failed(e));
            }
        };

        if snapshot.is_empty() {
            if self.support == Support::Unknown {
                tracing::info!(symbol = %self.symbol, "Order book empty on first sample, depth sampling disabled");
                self.support = Support::Disabled;
                return Ok(DepthOutcome::Disabled);
            }
            return Ok(DepthOutcome::Empty);
        }
        self.support = Support::Supported;

        let time_msc = now.timestamp_millis();
        let time_dt = format_time(now);
        let levels = snapshot.levels.len();
        let records: Vec<DepthRecord> = snapshot
            .levels
            .into_iter()
            .map(|level| DepthRecord {
                time_msc,
                time_dt: time_dt.clone(),
                side: level.side,
                price: level.price,
                volume: level.volume,
                levels: levels as u32,
            })
            .collect();

        self.log
            .append(&records)
            .map_err(|e| CaptureError::write("depth", e))?;
        telemetry::increment(CounterMetric::DepthSnapshots, 1);

        Ok(DepthOutcome::Written { levels })
    }
}

/// Number of rows in the trailing snapshot if it is incomplete, else 0
fn torn_group_len(tail: &[DepthRecord]) -> usize {
    let Some(last) = tail.last() else {
        return 0;
    };
    let group = tail
        .iter()
        .rev()
        .take_while(|r| r.time_msc == last.time_msc)
        .count();
    if group < last.levels as usize {
        group
    } else {
        0
    }
}
