//! Market data source module
//!
//! The terminal is reached through the [`MarketDataSource`] capability
//! trait. Every failure it reports is transient from the capture loop's
//! point of view, except [`SourceError::Unsupported`].

mod http;
mod memory;
mod types;

pub use http::{BridgeConfig, HttpBridgeSource, DEFAULT_BRIDGE_URL};
pub use memory::InMemorySource;
pub use types::{Bar, BookSide, DepthLevel, OrderBookSnapshot, RawTick, SymbolInfo, Timeframe};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a market data source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Terminal unreachable or not logged in
    #[error("terminal disconnected: {0}")]
    Disconnected(String),
    /// Call did not return within the configured bound
    #[error("source call timed out after {0:?}")]
    Timeout(Duration),
    /// Capability not offered for this instrument
    #[error("{0} not supported for this instrument")]
    Unsupported(&'static str),
    /// Response could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the call is worth retrying later
    pub fn is_transient(&self) -> bool {
        !matches!(self, SourceError::Unsupported(_))
    }
}

/// Capabilities the capture process consumes from the trading terminal
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Ticks with `time_msc >= from_time_msc`, oldest first, at most `limit`
    async fn ticks_since(
        &self,
        symbol: &str,
        from_time_msc: i64,
        limit: usize,
    ) -> Result<Vec<RawTick>, SourceError>;

    /// Bars of `timeframe` opened at or after `from`, oldest first, at most `limit`.
    /// The newest bar may still be in progress.
    async fn bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, SourceError>;

    /// Current order book
    async fn depth_snapshot(&self, symbol: &str) -> Result<OrderBookSnapshot, SourceError>;

    /// Contract specification
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError>;
}

/// Bound a source call so a wedged terminal cannot block the scheduler
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_millis(100), async { Ok::<_, SourceError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SourceError::Timeout(_))));
    }

    #[test]
    fn test_unsupported_is_not_transient() {
        assert!(!SourceError::Unsupported("depth").is_transient());
        assert!(SourceError::Disconnected("x".into()).is_transient());
        assert!(SourceError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
