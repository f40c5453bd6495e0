//! HTTP bridge to the trading terminal
//!
//! The terminal itself is reached through a small JSON bridge running next
//! to it. Endpoints:
//!
//! - `GET /ticks?symbol=..&from_msc=..&limit=..` -> `[RawTick]`
//! - `GET /bars?symbol=..&timeframe=M1&from=..&count=..` -> `[Bar]`
//! - `GET /depth?symbol=..` -> `{"levels": [..]}` (404/501 when unsupported)
//! - `GET /symbol?symbol=..` -> `SymbolInfo`

use super::{
    Bar, MarketDataSource, OrderBookSnapshot, RawTick, SourceError, SymbolInfo, Timeframe,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default bridge address
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8765";

/// Configuration for the bridge client
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the bridge
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BRIDGE_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Market data source backed by the HTTP bridge
pub struct HttpBridgeSource {
    config: BridgeConfig,
    client: Client,
}

impl HttpBridgeSource {
    /// Create a new bridge client
    pub fn new(config: BridgeConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Get the configured base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Issue a GET and decode the JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = self.endpoint(path);
        tracing::trace!(url = %url, "Bridge request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(path, status));
        }

        response.json::<T>().await.map_err(|e| self.transport_error(e))
    }

    /// A bridge that accepted the request but never answered is wedged,
    /// not disconnected
    fn transport_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.config.timeout)
        } else if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Disconnected(e.to_string())
        }
    }
}

fn map_status(path: &str, status: StatusCode) -> SourceError {
    let unsupported = status == StatusCode::NOT_FOUND || status == StatusCode::NOT_IMPLEMENTED;
    if path == "depth" && unsupported {
        SourceError::Unsupported("market depth")
    } else if status.is_server_error() {
        SourceError::Disconnected(format!("bridge returned {}", status))
    } else {
        SourceError::Malformed(format!("bridge returned {} for /{}", status, path))
    }
}

#[async_trait]
impl MarketDataSource for HttpBridgeSource {
    async fn ticks_since(
        &self,
        symbol: &str,
        from_time_msc: i64,
        limit: usize,
    ) -> Result<Vec<RawTick>, SourceError> {
        self.get_json(
            "ticks",
            &[
                ("symbol", symbol.to_string()),
                ("from_msc", from_time_msc.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bar>, SourceError> {
        self.get_json(
            "bars",
            &[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.to_string()),
                ("from", from.timestamp().to_string()),
                ("count", limit.to_string()),
            ],
        )
        .await
    }

    async fn depth_snapshot(&self, symbol: &str) -> Result<OrderBookSnapshot, SourceError> {
        self.get_json("depth", &[("symbol", symbol.to_string())])
            .await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError> {
        self.get_json("symbol", &[("symbol", symbol.to_string())])
            .await
    }
}
