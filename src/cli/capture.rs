//! Capture command implementation

use crate::capture::{wait_for_stop_signal, CaptureRunner};
use crate::config::Config;
use crate::source::{BridgeConfig, HttpBridgeSource};
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Symbol to capture (overrides config)
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Output directory for captured data (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Terminal bridge URL (overrides config)
    #[arg(long)]
    pub bridge_url: Option<String>,
}

impl CaptureArgs {
    /// Apply command line overrides to `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(symbol) = &self.symbol {
            config.capture.symbol = symbol.clone();
        }
        if let Some(output) = &self.output {
            config.storage.data_dir = output.clone();
        }
        if let Some(url) = &self.bridge_url {
            config.source.base_url = url.clone();
        }
    }

    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        self.apply(&mut config);

        let source = HttpBridgeSource::new(BridgeConfig {
            base_url: config.source.base_url.clone(),
            timeout: config.source.request_timeout(),
        })?;
        let runner = CaptureRunner::open(&config, Arc::new(source), Utc::now())?;

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_stop_signal().await;
            let _ = stop_tx.send(true);
        });

        let summary = runner.run(stop_rx).await?;
        tracing::info!(
            run_id = %summary.run_id,
            ticks = summary.ticks_written,
            last_tick = %summary.last_tick_dt,
            "Capture finished"
        );
        Ok(())
    }
}
