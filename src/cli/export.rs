//! Export command implementation

use crate::config::Config;
use crate::data::{DataLayout, TickExporter};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Destination Parquet file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Symbol whose tick log is exported (defaults to the configured one)
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Rows per record batch
    #[arg(long, default_value_t = 8192)]
    pub batch_size: usize,
}

impl ExportArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let symbol = self.symbol.as_deref().unwrap_or(&config.capture.symbol);
        let layout = DataLayout::new(&config.storage.data_dir, symbol);
        let source = layout.tick_log();
        anyhow::ensure!(source.exists(), "no tick log at {}", source.display());

        let exporter = TickExporter::new(self.batch_size);
        let output = self.output.clone();
        let written = tokio::task::spawn_blocking(move || exporter.export(&source, &output)).await??;

        println!("Exported {} ticks to {}", written, self.output.display());
        Ok(())
    }
}
