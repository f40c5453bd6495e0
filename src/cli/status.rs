//! Status command implementation

use crate::capture::ResumeStore;
use crate::config::Config;
use crate::data::{dir_megabytes, file_megabytes, DataLayout};
use crate::supervisor::{last_heartbeat, read_identity};
use chrono::Utc;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Symbol to report on (defaults to the configured one)
    #[arg(short, long)]
    pub symbol: Option<String>,
}

impl StatusArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let symbol = self.symbol.as_deref().unwrap_or(&config.capture.symbol);
        let layout = DataLayout::new(&config.storage.data_dir, symbol);
        let now = Utc::now();

        println!("tape-keeper status");
        println!("  Symbol: {}", layout.symbol());
        println!("  Data dir: {}", layout.root().display());

        match read_identity(&layout.pid_file()) {
            Some(holder) if holder.is_live() => println!("  Capture: running (pid {})", holder.pid),
            Some(holder) => println!("  Capture: not running (stale pid {})", holder.pid),
            None => println!("  Capture: not running"),
        }

        match last_heartbeat(&layout.heartbeat_log())? {
            Some(beat) => println!(
                "  Last heartbeat: {} ({}s ago)",
                beat.to_rfc3339(),
                (now - beat).num_seconds()
            ),
            None => println!("  Last heartbeat: none"),
        }

        let store = ResumeStore::new(layout.resume_state(), layout.symbol());
        match store.try_load(now) {
            Ok(Some(state)) => {
                println!("  Last tick: {}", state.last_tick_dt);
                for (tf, open) in &state.bars {
                    println!("  Last {} bar: {}", tf, open);
                }
            }
            Ok(None) => println!("  Resume state: none"),
            Err(e) => println!("  Resume state: unusable ({})", e),
        }

        println!(
            "  Size: ticks {:.3} MB, bars {:.3} MB, depth {:.3} MB",
            file_megabytes(&layout.tick_log()),
            dir_megabytes(&layout.ohlcv_dir()),
            file_megabytes(&layout.depth_log())
        );
        Ok(())
    }
}
