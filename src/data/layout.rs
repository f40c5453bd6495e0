//! On-disk layout of the capture directory
//!
//! ```text
//! <root>/ticks/<SYMBOL>/<symbol>_ticks_raw.csv, state.json, capture.pid
//! <root>/ohlcv/<SYMBOL>/<TF>.csv
//! <root>/dom/<SYMBOL>/dom_snapshots.csv
//! <root>/metadata/<SYMBOL>/symbol_info.csv, session_log.csv, heartbeat.csv, supervisor_log.csv
//! ```

use crate::source::Timeframe;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Paths of every file the capture process and supervisor touch
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    symbol: String,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            symbol: symbol.into().to_uppercase(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Create every directory of the layout
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            self.tick_dir(),
            self.ohlcv_dir(),
            self.dom_dir(),
            self.metadata_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn tick_dir(&self) -> PathBuf {
        self.root.join("ticks").join(&self.symbol)
    }

    pub fn ohlcv_dir(&self) -> PathBuf {
        self.root.join("ohlcv").join(&self.symbol)
    }

    pub fn dom_dir(&self) -> PathBuf {
        self.root.join("dom").join(&self.symbol)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata").join(&self.symbol)
    }

    pub fn tick_log(&self) -> PathBuf {
        self.tick_dir()
            .join(format!("{}_ticks_raw.csv", self.symbol.to_lowercase()))
    }

    pub fn resume_state(&self) -> PathBuf {
        self.tick_dir().join("state.json")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.tick_dir().join("capture.pid")
    }

    pub fn bar_log(&self, timeframe: Timeframe) -> PathBuf {
        self.ohlcv_dir().join(format!("{}.csv", timeframe))
    }

    pub fn depth_log(&self) -> PathBuf {
        self.dom_dir().join("dom_snapshots.csv")
    }

    pub fn symbol_info_log(&self) -> PathBuf {
        self.metadata_dir().join("symbol_info.csv")
    }

    pub fn session_log(&self) -> PathBuf {
        self.metadata_dir().join("session_log.csv")
    }

    pub fn heartbeat_log(&self) -> PathBuf {
        self.metadata_dir().join("heartbeat.csv")
    }

    pub fn supervisor_log(&self) -> PathBuf {
        self.metadata_dir().join("supervisor_log.csv")
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Size of a file in MiB (0 when absent), rounded to 3 decimals
pub fn file_megabytes(path: &Path) -> f64 {
    let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    round3(bytes as f64 / BYTES_PER_MB)
}

/// Total size of the `.csv` files directly under `dir`, in MiB
pub fn dir_megabytes(dir: &Path) -> f64 {
    let bytes: u64 = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "csv"))
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0);
    round3(bytes as f64 / BYTES_PER_MB)
}
