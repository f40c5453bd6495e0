//! Parquet export of the tick log

use super::log::complete_lines;
use super::records::TickRecord;
use arrow::array::{ArrayRef, StringArray, TimestampMillisecondArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

/// Tick schema. Decimals are stored as strings to keep their precision.
pub fn tick_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "time_msc",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("seq", DataType::UInt64, false),
        Field::new("bid", DataType::Utf8, false),
        Field::new("ask", DataType::Utf8, false),
        Field::new("last", DataType::Utf8, false),
        Field::new("volume", DataType::UInt64, false),
        Field::new("volume_real", DataType::Utf8, false),
        Field::new("flags", DataType::UInt32, false),
        Field::new("flag_desc", DataType::Utf8, false),
        Field::new("spread", DataType::Utf8, false),
        Field::new("spread_pct", DataType::Utf8, false),
        Field::new("mid", DataType::Utf8, false),
        Field::new("bid_ask_imbalance", DataType::Utf8, false),
        Field::new("session", DataType::Utf8, false),
        Field::new("day_of_week", DataType::Utf8, false),
        Field::new("hour_utc", DataType::UInt32, false),
    ])
}

/// Converts a tick CSV log into a Parquet file
pub struct TickExporter {
    batch_size: usize,
}

impl Default for TickExporter {
    fn default() -> Self {
        Self { batch_size: 8192 }
    }
}

impl TickExporter {
    /// Create an exporter writing row groups of `batch_size` ticks
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Export `source` to `dest`; returns the number of ticks written
    pub fn export(&self, source: &Path, dest: &Path) -> anyhow::Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let schema = Arc::new(tick_schema());
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(File::create(dest)?, schema.clone(), Some(props))?;

        // the capture process may be mid-append
        let mut reader = csv::Reader::from_reader(complete_lines(source)?);
        let mut buffer: Vec<TickRecord> = Vec::with_capacity(self.batch_size);
        let mut written = 0u64;

        for row in reader.deserialize::<TickRecord>() {
            buffer.push(row?);
            if buffer.len() >= self.batch_size {
                writer.write(&Self::to_batch(&schema, &buffer)?)?;
                written += buffer.len() as u64;
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            writer.write(&Self::to_batch(&schema, &buffer)?)?;
            written += buffer.len() as u64;
        }

        writer.close()?;

        tracing::info!(source = ?source, dest = ?dest, ticks = written, "Exported ticks to Parquet");

        Ok(written)
    }

    fn to_batch(schema: &Arc<Schema>, ticks: &[TickRecord]) -> anyhow::Result<RecordBatch> {
        let decimal = |f: fn(&TickRecord) -> String| -> ArrayRef {
            Arc::new(StringArray::from(ticks.iter().map(f).collect::<Vec<_>>()))
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(
                TimestampMillisecondArray::from(ticks.iter().map(|t| t.time_msc).collect::<Vec<_>>())
                    .with_timezone("UTC"),
            ),
            Arc::new(UInt64Array::from(ticks.iter().map(|t| t.seq).collect::<Vec<_>>())),
            decimal(|t| t.bid.to_string()),
            decimal(|t| t.ask.to_string()),
            decimal(|t| t.last.to_string()),
            Arc::new(UInt64Array::from(ticks.iter().map(|t| t.volume).collect::<Vec<_>>())),
            decimal(|t| t.volume_real.to_string()),
            Arc::new(UInt32Array::from(ticks.iter().map(|t| t.flags).collect::<Vec<_>>())),
            decimal(|t| t.flag_desc.clone()),
            decimal(|t| t.spread.to_string()),
            decimal(|t| t.spread_pct.to_string()),
            decimal(|t| t.mid.to_string()),
            decimal(|t| t.bid_ask_imbalance.to_string()),
            decimal(|t| t.session.to_string()),
            decimal(|t| t.day_of_week.clone()),
            Arc::new(UInt32Array::from(ticks.iter().map(|t| t.hour_utc).collect::<Vec<_>>())),
        ];

        Ok(RecordBatch::try_new(schema.clone(), columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Session, TickEnricher};
    use crate::data::AppendLog;
    use crate::source::RawTick;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[test]
    fn test_tick_schema() {
        let schema = tick_schema();
        assert_eq!(schema.fields().len(), 16);
        assert_eq!(schema.field(0).name(), "time_msc");
        assert_eq!(schema.field(1).name(), "seq");
    }

    #[test]
    fn test_export_ticks() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("ticks.csv");
        let enricher = TickEnricher::new(dec!(0.01));

        let mut log = AppendLog::<TickRecord>::open(&csv_path).unwrap();
        let records: Vec<TickRecord> = (0..5)
            .map(|i| {
                enricher.enrich(&RawTick {
                    seq: i,
                    time_msc: 1_704_067_200_000 + i as i64,
                    bid: dec!(2050.10),
                    ask: dec!(2050.40),
                    last: dec!(0),
                    volume: 0,
                    volume_real: dec!(0),
                    flags: 6,
                })
            })
            .collect();
        log.append(&records).unwrap();
        assert_eq!(records[0].session, Session::Asia);

        let dest = temp_dir.path().join("out").join("ticks.parquet");
        let written = TickExporter::new(2).export(&csv_path, &dest).unwrap();
        assert_eq!(written, 5);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&dest).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let mut rows = 0;
        for batch in reader {
            let batch = batch.unwrap();
            let bids = batch
                .column(2)
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            assert_eq!(bids.value(0), "2050.10");
            rows += batch.num_rows();
        }
        assert_eq!(rows, 5);
    }

    #[test]
    fn test_export_skips_line_being_written() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("ticks.csv");
        let enricher = TickEnricher::new(dec!(0.01));

        let mut log = AppendLog::<TickRecord>::open(&csv_path).unwrap();
        let records: Vec<TickRecord> = (0..3)
            .map(|i| {
                enricher.enrich(&RawTick {
                    seq: i,
                    time_msc: 1_704_067_200_000 + i as i64,
                    bid: dec!(2050.10),
                    ask: dec!(2050.40),
                    last: dec!(0),
                    volume: 0,
                    volume_real: dec!(0),
                    flags: 6,
                })
            })
            .collect();
        log.append(&records).unwrap();
        drop(log);

        let mut file = std::fs::OpenOptions::new().append(true).open(&csv_path).unwrap();
        std::io::Write::write_all(&mut file, b"1704067200003,2024-01-01T00:00:00.003Z,2050.1").unwrap();

        let dest = temp_dir.path().join("ticks.parquet");
        assert_eq!(TickExporter::default().export(&csv_path, &dest).unwrap(), 3);
    }
}
