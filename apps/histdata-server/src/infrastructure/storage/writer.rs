//! Store Seeding Support
//!
//! Writers for the manifest and per-dataset Parquet files. The server never
//! writes to the store at runtime; this module exists for the
//! `histdata-seed` binary and for tests that need a populated store.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::domain::candle::Candle;
use crate::infrastructure::storage::{
    STORE_MANIFEST, SUPPORTED_FORMAT_VERSION, StorageError, StoreManifest,
};

/// Arrow schema shared by every dataset file.
#[must_use]
pub fn dataset_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Utf8, true),
        Field::new("time", DataType::Utf8, true),
        Field::new("open", DataType::Float64, true),
        Field::new("high", DataType::Float64, true),
        Field::new("low", DataType::Float64, true),
        Field::new("close", DataType::Float64, true),
        Field::new("volume", DataType::Float64, true),
        Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            true,
        ),
    ]))
}

/// Write the store manifest into `root`.
///
/// # Errors
///
/// Surfaces filesystem failures as `StorageError::Io`.
pub fn write_manifest(root: &Path) -> Result<(), StorageError> {
    let manifest = StoreManifest {
        format_version: SUPPORTED_FORMAT_VERSION,
        description: Some("historical OHLCV bar store".to_string()),
    };
    let raw = serde_json::to_string_pretty(&manifest)
        .map_err(|e| StorageError::Configuration(format!("manifest serialization: {e}")))?;
    std::fs::write(root.join(STORE_MANIFEST), raw)?;
    Ok(())
}

/// Write `candles` (already in ascending timestamp order) to `path`.
///
/// # Errors
///
/// Surfaces filesystem and Parquet encoding failures.
pub fn write_candles(path: &Path, candles: &[Candle]) -> Result<(), StorageError> {
    write_candles_chunked(path, candles, None)
}

/// Write `candles` to `path`, capping rows per row group when
/// `max_row_group_rows` is set. Small caps produce multi-group files, which
/// tests use to exercise row-group pruning.
///
/// # Errors
///
/// Surfaces filesystem and Parquet encoding failures.
pub fn write_candles_chunked(
    path: &Path,
    candles: &[Candle],
    max_row_group_rows: Option<usize>,
) -> Result<(), StorageError> {
    let schema = dataset_schema();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.date.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.time.as_str()),
        )),
        Arc::new(Float64Array::from_iter_values(
            candles.iter().map(|c| c.open),
        )),
        Arc::new(Float64Array::from_iter_values(
            candles.iter().map(|c| c.high),
        )),
        Arc::new(Float64Array::from_iter_values(
            candles.iter().map(|c| c.low),
        )),
        Arc::new(Float64Array::from_iter_values(
            candles.iter().map(|c| c.close),
        )),
        Arc::new(Float64Array::from_iter_values(
            candles.iter().map(|c| c.volume),
        )),
        Arc::new(TimestampMillisecondArray::from_iter_values(
            candles.iter().map(|c| c.ts.timestamp_millis()),
        )),
    ];

    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let mut props = WriterProperties::builder();
    if let Some(rows) = max_row_group_rows {
        props = props.set_max_row_group_size(rows);
    }

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props.build()))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::StreamRequest;
    use crate::infrastructure::storage::stream::CandleStream;
    use crate::infrastructure::storage::{StorageGateway, dataset_path};
    use chrono::{Duration, TimeZone, Utc};

    fn minute_candles(n: usize) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let ts = base + Duration::minutes(i as i64);
                Candle {
                    date: ts.format("%Y-%m-%d").to_string(),
                    time: ts.format("%H:%M:%S").to_string(),
                    open: 1.0 + i as f64,
                    high: 1.5 + i as f64,
                    low: 0.5 + i as f64,
                    close: 1.2 + i as f64,
                    volume: 100.0,
                    ts,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn written_candles_round_trip_through_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path()).unwrap();

        let candles = minute_candles(10);
        let locator = dataset_path(dir.path(), "EURUSD", "m1");
        write_candles(&locator.path, &candles).unwrap();

        let gateway = StorageGateway::new(dir.path());
        let conn = gateway.acquire_connection().await.unwrap();

        let request = StreamRequest::parse(
            "EURUSD",
            "m1",
            "2024-01-01T00:00",
            "2024-01-01T00:09",
        )
        .unwrap();
        let stream = CandleStream::open(&conn, &request).await.unwrap();
        let got = stream.collect_remaining().await.unwrap();

        assert_eq!(got, candles);
    }
}
