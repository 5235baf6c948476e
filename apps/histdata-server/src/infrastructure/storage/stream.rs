//! Chunked Candle Scans
//!
//! `CandleStream` turns a resolved dataset and an inclusive time range into
//! a lazy, finite, forward-only sequence of candles. The scan is executed as
//! a cursor over Parquet record batches of bounded size, so memory use is
//! governed by the batch bound rather than the result size; a slow consumer
//! simply delays the next fetch.
//!
//! Row groups whose timestamp statistics fall entirely outside the
//! requested range are pruned before the scan starts. Within each fetched
//! batch the time window is applied with Arrow's scalar comparison kernels
//! over the `ts` column; a null mask entry drops the row. Ascending
//! delivery is enforced, not assumed: every batch is sorted by `ts` before
//! it is buffered, and a timestamp regression across batch boundaries
//! aborts the scan with a terminal error rather than yielding bars out of
//! order.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, RecordBatch, Scalar, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::compute::{filter_record_batch, sort_to_indices, take_record_batch};
use arrow::compute::kernels::{boolean as boolean_kernels, cmp as cmp_kernels};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parquet::arrow::ParquetRecordBatchStreamBuilder;
use parquet::arrow::async_reader::ParquetRecordBatchStream;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::statistics::Statistics;

use crate::domain::candle::{Candle, StreamRequest};
use crate::infrastructure::storage::{StorageError, StoreConnection};

/// Rows fetched per record batch. Bounds per-stream memory and provides the
/// implicit backpressure unit.
pub const DEFAULT_BATCH_ROWS: usize = 1024;

/// Name of the timestamp column in every dataset.
const TS_COLUMN: &str = "ts";

// =============================================================================
// CandleStream
// =============================================================================

/// A lazy, non-restartable pull stream of candles for one request.
pub struct CandleStream {
    batches: ParquetRecordBatchStream<tokio::fs::File>,
    path: PathBuf,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    pending: VecDeque<Candle>,
    last_ts: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl std::fmt::Debug for CandleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleStream")
            .field("path", &self.path)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("pending", &self.pending.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl CandleStream {
    /// Open a scan for `request` over the shared connection.
    ///
    /// # Errors
    ///
    /// Propagates `StorageError::DatasetNotFound` unchanged when the dataset
    /// has no backing file, and surfaces open/decode faults as terminal
    /// errors.
    pub async fn open(
        conn: &StoreConnection,
        request: &StreamRequest,
    ) -> Result<Self, StorageError> {
        let locator = conn
            .resolve_dataset(&request.symbol, &request.timeframe)
            .await?;

        let file = tokio::fs::File::open(&locator.path).await?;
        let builder = ParquetRecordBatchStreamBuilder::new(file).await?;

        let ts_unit = builder
            .schema()
            .column_with_name(TS_COLUMN)
            .and_then(|(_, field)| match field.data_type() {
                DataType::Timestamp(unit, _) => Some(*unit),
                _ => None,
            });

        let builder = match ts_unit {
            Some(unit) => {
                let lo = raw_timestamp(unit, request.start);
                let hi = raw_timestamp(unit, request.end);
                let keep = prune_row_groups(builder.metadata(), lo, hi);
                builder.with_row_groups(keep)
            }
            // No usable timestamp column; scan everything and let the
            // per-batch filter drop what it can.
            None => builder,
        };

        let batches = builder
            .with_batch_size(DEFAULT_BATCH_ROWS)
            .build()?;

        tracing::debug!(
            symbol = %locator.symbol,
            timeframe = %locator.timeframe,
            start = %request.start,
            end = %request.end,
            "Candle scan opened"
        );

        Ok(Self {
            batches,
            path: locator.path,
            start: request.start,
            end: request.end,
            pending: VecDeque::new(),
            last_ts: None,
            exhausted: false,
        })
    }

    /// Pull the next candle, fetching the next bounded batch when the
    /// buffer runs dry. Returns `Ok(None)` exactly once, at end of range.
    ///
    /// # Errors
    ///
    /// A fetch or decode fault aborts the stream with a terminal error;
    /// there is no partial silent truncation.
    pub async fn try_next(&mut self) -> Result<Option<Candle>, StorageError> {
        loop {
            if let Some(candle) = self.pending.pop_front() {
                return Ok(Some(candle));
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.batches.next().await {
                None => {
                    self.exhausted = true;
                }
                Some(batch) => {
                    let batch = batch?;
                    let filtered = filter_batch(&batch, self.start, self.end)?;
                    let ordered = sort_by_ts(&filtered)?;
                    let candles = candles_from_batch(&ordered);

                    // Batches are internally sorted above, so the ordering
                    // guarantee reduces to one check at the boundary.
                    if let (Some(last), Some(first)) = (self.last_ts, candles.first()) {
                        if first.ts < last {
                            return Err(StorageError::OutOfOrder {
                                path: self.path.clone(),
                            });
                        }
                    }
                    if let Some(tail) = candles.last() {
                        self.last_ts = Some(tail.ts);
                    }
                    self.pending.extend(candles);
                }
            }
        }
    }

    /// Drain the remaining candles into a vector.
    ///
    /// # Errors
    ///
    /// Propagates the first fetch fault.
    pub async fn collect_remaining(mut self) -> Result<Vec<Candle>, StorageError> {
        let mut out = Vec::new();
        while let Some(candle) = self.try_next().await? {
            out.push(candle);
        }
        Ok(out)
    }
}

// =============================================================================
// Range Filtering
// =============================================================================

/// Convert an instant to the raw integer representation of `unit`.
fn raw_timestamp(unit: TimeUnit, ts: DateTime<Utc>) -> i64 {
    match unit {
        TimeUnit::Second => ts.timestamp(),
        TimeUnit::Millisecond => ts.timestamp_millis(),
        TimeUnit::Microsecond => ts.timestamp_micros(),
        TimeUnit::Nanosecond => ts.timestamp_nanos_opt().unwrap_or(i64::MAX),
    }
}

/// Keep only row groups whose `ts` statistics intersect `[lo, hi]`.
///
/// Groups without statistics are kept; pruning changes work, never results.
fn prune_row_groups(metadata: &ParquetMetaData, lo: i64, hi: i64) -> Vec<usize> {
    let ts_index = metadata
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .position(|c| c.name() == TS_COLUMN);

    let Some(ts_index) = ts_index else {
        return (0..metadata.num_row_groups()).collect();
    };

    metadata
        .row_groups()
        .iter()
        .enumerate()
        .filter(|(_, group)| {
            match group.column(ts_index).statistics() {
                Some(Statistics::Int64(stats)) => match (stats.min_opt(), stats.max_opt()) {
                    (Some(&min), Some(&max)) => max >= lo && min <= hi,
                    _ => true,
                },
                _ => true,
            }
        })
        .map(|(i, _)| i)
        .collect()
}

/// Sort one batch by its `ts` column.
///
/// A no-op reshuffle for well-formed datasets; it exists so delivery order
/// never depends on how the file was written.
fn sort_by_ts(batch: &RecordBatch) -> Result<RecordBatch, StorageError> {
    let Some(ts) = batch.column_by_name(TS_COLUMN) else {
        return Ok(batch.clone());
    };
    let indices = sort_to_indices(ts, None, None)?;
    Ok(take_record_batch(batch, &indices)?)
}

/// Apply the inclusive `[start, end]` window to one batch.
///
/// Uses 1-element `Scalar` arrays for the bounds so the comparison is
/// vectorized without allocating full-length bound arrays. Null timestamps
/// produce null mask entries, which `filter_record_batch` treats as "drop".
fn filter_batch(
    batch: &RecordBatch,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<RecordBatch, StorageError> {
    let Some(ts) = batch.column_by_name(TS_COLUMN) else {
        // No timestamp column at all: nothing can match a time range.
        return Ok(batch.slice(0, 0));
    };

    let DataType::Timestamp(unit, tz) = ts.data_type() else {
        return Ok(batch.slice(0, 0));
    };

    let lo = raw_timestamp(*unit, start);
    let hi = raw_timestamp(*unit, end);

    let (lo_bound, hi_bound): (ArrayRef, ArrayRef) = match unit {
        TimeUnit::Second => (
            Arc::new(TimestampSecondArray::from(vec![lo]).with_timezone_opt(tz.clone())),
            Arc::new(TimestampSecondArray::from(vec![hi]).with_timezone_opt(tz.clone())),
        ),
        TimeUnit::Millisecond => (
            Arc::new(TimestampMillisecondArray::from(vec![lo]).with_timezone_opt(tz.clone())),
            Arc::new(TimestampMillisecondArray::from(vec![hi]).with_timezone_opt(tz.clone())),
        ),
        TimeUnit::Microsecond => (
            Arc::new(TimestampMicrosecondArray::from(vec![lo]).with_timezone_opt(tz.clone())),
            Arc::new(TimestampMicrosecondArray::from(vec![hi]).with_timezone_opt(tz.clone())),
        ),
        TimeUnit::Nanosecond => (
            Arc::new(TimestampNanosecondArray::from(vec![lo]).with_timezone_opt(tz.clone())),
            Arc::new(TimestampNanosecondArray::from(vec![hi]).with_timezone_opt(tz.clone())),
        ),
    };

    let ge: BooleanArray = cmp_kernels::gt_eq(ts, &Scalar::new(lo_bound))?;
    let le: BooleanArray = cmp_kernels::lt_eq(ts, &Scalar::new(hi_bound))?;
    let mask = boolean_kernels::and(&ge, &le)?;

    Ok(filter_record_batch(batch, &mask)?)
}

// =============================================================================
// Row Mapping
// =============================================================================

/// Map a filtered batch to candles.
///
/// Absent or null numeric fields default to 0 and textual fields to the
/// empty string; nulls never propagate past this boundary.
fn candles_from_batch(batch: &RecordBatch) -> Vec<Candle> {
    let ts = batch.column_by_name(TS_COLUMN);

    (0..batch.num_rows())
        .filter_map(|row| {
            let ts = ts.and_then(|c| ts_at(c, row))?;
            Some(Candle {
                date: string_at(batch, "date", row),
                time: string_at(batch, "time", row),
                open: f64_at(batch, "open", row),
                high: f64_at(batch, "high", row),
                low: f64_at(batch, "low", row),
                close: f64_at(batch, "close", row),
                volume: f64_at(batch, "volume", row),
                ts,
            })
        })
        .collect()
}

fn string_at(batch: &RecordBatch, name: &str, row: usize) -> String {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map_or_else(String::new, |a| {
            if a.is_null(row) {
                String::new()
            } else {
                a.value(row).to_string()
            }
        })
}

fn f64_at(batch: &RecordBatch, name: &str, row: usize) -> f64 {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .map_or(0.0, |a| if a.is_null(row) { 0.0 } else { a.value(row) })
}

fn ts_at(column: &ArrayRef, row: usize) -> Option<DateTime<Utc>> {
    if column.is_null(row) {
        return None;
    }

    match column.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            let a = column.as_any().downcast_ref::<TimestampSecondArray>()?;
            DateTime::from_timestamp(a.value(row), 0)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let a = column.as_any().downcast_ref::<TimestampMillisecondArray>()?;
            DateTime::from_timestamp_millis(a.value(row))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let a = column.as_any().downcast_ref::<TimestampMicrosecondArray>()?;
            DateTime::from_timestamp_micros(a.value(row))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            let a = column.as_any().downcast_ref::<TimestampNanosecondArray>()?;
            Some(DateTime::from_timestamp_nanos(a.value(row)))
        }
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use chrono::TimeZone;

    fn ts_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn batch_with_nulls() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("date", DataType::Utf8, true),
            Field::new("time", DataType::Utf8, true),
            Field::new("open", DataType::Float64, true),
            Field::new("close", DataType::Float64, true),
            Field::new(
                TS_COLUMN,
                DataType::Timestamp(TimeUnit::Millisecond, None),
                true,
            ),
        ]));

        let ts = TimestampMillisecondArray::from(vec![
            Some(ts_ms(2024, 1, 1, 0, 0).timestamp_millis()),
            Some(ts_ms(2024, 1, 1, 0, 1).timestamp_millis()),
        ]);

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("2024-01-01"), None])),
                Arc::new(StringArray::from(vec![Some("00:00:00"), None])),
                Arc::new(Float64Array::from(vec![Some(1.5), None])),
                Arc::new(Float64Array::from(vec![None, Some(2.5)])),
                Arc::new(ts),
            ],
        )
        .unwrap()
    }

    #[test]
    fn nulls_become_defaults_never_propagate() {
        let candles = candles_from_batch(&batch_with_nulls());
        assert_eq!(candles.len(), 2);

        // Row 0: close is null, open present.
        assert_eq!(candles[0].open, 1.5);
        assert_eq!(candles[0].close, 0.0);
        assert_eq!(candles[0].date, "2024-01-01");

        // Row 1: everything but close and ts is null; volume column absent.
        assert_eq!(candles[1].open, 0.0);
        assert_eq!(candles[1].close, 2.5);
        assert_eq!(candles[1].date, "");
        assert_eq!(candles[1].volume, 0.0);
    }

    #[test]
    fn filter_is_inclusive_on_both_bounds() {
        let batch = batch_with_nulls();
        let start = ts_ms(2024, 1, 1, 0, 0);
        let end = ts_ms(2024, 1, 1, 0, 1);

        let filtered = filter_batch(&batch, start, end).unwrap();
        assert_eq!(filtered.num_rows(), 2);

        let filtered = filter_batch(&batch, start, start).unwrap();
        assert_eq!(filtered.num_rows(), 1);

        let filtered = filter_batch(&batch, ts_ms(2024, 1, 2, 0, 0), ts_ms(2024, 1, 3, 0, 0))
            .unwrap();
        assert_eq!(filtered.num_rows(), 0);
    }

    fn minute_candle(minute: i64) -> Candle {
        let ts = ts_ms(2024, 1, 1, 0, u32::try_from(minute).unwrap_or(0));
        Candle {
            date: "2024-01-01".to_string(),
            time: ts.format("%H:%M:%S").to_string(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            ts,
        }
    }

    #[tokio::test]
    async fn unsorted_rows_within_a_batch_are_delivered_ascending() {
        use crate::domain::candle::StreamRequest;
        use crate::infrastructure::storage::{StorageGateway, dataset_path, writer};

        let dir = tempfile::tempdir().unwrap();
        writer::write_manifest(dir.path()).unwrap();

        // Written out of order inside a single row group.
        let candles: Vec<Candle> = [2, 0, 1].into_iter().map(minute_candle).collect();
        let locator = dataset_path(dir.path(), "EURUSD", "m1");
        writer::write_candles(&locator.path, &candles).unwrap();

        let gateway = StorageGateway::new(dir.path());
        let conn = gateway.acquire_connection().await.unwrap();
        let request =
            StreamRequest::parse("EURUSD", "m1", "2024-01-01", "2024-01-02").unwrap();

        let got = CandleStream::open(&conn, &request)
            .await
            .unwrap()
            .collect_remaining()
            .await
            .unwrap();

        let minutes: Vec<String> = got.iter().map(|c| c.time.clone()).collect();
        assert_eq!(minutes, vec!["00:00:00", "00:01:00", "00:02:00"]);
    }

    #[tokio::test]
    async fn timestamp_regression_across_row_groups_is_a_terminal_error() {
        use crate::domain::candle::StreamRequest;
        use crate::infrastructure::storage::{StorageGateway, dataset_path, writer};

        let dir = tempfile::tempdir().unwrap();
        writer::write_manifest(dir.path()).unwrap();

        // One row per row group, regressing between groups.
        let candles: Vec<Candle> = [2, 0, 1].into_iter().map(minute_candle).collect();
        let locator = dataset_path(dir.path(), "EURUSD", "m1");
        writer::write_candles_chunked(&locator.path, &candles, Some(1)).unwrap();

        let gateway = StorageGateway::new(dir.path());
        let conn = gateway.acquire_connection().await.unwrap();
        let request =
            StreamRequest::parse("EURUSD", "m1", "2024-01-01", "2024-01-02").unwrap();

        let err = CandleStream::open(&conn, &request)
            .await
            .unwrap()
            .collect_remaining()
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { .. }));
    }

    #[test]
    fn raw_timestamp_units() {
        let ts = ts_ms(2024, 1, 1, 0, 0);
        assert_eq!(raw_timestamp(TimeUnit::Second, ts) * 1000, ts.timestamp_millis());
        assert_eq!(
            raw_timestamp(TimeUnit::Microsecond, ts),
            ts.timestamp_millis() * 1000
        );
    }
}
