//! OHLCV Bar Types
//!
//! Canonical internal representation of one historical bar plus the parsed
//! form of a time-ranged data request. These types are store-agnostic; the
//! Parquet mapping lives in the storage layer.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

// =============================================================================
// Candle
// =============================================================================

/// One OHLCV bar for a fixed time interval of a traded instrument.
///
/// Identity is (symbol, timeframe, `ts`); any stream yielding candles
/// guarantees unique, ascending `ts`. The `ts` field drives ordering and
/// range filtering and is not part of the wire representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    /// Bar date as stored (e.g. "2024-01-01").
    pub date: String,
    /// Bar time-of-day as stored (e.g. "00:01:00").
    pub time: String,
    /// Opening price.
    pub open: f64,
    /// Highest traded price.
    pub high: f64,
    /// Lowest traded price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
    /// Bar timestamp (ordering key, not serialized).
    #[serde(skip)]
    pub ts: DateTime<Utc>,
}

// =============================================================================
// Stream Request
// =============================================================================

/// A validated request for one (symbol, timeframe, time-range) scan.
///
/// `start`/`end` form an inclusive range. Construction fails on missing or
/// malformed fields; nothing is silently defaulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Instrument symbol as supplied by the caller (e.g. "EURUSD").
    pub symbol: String,
    /// Timeframe as supplied by the caller (e.g. "m1", "h1", "d1").
    pub timeframe: String,
    /// Inclusive range start.
    pub start: DateTime<Utc>,
    /// Inclusive range end.
    pub end: DateTime<Utc>,
}

impl StreamRequest {
    /// Parse and validate the four request fields.
    ///
    /// # Errors
    ///
    /// Returns `RequestParseError` when a field is empty or a timestamp
    /// does not parse in any accepted form.
    pub fn parse(
        symbol: &str,
        timeframe: &str,
        start: &str,
        end: &str,
    ) -> Result<Self, RequestParseError> {
        if symbol.trim().is_empty() {
            return Err(RequestParseError::MissingField { field: "symbol" });
        }
        if timeframe.trim().is_empty() {
            return Err(RequestParseError::MissingField { field: "timeframe" });
        }

        Ok(Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            start: parse_instant(start).ok_or_else(|| RequestParseError::BadTimestamp {
                field: "start",
                value: start.to_string(),
            })?,
            end: parse_instant(end).ok_or_else(|| RequestParseError::BadTimestamp {
                field: "end",
                value: end.to_string(),
            })?,
        })
    }
}

/// Parse a caller-supplied instant.
///
/// Accepted forms: RFC 3339, `YYYY-MM-DDTHH:MM[:SS]`, and a bare
/// `YYYY-MM-DD` (interpreted as midnight UTC).
#[must_use]
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

// =============================================================================
// Errors
// =============================================================================

/// Request validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestParseError {
    /// A required field was empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A timestamp field did not parse.
    #[error("malformed timestamp in {field}: {value:?}")]
    BadTimestamp {
        /// Name of the offending field.
        field: &'static str,
        /// The raw value received.
        value: String,
    },
}

// =============================================================================
// Tests
// =============================================================================
