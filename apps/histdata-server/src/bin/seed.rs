//! Store Seeding Binary
//!
//! Creates a small, valid store for local development: the manifest plus
//! one `eurusd_m1.parquet` dataset covering the first day of 2024.
//!
//! Usage: `histdata-seed [ROOT]` (defaults to `HISTDATA_ROOT`, then `./data`).

use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, TimeZone, Utc};

use histdata_server::domain::candle::Candle;
use histdata_server::infrastructure::storage::{dataset_path, writer};
use histdata_server::infrastructure::{config, telemetry};

fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    telemetry::init();

    let root = std::env::args().nth(1).map_or_else(
        || {
            std::env::var("HISTDATA_ROOT")
                .map_or_else(|_| PathBuf::from("data"), PathBuf::from)
        },
        PathBuf::from,
    );

    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating storage root {}", root.display()))?;

    writer::write_manifest(&root).context("writing store manifest")?;

    let candles = sample_day();
    let locator = dataset_path(&root, "EURUSD", "m1");
    writer::write_candles(&locator.path, &candles)
        .with_context(|| format!("writing {}", locator.path.display()))?;

    tracing::info!(
        root = %root.display(),
        dataset = %locator.path.display(),
        bars = candles.len(),
        "Store seeded"
    );

    Ok(())
}

/// One synthetic trading day of minute bars with a gentle sine drift.
fn sample_day() -> Vec<Candle> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();

    (0..24 * 60)
        .map(|i| {
            let ts = base + Duration::minutes(i);
            let drift = (i as f64 * 0.01).sin() * 0.002;
            let open = 1.1050 + drift;
            let close = open + 0.0003;
            Candle {
                date: ts.format("%Y-%m-%d").to_string(),
                time: ts.format("%H:%M:%S").to_string(),
                open,
                high: close + 0.0002,
                low: open - 0.0002,
                close,
                volume: 100.0 + (i % 50) as f64,
                ts,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_day_is_a_full_ascending_day() {
        let candles = sample_day();
        assert_eq!(candles.len(), 24 * 60);
        assert_eq!(candles[0].time, "00:00:00");
        assert!(candles.windows(2).all(|w| w[0].ts < w[1].ts));
        assert!(candles.iter().all(|c| c.low <= c.open && c.high >= c.close));
    }
}
