//! Exponential Moving Average (EMA)
//!
//! EMA gives more weight to recent prices, making it more responsive to new
//! information than the Simple Moving Average.
//!
//! Formula:
//!   multiplier = 2 / (period + 1)
//!   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//!
//! The very first value is seeded with the SMA of the first `period` closes,
//! so the output length is `closes.len() - period + 1`.

/// Indicator contract violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndicatorError {
    /// The look-back period was zero or negative.
    #[error("invalid period: EMA period must be greater than 0")]
    InvalidPeriod,

    /// Fewer closes than the period requires.
    #[error(
        "insufficient data: EMA({period}) requires at least {period} data points, but received {received}"
    )]
    InsufficientData {
        /// Requested look-back period.
        period: usize,
        /// Number of closes actually supplied.
        received: usize,
    },
}

/// Compute the EMA series for `closes` (oldest to newest) and `period`.
///
/// # Errors
///
/// Returns `IndicatorError::InvalidPeriod` when `period == 0` and
/// `IndicatorError::InsufficientData` when `closes.len() < period`.
pub fn ema(period: usize, closes: &[f64]) -> Result<Vec<f64>, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod);
    }
    if closes.len() < period {
        return Err(IndicatorError::InsufficientData {
            period,
            received: closes.len(),
        });
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Seed: SMA of the first `period` closes.
    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;

    let mut results = Vec::with_capacity(closes.len() - period + 1);
    results.push(sma);

    let mut prev = sma;
    for &close in &closes[period..] {
        let value = close * multiplier + prev * (1.0 - multiplier);
        results.push(value);
        prev = value;
    }

    Ok(results)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn ema_rejects_zero_period() {
        assert_eq!(ema(0, &[1.0, 2.0, 3.0]), Err(IndicatorError::InvalidPeriod));
    }

    #[test]
    fn ema_rejects_short_input() {
        assert_eq!(
            ema(5, &[1.0, 2.0]),
            Err(IndicatorError::InsufficientData {
                period: 5,
                received: 2
            })
        );
    }

    #[test]
    fn ema_period_equals_length_is_the_sma() {
        let values = ema(3, &[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_output_length_matches_contract() {
        let values = ema(5, &ascending(20)).unwrap();
        assert_eq!(values.len(), 16); // 20 - 5 + 1

        let values = ema(5, &ascending(16)).unwrap();
        assert_eq!(values.len(), 12); // 16 - 5 + 1
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1..10]: SMA seed 3.0, multiplier 2/6.
        let values = ema(5, &ascending(10)).unwrap();
        assert_eq!(values.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((values[0] - expected).abs() < 1e-10);
        for (i, close) in (6..=10).enumerate() {
            expected = close as f64 * mult + expected * (1.0 - mult);
            assert!((values[i + 1] - expected).abs() < 1e-10);
        }
    }
}
