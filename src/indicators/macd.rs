// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD tracks the relationship between two EMAs of different length.
//
//   MACD line   = EMA(fast) - EMA(slow)
//   Signal line = EMA(signal_period) of the MACD line
//
// Standard parameters are fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

/// Compute the MACD line and signal line for the given `closes`.
///
/// Returns `None` when there is insufficient data to seed both the slow EMA
/// and the signal EMA of the MACD series.
///
/// # Edge cases
/// - Any zero period => `None`.
/// - `closes.len()` too short for `slow` or for `signal` more EMA points
///   after that => `None`.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<(f64, f64)> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);

    if ema_fast.is_empty() || ema_slow.is_empty() {
        return None;
    }

    // Align the two series: `ema_fast` starts `slow - fast` points earlier
    // than `ema_slow` since it needed fewer input closes to seed.
    let offset = ema_fast.len().checked_sub(ema_slow.len())?;
    let macd_line: Vec<f64> = ema_slow
        .iter()
        .enumerate()
        .map(|(i, &slow_v)| ema_fast[i + offset] - slow_v)
        .collect();

    if macd_line.len() < signal {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, signal);
    let signal_value = *signal_line.last()?;
    let macd_value = *macd_line.last()?;

    if !macd_value.is_finite() || !signal_value.is_finite() {
        return None;
    }

    Some((macd_value, signal_value))
}

/// Convenience: standard 12/26/9 MACD.
pub fn current_macd(closes: &[f64]) -> Option<(f64, f64)> {
    calculate_macd(closes, 12, 26, 9)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_empty_input() {
        assert!(calculate_macd(&[], 12, 26, 9).is_none());
    }

    #[test]
    fn macd_zero_period() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn macd_fast_not_less_than_slow_is_none() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_ascending_series_is_positive() {
        // A steadily rising series means the fast EMA leads the slow EMA,
        // so MACD should be positive.
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let (macd, _signal) = current_macd(&closes).expect("should compute");
        assert!(macd > 0.0);
    }

    #[test]
    fn macd_descending_series_is_negative() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let (macd, _signal) = current_macd(&closes).expect("should compute");
        assert!(macd < 0.0);
    }

    #[test]
    fn macd_flat_series_is_near_zero() {
        let closes = vec![100.0; 100];
        let (macd, signal) = current_macd(&closes).expect("should compute");
        assert!(macd.abs() < 1e-8);
        assert!(signal.abs() < 1e-8);
    }
}
