// =============================================================================
// MACD histogram — EMA(12) - EMA(26), signal = EMA(9) of that difference
// =============================================================================
//
// Only the histogram value (macd line minus signal line) is surfaced to the
// feature aggregator; the sign and magnitude are what the prompt template
// and the decision engine reason about, matching how the original collector
// exposes a single `macd_hist` field rather than all three series.
// =============================================================================

use super::ema::calculate_ema;

const FAST_PERIOD: usize = 12;
const SLOW_PERIOD: usize = 26;
const SIGNAL_PERIOD: usize = 9;

/// Compute the most recent MACD histogram value, or `None` if there isn't
/// enough data to seed both EMAs plus the signal line.
pub fn calculate_macd_histogram(closes: &[f64]) -> Option<f64> {
    if closes.len() < SLOW_PERIOD + SIGNAL_PERIOD {
        return None;
    }

    let fast = calculate_ema(closes, FAST_PERIOD);
    let slow = calculate_ema(closes, SLOW_PERIOD);
    if fast.is_empty() || slow.is_empty() {
        return None;
    }

    // fast and slow cover different-length prefixes of the same close series;
    // align them on their shared tail before differencing.
    let aligned = slow.len().min(fast.len());
    let fast_tail = &fast[fast.len() - aligned..];
    let slow_tail = &slow[slow.len() - aligned..];
    let macd_line: Vec<f64> = fast_tail.iter().zip(slow_tail.iter()).map(|(f, s)| f - s).collect();
    if macd_line.len() < SIGNAL_PERIOD {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, SIGNAL_PERIOD);
    let hist = macd_line.last()? - signal_line.last()?;

    if hist.is_finite() {
        Some(hist)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_returns_none() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd_histogram(&closes).is_none());
    }

    #[test]
    fn trending_market_produces_finite_histogram() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let hist = calculate_macd_histogram(&closes).unwrap();
        assert!(hist.is_finite());
    }

    #[test]
    fn flat_market_histogram_is_near_zero() {
        let closes = vec![100.0; 60];
        let hist = calculate_macd_histogram(&closes).unwrap();
        assert!(hist.abs() < 1e-9, "expected ~0.0, got {hist}");
    }
}
