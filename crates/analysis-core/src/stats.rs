//! Small numeric helpers shared by the valuation engine.
//!
//! Every function here returns `None` instead of a sentinel when the result is
//! undefined (empty input, zero denominator, non-finite output).

use statrs::statistics::Statistics;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    finite(data.mean())
}

/// Sample standard deviation (n - 1). Needs at least two points.
pub fn sample_std_dev(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    finite(data.std_dev())
}

/// `numerator / denominator`, undefined when the denominator is zero.
pub fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    finite(numerator / denominator)
}

/// Percentage by which `value` sits below `mean`: `(mean - value) / mean * 100`.
///
/// Positive means the value trades at a discount to the group, negative at a premium.
pub fn premium_pct(mean: f64, value: f64) -> Option<f64> {
    safe_ratio(mean - value, mean).map(|r| r * 100.0)
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}
