use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{Frequency, VolatilityWindow};

/// Minimum number of returns before any rolling window is reported.
pub const MIN_RETURNS_FOR_ROLLING: usize = 20;

/// Sample standard deviation (n-1 denominator). `None` below two samples.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(variance.sqrt())
}

/// Annualized volatility of a log-return series.
pub fn annualized_volatility(returns: &[f64], frequency: Frequency) -> Option<f64> {
    sample_std_dev(returns).map(|sd| sd * frequency.observations_per_year().sqrt())
}

/// Annualized volatility over the most recent 1d/7d/30d windows.
///
/// Windows with fewer returns than their size are left out, and nothing is
/// reported until at least [`MIN_RETURNS_FOR_ROLLING`] returns exist.
pub fn rolling_volatility(returns: &[f64], frequency: Frequency) -> BTreeMap<VolatilityWindow, f64> {
    let mut result = BTreeMap::new();
    if returns.len() < MIN_RETURNS_FOR_ROLLING {
        return result;
    }

    for (window, size) in frequency.window_sizes() {
        let Some(size) = size else { continue };
        if returns.len() < size {
            continue;
        }
        let recent = &returns[returns.len() - size..];
        if let Some(vol) = annualized_volatility(recent, frequency) {
            result.insert(window, vol);
        }
    }
    result
}

/// `ln(current / previous)`, or `None` when either price is not positive.
pub fn log_return(previous: f64, current: f64) -> Option<f64> {
    if previous > 0.0 && current > 0.0 && previous.is_finite() && current.is_finite() {
        Some((current / previous).ln())
    } else {
        None
    }
}

/// Infers the observation frequency from the median spacing of timestamps.
pub fn infer_frequency(timestamps: &[DateTime<Utc>]) -> Option<Frequency> {
    if timestamps.len() < 2 {
        return None;
    }
    let mut gaps: Vec<i64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .filter(|g| *g > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];

    Some(if median <= 20 * 60 {
        Frequency::FifteenMin
    } else if median <= 2 * 3600 {
        Frequency::Hourly
    } else {
        Frequency::Daily
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_scaling_matches_sqrt_observations() {
        // Alternating +s/-s has sample std dev s * sqrt(n / (n-1))
        let sigma = 0.01;
        let n = 1_000;
        let returns: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { sigma } else { -sigma }).collect();
        let expected_sd = sigma * (n as f64 / (n as f64 - 1.0)).sqrt();

        let hourly = annualized_volatility(&returns, Frequency::Hourly).unwrap();
        assert!((hourly - expected_sd * 8_760f64.sqrt()).abs() < 1e-12);

        let daily = annualized_volatility(&returns, Frequency::Daily).unwrap();
        assert!((daily - expected_sd * 365f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_returns() {
        assert!(annualized_volatility(&[], Frequency::Hourly).is_none());
        assert!(annualized_volatility(&[0.01], Frequency::Hourly).is_none());
        assert!(annualized_volatility(&[0.01, -0.01], Frequency::Hourly).is_some());
    }

    #[test]
    fn test_rolling_short_series_is_empty() {
        let returns = [0.01, -0.015, 0.02, -0.01, 0.005];
        let rolling = rolling_volatility(&returns, Frequency::Hourly);
        assert!(rolling.get(&VolatilityWindow::ThirtyDays).is_none());
        assert!(rolling.is_empty());
    }

    #[test]
    fn test_rolling_uses_most_recent_window() {
        // 24 flat returns followed by nothing: the 1d window only sees the tail
        let mut returns = vec![0.05, -0.05];
        returns.extend(std::iter::repeat(0.0).take(24));
        let rolling = rolling_volatility(&returns, Frequency::Hourly);
        assert_eq!(rolling.get(&VolatilityWindow::OneDay), Some(&0.0));
        assert!(rolling.get(&VolatilityWindow::SevenDays).is_none());
    }

    #[test]
    fn test_rolling_daily_has_no_one_day_window() {
        let returns: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 0.02 } else { -0.02 }).collect();
        let rolling = rolling_volatility(&returns, Frequency::Daily);
        assert!(rolling.get(&VolatilityWindow::OneDay).is_none());
        assert!(rolling.contains_key(&VolatilityWindow::SevenDays));
        assert!(rolling.contains_key(&VolatilityWindow::ThirtyDays));
    }

    #[test]
    fn test_log_return() {
        assert!((log_return(100.0, 110.0).unwrap() - (1.1f64).ln()).abs() < 1e-12);
        assert!(log_return(0.0, 1.0).is_none());
        assert!(log_return(1.0, -1.0).is_none());
    }

    #[test]
    fn test_infer_frequency() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hourly: Vec<_> = (0..10).map(|i| start + Duration::hours(i)).collect();
        assert_eq!(infer_frequency(&hourly), Some(Frequency::Hourly));

        let daily: Vec<_> = (0..10).map(|i| start + Duration::days(i)).collect();
        assert_eq!(infer_frequency(&daily), Some(Frequency::Daily));

        let quarter: Vec<_> = (0..10).map(|i| start + Duration::minutes(15 * i)).collect();
        assert_eq!(infer_frequency(&quarter), Some(Frequency::FifteenMin));

        assert_eq!(infer_frequency(&hourly[..1]), None);
    }
}
