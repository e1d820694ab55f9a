//! Residual diagnostics for a fitted model.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::stats;

pub const DEFAULT_LAGS: usize = 10;
const WHITE_NOISE_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LjungBoxLag {
    pub lag: usize,
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub ljung_box: Vec<LjungBoxLag>,
    pub residual_mean: f64,
    pub residual_std: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    /// Every Ljung-Box p-value exceeds 0.05.
    pub white_noise: bool,
}

impl DiagnosticReport {
    /// Residual structure remains; forecasts should be read with care.
    pub fn low_confidence(&self) -> bool {
        !self.white_noise
    }
}

/// Ljung-Box Q at each lag `1..=max_lag`, with `lag` degrees of freedom.
///
/// A residual series with no variance is reported as uncorrelated.
pub fn ljung_box(residuals: &[f64], max_lag: usize) -> Vec<LjungBoxLag> {
    let n = residuals.len();
    let max_lag = max_lag.min(n.saturating_sub(1));
    let mean = stats::mean(residuals);
    let denom: f64 = residuals.iter().map(|r| (r - mean).powi(2)).sum();

    let mut q = 0.0;
    (1..=max_lag)
        .map(|lag| {
            if denom <= f64::EPSILON {
                return LjungBoxLag {
                    lag,
                    statistic: 0.0,
                    p_value: 1.0,
                };
            }
            let acf: f64 = (lag..n)
                .map(|t| (residuals[t] - mean) * (residuals[t - lag] - mean))
                .sum::<f64>()
                / denom;
            q += acf * acf / (n - lag) as f64;
            let statistic = n as f64 * (n as f64 + 2.0) * q;
            let p_value = ChiSquared::new(lag as f64)
                .map(|chi| 1.0 - chi.cdf(statistic))
                .unwrap_or(f64::NAN);
            LjungBoxLag {
                lag,
                statistic,
                p_value,
            }
        })
        .collect()
}

pub fn diagnose(residuals: &[f64]) -> DiagnosticReport {
    let ljung_box = ljung_box(residuals, DEFAULT_LAGS);
    let white_noise = ljung_box.iter().all(|l| l.p_value > WHITE_NOISE_ALPHA);
    DiagnosticReport {
        ljung_box,
        residual_mean: stats::mean(residuals),
        residual_std: stats::std_dev(residuals),
        skewness: stats::skewness(residuals),
        excess_kurtosis: stats::excess_kurtosis(residuals),
        white_noise,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_white_noise_passes() {
        let mut rng = StdRng::seed_from_u64(42);
        let residuals: Vec<f64> = (0..500).map(|_| rng.random::<f64>() - 0.5).collect();
        let report = diagnose(&residuals);
        assert_eq!(report.ljung_box.len(), 10);
        assert!(report.white_noise);
        assert!(!report.low_confidence());
        assert!(report.residual_mean.abs() < 0.05);
    }

    #[test]
    fn test_autocorrelated_residuals_flagged() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut residuals = vec![0.0; 300];
        for t in 1..300 {
            residuals[t] = 0.8 * residuals[t - 1] + rng.random::<f64>() - 0.5;
        }
        let report = diagnose(&residuals);
        assert!(!report.white_noise);
        assert!(report.ljung_box[0].p_value < 0.01);
    }

    #[test]
    fn test_zero_residuals_are_white_noise() {
        let report = diagnose(&[0.0; 30]);
        assert!(report.white_noise);
        assert_eq!(report.residual_std, 0.0);
    }

    #[test]
    fn test_statistic_is_cumulative() {
        let residuals: Vec<f64> = (0..50).map(|i| ((i * 7) % 11) as f64).collect();
        let lags = ljung_box(&residuals, 5);
        for pair in lags.windows(2) {
            assert!(pair[1].statistic >= pair[0].statistic);
        }
    }
}
