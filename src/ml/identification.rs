//! ACF/PACF identification of the training series.
//!
//! Produces the correlograms an analyst would read before choosing orders,
//! plus the dominant period suggested by the ACF peaks. The search does not
//! depend on it; the pipeline only logs a warning when the suggested period
//! is not among the configured ones.

use serde::{Deserialize, Serialize};

use crate::stats;

pub const DEFAULT_LAGS: usize = 40;
/// Minimum autocorrelation for a lag to count as a seasonal peak.
const PEAK_THRESHOLD: f64 = 0.3;
const MIN_PERIOD: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationReport {
    /// Index 0 is lag 0.
    pub acf: Vec<f64>,
    pub pacf: Vec<f64>,
    /// Approximate 95% band, `1.96 / sqrt(n)`.
    pub confidence_bound: f64,
    pub significant_acf_lags: Vec<usize>,
    pub significant_pacf_lags: Vec<usize>,
    /// ACF peaks after harmonic filtering, strongest first.
    pub seasonal_peaks: Vec<usize>,
    pub suggested_period: Option<usize>,
}

/// Sample autocorrelation with the biased `n` denominator.
///
/// A series without variance has zero autocorrelation at every lag.
pub fn acf(values: &[f64], max_lag: usize) -> Vec<f64> {
    let n = values.len();
    let variance = stats::variance(values);
    if n == 0 || variance < 1e-10 {
        return vec![0.0; max_lag + 1];
    }
    let mean = stats::mean(values);

    (0..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let covariance: f64 = values
                .iter()
                .zip(values.iter().skip(lag))
                .map(|(a, b)| (a - mean) * (b - mean))
                .sum::<f64>()
                / n as f64;
            covariance / variance
        })
        .collect()
}

/// Partial autocorrelation from an autocorrelation sequence (Durbin-Levinson).
///
/// `acf[0]` is lag 0. Lags past a singular step are reported as zero.
pub fn pacf_from_acf(acf: &[f64]) -> Vec<f64> {
    let max_lag = acf.len().saturating_sub(1);
    let mut pacf = vec![0.0; max_lag + 1];
    if acf.is_empty() {
        return pacf;
    }
    pacf[0] = 1.0;

    let mut phi: Vec<f64> = Vec::with_capacity(max_lag);
    for k in 1..=max_lag {
        let num = acf[k] - (1..k).map(|j| phi[j - 1] * acf[k - j]).sum::<f64>();
        let den = 1.0 - (1..k).map(|j| phi[j - 1] * acf[j]).sum::<f64>();
        if den.abs() < 1e-12 {
            break;
        }
        let phi_kk = num / den;
        let mut next: Vec<f64> = (1..k).map(|j| phi[j - 1] - phi_kk * phi[k - j - 1]).collect();
        next.push(phi_kk);
        phi = next;
        pacf[k] = phi_kk;
    }
    pacf
}

/// Local ACF maxima above the peak threshold, strongest first.
fn acf_peaks(acf: &[f64]) -> Vec<(usize, f64)> {
    let mut peaks: Vec<(usize, f64)> = (MIN_PERIOD..acf.len().saturating_sub(1))
        .filter(|&i| acf[i] > acf[i - 1] && acf[i] > acf[i + 1] && acf[i] > PEAK_THRESHOLD)
        .map(|i| (i, acf[i]))
        .collect();
    peaks.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    peaks
}

/// Drop peaks that sit at an integer multiple of a stronger one.
fn filter_harmonics(peaks: Vec<(usize, f64)>) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (period, _) in peaks {
        let harmonic = kept.iter().any(|&base| {
            let ratio = period as f64 / base as f64;
            let rounded = ratio.round();
            (ratio - rounded).abs() < 0.1 && rounded > 1.0
        });
        if !harmonic {
            kept.push(period);
        }
    }
    kept
}

/// Correlograms up to `max_lags`, capped below half the series length.
pub fn identify(values: &[f64], max_lags: usize) -> IdentificationReport {
    let n = values.len();
    let lags = max_lags.min((n / 2).saturating_sub(1));
    let acf = acf(values, lags);
    let pacf = pacf_from_acf(&acf);
    let confidence_bound = if n == 0 {
        0.0
    } else {
        1.96 / (n as f64).sqrt()
    };

    let significant = |series: &[f64]| -> Vec<usize> {
        (1..series.len())
            .filter(|&lag| series[lag].abs() > confidence_bound)
            .collect()
    };
    let seasonal_peaks = filter_harmonics(acf_peaks(&acf));

    IdentificationReport {
        significant_acf_lags: significant(&acf),
        significant_pacf_lags: significant(&pacf),
        suggested_period: seasonal_peaks.first().copied(),
        seasonal_peaks,
        acf,
        pacf,
        confidence_bound,
    }
}
