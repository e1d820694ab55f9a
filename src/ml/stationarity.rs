//! Augmented Dickey-Fuller unit-root test with a constant term.

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::stats;

/// p-value at or below which the series is called stationary.
pub const SIGNIFICANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    pub one_percent: f64,
    pub five_percent: f64,
    pub ten_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationarityReport {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lags: usize,
    pub nobs: usize,
    pub critical_values: CriticalValues,
    pub is_stationary: bool,
}

/// Run the ADF test, choosing the lag order by AIC.
///
/// Lags are searched up to `12 * (n / 100)^(1/4)`, all candidates fitted on
/// the same sample, then the chosen lag is refitted on every usable row.
pub fn adf_test(series: &[f64]) -> Result<StationarityReport> {
    let n = series.len();
    if n < 8 {
        return Err(ForecastError::Degenerate(format!(
            "ADF test needs at least 8 observations, got {n}"
        )));
    }
    if stats::variance(series) <= f64::EPSILON {
        return Err(ForecastError::Degenerate(
            "ADF test is undefined for a constant series".to_string(),
        ));
    }

    let diff: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).floor() as usize;
    let max_lag = schwert.min(n / 2 - 3);

    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        let Some(fit) = adf_regression(series, &diff, lag, max_lag) else {
            continue;
        };
        let nobs = fit.nobs as f64;
        let k = fit.coefficients.len() as f64;
        let aic = nobs * (fit.rss / nobs).ln() + 2.0 * k;
        if best.is_none_or(|(_, b)| aic < b) {
            best = Some((lag, aic));
        }
    }
    let (lag, _) = best.ok_or_else(|| {
        ForecastError::Degenerate("ADF regression is singular at every lag".to_string())
    })?;

    let fit = adf_regression(series, &diff, lag, lag)
        .ok_or_else(|| ForecastError::Degenerate("ADF regression is singular".to_string()))?;
    let se = fit.std_errors[1];
    if se <= 0.0 || !se.is_finite() {
        return Err(ForecastError::Degenerate(
            "ADF coefficient standard error is zero".to_string(),
        ));
    }
    let statistic = fit.coefficients[1] / se;
    let p_value = mackinnon_p_value(statistic);

    Ok(StationarityReport {
        statistic,
        p_value,
        used_lags: lag,
        nobs: fit.nobs,
        critical_values: critical_values(fit.nobs),
        is_stationary: p_value <= SIGNIFICANCE,
    })
}

/// `Δy_t = α + β y_{t-1} + Σ γ_i Δy_{t-i}` over rows `t >= skip`.
fn adf_regression(level: &[f64], diff: &[f64], lag: usize, skip: usize) -> Option<stats::OlsFit> {
    let start = skip.max(lag);
    let mut x = Vec::with_capacity(diff.len().saturating_sub(start));
    let mut y = Vec::with_capacity(x.capacity());
    for t in start..diff.len() {
        let mut row = Vec::with_capacity(lag + 2);
        row.push(1.0);
        row.push(level[t]);
        row.extend((1..=lag).map(|i| diff[t - i]));
        x.push(row);
        y.push(diff[t]);
    }
    stats::ols(&x, &y)
}

/// MacKinnon (1994) approximate p-value, constant-only regression.
fn mackinnon_p_value(tau: f64) -> f64 {
    const TAU_MAX: f64 = 2.74;
    const TAU_MIN: f64 = -18.83;
    const TAU_STAR: f64 = -1.61;
    const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
    const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

    if tau > TAU_MAX {
        return 1.0;
    }
    if tau < TAU_MIN {
        return 0.0;
    }
    let coefs: &[f64] = if tau <= TAU_STAR { &SMALL_P } else { &LARGE_P };
    let poly = coefs.iter().rev().fold(0.0, |acc, c| acc * tau + c);
    stats::standard_normal_cdf(poly)
}

/// MacKinnon (2010) finite-sample critical values, constant-only regression.
fn critical_values(nobs: usize) -> CriticalValues {
    let t = nobs as f64;
    let surface = |b: [f64; 4]| b[0] + b[1] / t + b[2] / (t * t) + b[3] / (t * t * t);
    CriticalValues {
        one_percent: surface([-3.43035, -6.5393, -16.786, -79.433]),
        five_percent: surface([-2.86154, -2.8903, -4.234, -40.040]),
        ten_percent: surface([-2.56677, -1.5384, -2.809, 0.0]),
    }
}
