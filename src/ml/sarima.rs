//! Seasonal ARIMA estimation by conditional sum of squares.
//!
//! The model is `φ(B)Φ(B^s)(1-B)^d(1-B^s)^D (y_t - μ) = θ(B)Θ(B^s) ε_t`
//! with `μ` estimated only when no differencing is applied. Parameters are
//! found by maximizing the concentrated Gaussian conditional likelihood with
//! a bounded Nelder-Mead search.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::FitterConfig;
use crate::error::FitError;
use crate::ml::optim::{NelderMead, NelderMeadOptions};
use crate::stats;

/// Coefficient magnitude bound during estimation.
const COEF_BOUND: f64 = 0.99;

/// Floor on the innovation variance so exact fits stay finite.
const MIN_VARIANCE: f64 = 1e-8;

/// Orders of a seasonal ARIMA model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SarimaSpec {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl SarimaSpec {
    pub fn new(order: (usize, usize, usize), seasonal: (usize, usize, usize, usize)) -> Self {
        Self {
            p: order.0,
            d: order.1,
            q: order.2,
            seasonal_p: seasonal.0,
            seasonal_d: seasonal.1,
            seasonal_q: seasonal.2,
            period: seasonal.3,
        }
    }

    pub fn order(&self) -> (usize, usize, usize) {
        (self.p, self.d, self.q)
    }

    pub fn seasonal_order(&self) -> (usize, usize, usize, usize) {
        (self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period)
    }

    /// True when the seasonal part contributes nothing.
    pub fn is_non_seasonal(&self) -> bool {
        self.seasonal_p == 0 && self.seasonal_d == 0 && self.seasonal_q == 0
    }

    pub fn has_intercept(&self) -> bool {
        self.d == 0 && self.seasonal_d == 0
    }

    pub fn coefficient_count(&self) -> usize {
        self.p + self.q + self.seasonal_p + self.seasonal_q
    }

    /// Free parameters counted by the information criteria, σ² included.
    pub fn parameter_count(&self) -> usize {
        self.coefficient_count() + usize::from(self.has_intercept()) + 1
    }

    fn differencing_lag(&self) -> usize {
        self.d + self.seasonal_d * self.period
    }

    fn ar_span(&self) -> usize {
        self.p + self.seasonal_p * self.period
    }

    /// Shortest series this spec can be estimated on.
    pub fn min_observations(&self) -> usize {
        self.differencing_lag() + self.ar_span() + self.parameter_count() + 2
    }
}

impl fmt::Display for SarimaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SARIMA({},{},{})({},{},{})[{}]",
            self.p, self.d, self.q, self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
        )
    }
}

// ==================== Lag Polynomials ====================

/// `1 + c_1 B + c_2 B^2 + ...` stored as `[1, c_1, c_2, ...]`.
fn lag_poly(coefs: &[f64], stride: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefs.len() * stride + 1];
    poly[0] = 1.0;
    for (i, c) in coefs.iter().enumerate() {
        poly[(i + 1) * stride] = sign * c;
    }
    poly
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        if *x == 0.0 {
            continue;
        }
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn difference_poly(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    let mut seasonal = vec![0.0; period + 1];
    seasonal[0] = 1.0;
    seasonal[period] = -1.0;
    for _ in 0..seasonal_d {
        poly = poly_mul(&poly, &seasonal);
    }
    poly
}

/// Non-zero `(lag, coefficient)` pairs past lag zero, negated for AR use.
fn ar_terms(poly: &[f64]) -> Vec<(usize, f64)> {
    poly.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, c)| **c != 0.0)
        .map(|(i, c)| (i, -c))
        .collect()
}

fn ma_terms(poly: &[f64]) -> Vec<(usize, f64)> {
    poly.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, c)| **c != 0.0)
        .map(|(i, c)| (i, *c))
        .collect()
}

/// Apply `(1-B)^d (1-B^s)^D` to a series.
pub fn difference(values: &[f64], d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut out = values.to_vec();
    for _ in 0..d {
        out = out.windows(2).map(|w| w[1] - w[0]).collect();
    }
    for _ in 0..seasonal_d {
        if out.len() <= period {
            return Vec::new();
        }
        out = (period..out.len()).map(|t| out[t] - out[t - period]).collect();
    }
    out
}

// ==================== Parameters ====================

#[derive(Debug, Clone)]
struct Coefficients {
    ar: Vec<f64>,
    seasonal_ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ma: Vec<f64>,
    mean: f64,
}

impl Coefficients {
    fn unpack(spec: &SarimaSpec, x: &[f64], mean_center: f64, mean_scale: f64) -> Self {
        let mut it = x.iter().copied();
        let mut take = |n: usize| -> Vec<f64> { it.by_ref().take(n).collect() };
        let ar = take(spec.p);
        let seasonal_ar = take(spec.seasonal_p);
        let ma = take(spec.q);
        let seasonal_ma = take(spec.seasonal_q);
        let mean = if spec.has_intercept() {
            mean_center + mean_scale * take(1).first().copied().unwrap_or(0.0)
        } else {
            0.0
        };
        Self {
            ar,
            seasonal_ar,
            ma,
            seasonal_ma,
            mean,
        }
    }

    fn ar_poly(&self, period: usize) -> Vec<f64> {
        poly_mul(
            &lag_poly(&self.ar, 1, -1.0),
            &lag_poly(&self.seasonal_ar, period, -1.0),
        )
    }

    fn ma_poly(&self, period: usize) -> Vec<f64> {
        poly_mul(
            &lag_poly(&self.ma, 1, 1.0),
            &lag_poly(&self.seasonal_ma, period, 1.0),
        )
    }
}

/// Conditional residuals of the differenced series `w`, starting at `start`.
fn conditional_residuals(
    w: &[f64],
    mean: f64,
    ar: &[(usize, f64)],
    ma: &[(usize, f64)],
    start: usize,
) -> Vec<f64> {
    let mut e = vec![0.0; w.len()];
    for t in start..w.len() {
        let mut value = w[t] - mean;
        for &(lag, c) in ar {
            value -= c * (w[t - lag] - mean);
        }
        for &(lag, c) in ma {
            if t >= lag + start {
                value -= c * e[t - lag];
            }
        }
        e[t] = value;
    }
    e
}

// ==================== Fitted Model ====================

/// A converged seasonal ARIMA fit together with the state needed to forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSarima {
    pub spec: SarimaSpec,
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
    pub intercept: Option<f64>,
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Residuals over the effective sample.
    pub residuals: Vec<f64>,
    /// Observed series the model was estimated on.
    history: Vec<f64>,
    /// Innovations aligned with `history`, zero where undefined.
    innovations: Vec<f64>,
}

/// Tagged result of fitting one candidate.
#[derive(Debug, Clone)]
pub enum FitOutcome {
    Converged(Box<FittedSarima>),
    Failed(FitError),
}

impl FitOutcome {
    pub fn into_result(self) -> Result<FittedSarima, FitError> {
        match self {
            FitOutcome::Converged(model) => Ok(*model),
            FitOutcome::Failed(err) => Err(err),
        }
    }
}

/// Point forecasts with symmetric normal intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct SarimaForecast {
    pub mean: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Estimate `spec` on `values`.
pub fn fit(values: &[f64], spec: SarimaSpec, config: &FitterConfig) -> FitOutcome {
    match fit_inner(values, spec, config) {
        Ok(model) => FitOutcome::Converged(Box::new(model)),
        Err(err) => FitOutcome::Failed(err),
    }
}

fn fit_inner(values: &[f64], spec: SarimaSpec, config: &FitterConfig) -> Result<FittedSarima, FitError> {
    let n = values.len();
    let needed = spec.min_observations();
    if n < needed || spec.period == 0 {
        return Err(FitError::InsufficientData { needed, got: n });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(FitError::Numerical("non-finite value in series".to_string()));
    }

    let w = difference(values, spec.d, spec.seasonal_d, spec.period);
    let start = spec.ar_span();
    let n_eff = w.len().saturating_sub(start);
    if n_eff <= spec.parameter_count() {
        return Err(FitError::InsufficientData { needed, got: n });
    }

    let mean_center = stats::mean(&w);
    let mean_scale = stats::std_dev(&w).max(1.0);
    let dims = spec.coefficient_count() + usize::from(spec.has_intercept());

    let css = |x: &[f64]| -> f64 {
        let coefs = Coefficients::unpack(&spec, x, mean_center, mean_scale);
        let ar = ar_terms(&coefs.ar_poly(spec.period));
        let ma = ma_terms(&coefs.ma_poly(spec.period));
        let e = conditional_residuals(&w, coefs.mean, &ar, &ma, start);
        e[start..].iter().map(|v| v * v).sum()
    };
    let objective = |x: &[f64]| -> f64 {
        let sigma2 = (css(x) / n_eff as f64).max(MIN_VARIANCE);
        0.5 * n_eff as f64 * sigma2.ln()
    };

    let mut bounds = vec![(-COEF_BOUND, COEF_BOUND); spec.coefficient_count()];
    if spec.has_intercept() {
        bounds.push((f64::NEG_INFINITY, f64::INFINITY));
    }
    let optimizer = NelderMead::new(
        NelderMeadOptions {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            ..NelderMeadOptions::default()
        },
        bounds,
    );
    let result = optimizer.minimize(objective, &vec![0.0; dims]);

    if !result.converged {
        return Err(FitError::NotConverged {
            iterations: result.iterations,
        });
    }
    if !result.value.is_finite() {
        return Err(FitError::Numerical("likelihood is not finite".to_string()));
    }

    let coefs = Coefficients::unpack(&spec, &result.point, mean_center, mean_scale);
    let ar = ar_terms(&coefs.ar_poly(spec.period));
    let ma = ma_terms(&coefs.ma_poly(spec.period));
    let e = conditional_residuals(&w, coefs.mean, &ar, &ma, start);
    let css_value: f64 = e[start..].iter().map(|v| v * v).sum();
    let sigma2 = (css_value / n_eff as f64).max(MIN_VARIANCE);

    // Normalize to the full length so differently differenced candidates compare
    let loglik_eff = -0.5 * n_eff as f64 * ((2.0 * PI * sigma2).ln() + 1.0);
    let log_likelihood = loglik_eff * n as f64 / n_eff as f64;
    let k = spec.parameter_count() as f64;
    let aic = -2.0 * log_likelihood + 2.0 * k;
    let bic = -2.0 * log_likelihood + k * (n as f64).ln();
    if !aic.is_finite() {
        return Err(FitError::Numerical("information criterion is not finite".to_string()));
    }

    let offset = spec.differencing_lag();
    let mut innovations = vec![0.0; n];
    for (i, v) in e.iter().enumerate().skip(start) {
        innovations[i + offset] = *v;
    }

    trace!(
        "{} converged in {} iterations, aic={:.3}",
        spec, result.iterations, aic
    );

    Ok(FittedSarima {
        spec,
        ar: coefs.ar,
        seasonal_ar: coefs.seasonal_ar,
        ma: coefs.ma,
        seasonal_ma: coefs.seasonal_ma,
        intercept: spec.has_intercept().then_some(coefs.mean),
        sigma2,
        log_likelihood,
        aic,
        bic,
        iterations: result.iterations,
        converged: true,
        residuals: e[start..].to_vec(),
        history: values.to_vec(),
        innovations,
    })
}

impl FittedSarima {
    pub fn n_obs(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Re-estimate the same orders on a new series.
    pub fn refit(&self, values: &[f64], config: &FitterConfig) -> FitOutcome {
        fit(values, self.spec, config)
    }

    fn coefficients(&self) -> Coefficients {
        Coefficients {
            ar: self.ar.clone(),
            seasonal_ar: self.seasonal_ar.clone(),
            ma: self.ma.clone(),
            seasonal_ma: self.seasonal_ma.clone(),
            mean: self.intercept.unwrap_or(0.0),
        }
    }

    /// AR polynomial in the level domain, differencing included.
    fn full_ar_poly(&self) -> Vec<f64> {
        let spec = &self.spec;
        poly_mul(
            &self.coefficients().ar_poly(spec.period),
            &difference_poly(spec.d, spec.seasonal_d, spec.period),
        )
    }

    /// MA(∞) weights `ψ_0 .. ψ_{h-1}`.
    pub fn psi_weights(&self, h: usize) -> Vec<f64> {
        let ar = ar_terms(&self.full_ar_poly());
        let ma_poly = self.coefficients().ma_poly(self.spec.period);
        let mut psi = vec![0.0; h];
        for j in 0..h {
            let mut value = if j == 0 {
                1.0
            } else {
                ma_poly.get(j).copied().unwrap_or(0.0)
            };
            for &(lag, c) in &ar {
                if lag <= j {
                    value += c * psi[j - lag];
                }
            }
            psi[j] = value;
        }
        psi
    }

    /// Forecast `h` steps past the end of the estimation series.
    ///
    /// `level` is the two-sided interval coverage, e.g. `0.95`.
    pub fn forecast(&self, h: usize, level: f64) -> SarimaForecast {
        let ar = ar_terms(&self.full_ar_poly());
        let ma = ma_terms(&self.coefficients().ma_poly(self.spec.period));
        let ar_sum: f64 = ar.iter().map(|(_, c)| c).sum();
        let constant = self.intercept.map_or(0.0, |mu| mu * (1.0 - ar_sum));

        let n = self.history.len();
        let mut path = self.history.clone();
        path.reserve(h);
        for step in 0..h {
            let t = n + step;
            let mut value = constant;
            for &(lag, c) in &ar {
                if lag <= t {
                    value += c * path[t - lag];
                }
            }
            for &(lag, c) in &ma {
                // Future innovations have zero expectation
                if lag > step && lag <= t {
                    value += c * self.innovations[t - lag];
                }
            }
            path.push(value);
        }
        let mean = path.split_off(n);

        let z = stats::normal_critical_value(level);
        let mut cumulative = 0.0;
        let std_errors: Vec<f64> = self
            .psi_weights(h)
            .iter()
            .map(|psi| {
                cumulative += psi * psi;
                (self.sigma2 * cumulative).sqrt()
            })
            .collect();
        let lower = mean.iter().zip(&std_errors).map(|(m, s)| m - z * s).collect();
        let upper = mean.iter().zip(&std_errors).map(|(m, s)| m + z * s).collect();

        SarimaForecast {
            mean,
            std_errors,
            lower,
            upper,
        }
    }
}
