//! Numeric helpers shared by the preprocessing, testing and fitting stages.

use statrs::distribution::{ContinuousCDF, Normal};

// ==================== Descriptive Statistics ====================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by `n`).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (divides by `n - 1`).
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
}

/// Moment-based skewness. Zero for constant input.
pub fn skewness(values: &[f64]) -> f64 {
    let var = variance(values);
    if var <= f64::EPSILON {
        return 0.0;
    }
    let m = mean(values);
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / values.len() as f64;
    m3 / var.powf(1.5)
}

/// Moment-based excess kurtosis. Zero for constant input.
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let var = variance(values);
    if var <= f64::EPSILON {
        return 0.0;
    }
    let m = mean(values);
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / values.len() as f64;
    m4 / (var * var) - 3.0
}

/// Quantile with linear interpolation between order statistics.
///
/// `q` is in `[0, 1]`. Returns `NaN` for empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

/// Same as [`quantile`] but expects pre-sorted input.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

// ==================== Distributions ====================

/// Two-sided standard normal critical value for a confidence level.
///
/// `level = 0.95` gives roughly `1.96`.
pub fn normal_critical_value(level: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.inverse_cdf(0.5 + level / 2.0),
        Err(_) => f64::NAN,
    }
}

pub fn standard_normal_cdf(x: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(x),
        Err(_) => f64::NAN,
    }
}

// ==================== Linear Algebra ====================

/// Result of an ordinary least squares regression.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub rss: f64,
    pub nobs: usize,
}

/// Ordinary least squares of `y` on the rows of `x`.
///
/// Returns `None` if the normal equations are singular or there are not
/// more observations than regressors.
pub fn ols(x: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let n = y.len();
    let k = x.first()?.len();
    if n != x.len() || n <= k || k == 0 {
        return None;
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in x.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * yi;
            for j in 0..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    let inv = invert(&xtx)?;
    let coefficients: Vec<f64> = (0..k)
        .map(|i| (0..k).map(|j| inv[i][j] * xty[j]).sum())
        .collect();

    let rss: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&coefficients).map(|(a, b)| a * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();

    let sigma2 = rss / (n - k) as f64;
    let std_errors = (0..k).map(|i| (sigma2 * inv[i][i]).max(0.0).sqrt()).collect();

    Some(OlsFit {
        coefficients,
        std_errors,
        rss,
        nobs: n,
    })
}

/// Gauss-Jordan inversion with partial pivoting.
fn invert(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    let scale = matrix
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 * scale {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }
        for i in 0..n {
            if i != col {
                let factor = a[i][col];
                if factor != 0.0 {
                    for j in 0..n {
                        a[i][j] -= factor * a[col][j];
                        inv[i][j] -= factor * inv[col][j];
                    }
                }
            }
        }
    }
    Some(inv)
}
