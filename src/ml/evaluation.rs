//! Held-out error metrics and the go/no-go target check.

use serde::{Deserialize, Serialize};

use crate::config::EvaluationConfig;
use crate::error::{ForecastError, Result};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error over non-zero actuals, in percent.
    pub mape: f64,
    /// Sum of absolute errors over sum of absolute actuals, in percent.
    pub wape: f64,
    pub mse: f64,
    pub r_squared: f64,
    pub n_observations: usize,
}

/// Acceptance thresholds; either one being met is enough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceTarget {
    pub max_mape: f64,
    pub max_mae: f64,
}

impl From<&EvaluationConfig> for PerformanceTarget {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            max_mape: config.max_mape,
            max_mae: config.max_mae,
        }
    }
}

impl PerformanceMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(ForecastError::Validation(format!(
                "metric inputs differ in length: {} actuals, {} forecasts",
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Err(ForecastError::Validation(
                "cannot evaluate an empty forecast".to_string(),
            ));
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
        let abs_sum: f64 = errors.iter().map(|e| e.abs()).sum();
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae = abs_sum / n;

        let (pct_sum, pct_count) = actual
            .iter()
            .zip(&errors)
            .filter(|(a, _)| **a != 0.0)
            .fold((0.0, 0usize), |(s, c), (a, e)| (s + (e / a).abs(), c + 1));
        let mape = if pct_count == 0 {
            0.0
        } else {
            pct_sum / pct_count as f64 * 100.0
        };

        let actual_abs: f64 = actual.iter().map(|a| a.abs()).sum();
        let wape = if actual_abs == 0.0 {
            0.0
        } else {
            abs_sum / actual_abs * 100.0
        };

        let mean = stats::mean(actual);
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let r_squared = if ss_tot <= f64::EPSILON {
            0.0
        } else {
            1.0 - ss_res / ss_tot
        };

        Ok(Self {
            rmse: mse.sqrt(),
            mae,
            mape,
            wape,
            mse,
            r_squared,
            n_observations: actual.len(),
        })
    }

    pub fn meets_target(&self, target: &PerformanceTarget) -> bool {
        self.mape <= target.max_mape || self.mae <= target.max_mae
    }

    pub fn level(&self) -> PerformanceLevel {
        PerformanceLevel::from_mape(self.mape)
    }
}

/// MAPE rubric used in training reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Acceptable,
    NeedsImprovement,
}

impl PerformanceLevel {
    pub fn from_mape(mape: f64) -> Self {
        if mape < 5.0 {
            PerformanceLevel::Excellent
        } else if mape < 10.0 {
            PerformanceLevel::Good
        } else if mape < 15.0 {
            PerformanceLevel::Acceptable
        } else {
            // NaN lands here too
            PerformanceLevel::NeedsImprovement
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "Excellent",
            PerformanceLevel::Good => "Good",
            PerformanceLevel::Acceptable => "Acceptable",
            PerformanceLevel::NeedsImprovement => "Needs Improvement",
        }
    }
}

/// Operator advice keyed on held-out MAPE.
pub fn performance_recommendations(metrics: &PerformanceMetrics) -> Vec<String> {
    let advice: &[&str] = if metrics.mape < 5.0 {
        &[
            "Model accuracy is very high",
            "Maintain data quality and the retraining frequency",
        ]
    } else if metrics.mape < 10.0 {
        &[
            "Model meets the MAPE < 10% standard",
            "Monitor forecast accuracy regularly",
        ]
    } else {
        &[
            "Model needs improvement to reach the MAPE < 10% standard",
            "Consider adding more training data",
            "Evaluate the quality of the input data",
            "Try optimizing the model parameters",
        ]
    };
    advice.iter().map(|s| s.to_string()).collect()
}
