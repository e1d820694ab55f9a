//! Interval forecasts with clinical classification and recommendations.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::ModelCache;
use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::ml::persistence::FittedModelArtifact;

pub const MIN_HORIZON: usize = 1;
pub const MAX_HORIZON: usize = 30;
pub const MIN_CONFIDENCE: f64 = 0.80;
pub const MAX_CONFIDENCE: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyStatus {
    HighRisk,
    Optimal,
    UnderUtilized,
    /// The target is not a percentage, so the occupancy bands do not apply.
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Above this is high-risk.
    pub high: f64,
    /// Below this is under-utilized.
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 85.0,
            low: 60.0,
        }
    }
}

impl From<&ForecastConfig> for Thresholds {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            high: config.high_threshold,
            low: config.low_threshold,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, value: f64) -> OccupancyStatus {
        if value > self.high {
            OccupancyStatus::HighRisk
        } else if value < self.low {
            OccupancyStatus::UnderUtilized
        } else {
            OccupancyStatus::Optimal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub status: OccupancyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub high_risk_days: usize,
    pub low_utilization_days: usize,
    pub optimal_days: usize,
    pub average_predicted: f64,
    pub overutilization_risk: bool,
    pub underutilization_risk: bool,
}

impl ForecastSummary {
    fn from_points(points: &[ForecastPoint]) -> Self {
        let count = |s: OccupancyStatus| points.iter().filter(|p| p.status == s).count();
        let high_risk_days = count(OccupancyStatus::HighRisk);
        let low_utilization_days = count(OccupancyStatus::UnderUtilized);
        let average_predicted = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| p.point_estimate).sum::<f64>() / points.len() as f64
        };
        Self {
            high_risk_days,
            low_utilization_days,
            optimal_days: count(OccupancyStatus::Optimal),
            average_predicted,
            overutilization_risk: high_risk_days > 0,
            underutilization_risk: low_utilization_days * 2 > points.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub model: String,
    pub trained_at: DateTime<Utc>,
    pub confidence_level: f64,
    pub points: Vec<ForecastPoint>,
    pub summary: ForecastSummary,
    pub recommendations: Vec<String>,
}

/// What the serving layer returns to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastResponse {
    Ready(ForecastResult),
    NotReady { reason: String },
}

/// Rule table over the day counts.
pub fn recommendations(summary: &ForecastSummary, horizon: usize) -> Vec<String> {
    let mut out = Vec::new();
    if summary.high_risk_days > 0 {
        out.push(format!(
            "{} of {} days exceed the high-occupancy threshold: prepare surge capacity",
            summary.high_risk_days, horizon
        ));
        out.push("Accelerate discharge planning for patients ready to leave".to_string());
        out.push("Set up an admission queue for elective cases".to_string());
    }
    if summary.low_utilization_days * 2 > horizon {
        out.push(format!(
            "{} of {} days fall below the utilization floor: expand referral outreach",
            summary.low_utilization_days, horizon
        ));
        out.push("Review operational efficiency of under-used wards".to_string());
        out.push("Adjust staff scheduling to the lower census".to_string());
    }
    if out.is_empty() {
        out.push("Maintain the current occupancy level".to_string());
        out.push("Keep monitoring the daily trend".to_string());
    }
    out
}

pub struct Forecaster {
    cache: Arc<ModelCache>,
    thresholds: Thresholds,
}

impl Forecaster {
    pub fn new(cache: Arc<ModelCache>, thresholds: Thresholds) -> Self {
        Self { cache, thresholds }
    }

    pub fn forecast(&self, horizon: usize, confidence: f64) -> Result<ForecastResult> {
        validate_request(horizon, confidence)?;
        let artifact = self.cache.get_or_load()?;
        forecast_from(&artifact, horizon, confidence, self.thresholds)
    }

    /// Like [`Forecaster::forecast`], but an untrained engine is a normal answer.
    pub fn respond(&self, horizon: usize, confidence: f64) -> Result<ForecastResponse> {
        match self.forecast(horizon, confidence) {
            Ok(result) => Ok(ForecastResponse::Ready(result)),
            Err(ForecastError::ModelNotTrained) => Ok(ForecastResponse::NotReady {
                reason: "no model has been trained yet".to_string(),
            }),
            Err(err) => Err(err),
        }
    }
}

fn validate_request(horizon: usize, confidence: f64) -> Result<()> {
    if !(MIN_HORIZON..=MAX_HORIZON).contains(&horizon) {
        return Err(ForecastError::Validation(format!(
            "horizon must be between {MIN_HORIZON} and {MAX_HORIZON} days, got {horizon}"
        )));
    }
    if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&confidence) {
        return Err(ForecastError::Validation(format!(
            "confidence level must be between {MIN_CONFIDENCE} and {MAX_CONFIDENCE}, got {confidence}"
        )));
    }
    Ok(())
}

/// Forecast from one artifact snapshot.
pub fn forecast_from(
    artifact: &FittedModelArtifact,
    horizon: usize,
    confidence: f64,
    thresholds: Thresholds,
) -> Result<ForecastResult> {
    validate_request(horizon, confidence)?;
    let raw = artifact.model.forecast(horizon, confidence);
    let percentage = artifact.target.is_percentage();
    let bound = |v: f64| {
        if percentage {
            v.clamp(0.0, 100.0)
        } else {
            v.max(0.0)
        }
    };

    let mut points = Vec::with_capacity(horizon);
    for h in 0..horizon {
        let date = artifact.data_end + Duration::days(h as i64 + 1);
        let point_estimate = bound(raw.mean[h]);
        let lower_bound = bound(raw.lower[h]);
        let upper_bound = bound(raw.upper[h]);
        // NaN fails every comparison and is rejected here as well
        if !(lower_bound <= point_estimate && point_estimate <= upper_bound) {
            warn!(
                "Rejecting forecast on {}: {} <= {} <= {} does not hold",
                date, lower_bound, point_estimate, upper_bound
            );
            return Err(ForecastError::InvalidInterval { date });
        }
        points.push(ForecastPoint {
            date,
            point_estimate,
            lower_bound,
            upper_bound,
            status: if percentage {
                thresholds.classify(point_estimate)
            } else {
                OccupancyStatus::Unclassified
            },
        });
    }

    let summary = ForecastSummary::from_points(&points);
    let recommendations = if percentage {
        recommendations(&summary, horizon)
    } else {
        Vec::new()
    };
    Ok(ForecastResult {
        model: artifact.model.spec.to_string(),
        trained_at: artifact.trained_at,
        confidence_level: confidence,
        points,
        summary,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::persistence::FileArtifactStore;
    use crate::ml::persistence::tests::sample_artifact;
    use crate::observation::TargetField;
    use crate::traits::SystemClock;
    use tempfile::tempdir;

    #[test]
    fn test_classification_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.classify(85.1), OccupancyStatus::HighRisk);
        assert_eq!(t.classify(85.0), OccupancyStatus::Optimal);
        assert_eq!(t.classify(60.0), OccupancyStatus::Optimal);
        assert_eq!(t.classify(59.9), OccupancyStatus::UnderUtilized);
    }

    #[test]
    fn test_request_validation() {
        assert!(validate_request(0, 0.95).is_err());
        assert!(validate_request(31, 0.95).is_err());
        assert!(validate_request(7, 0.5).is_err());
        assert!(validate_request(7, 0.995).is_err());
        assert!(validate_request(30, 0.80).is_ok());
    }

    #[test]
    fn test_forecast_points_follow_training_end() {
        let artifact = sample_artifact();
        let result = forecast_from(&artifact, 7, 0.95, Thresholds::default()).unwrap();
        assert_eq!(result.points.len(), 7);
        assert_eq!(result.points[0].date, artifact.data_end + Duration::days(1));
        for p in &result.points {
            assert!(p.lower_bound <= p.point_estimate && p.point_estimate <= p.upper_bound);
            assert!((0.0..=100.0).contains(&p.lower_bound));
        }
        let s = &result.summary;
        assert_eq!(s.high_risk_days + s.low_utilization_days + s.optimal_days, 7);
    }

    #[test]
    fn test_non_percentage_target_left_unclassified() {
        let mut artifact = sample_artifact();
        artifact.target = TargetField::LengthOfStay;
        let result = forecast_from(&artifact, 7, 0.95, Thresholds::default()).unwrap();

        assert!(result.points.iter().all(|p| p.status == OccupancyStatus::Unclassified));
        let s = &result.summary;
        assert_eq!((s.high_risk_days, s.low_utilization_days, s.optimal_days), (0, 0, 0));
        assert!(!s.overutilization_risk && !s.underutilization_risk);
        assert!(s.average_predicted > 0.0);
        assert!(result.recommendations.is_empty());
        assert_eq!(
            serde_json::to_value(OccupancyStatus::Unclassified).unwrap(),
            "unclassified"
        );
    }

    #[test]
    fn test_recommendation_rules() {
        let mut summary = ForecastSummary {
            high_risk_days: 2,
            low_utilization_days: 0,
            optimal_days: 5,
            average_predicted: 80.0,
            overutilization_risk: true,
            underutilization_risk: false,
        };
        let recs = recommendations(&summary, 7);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].contains("surge capacity"));

        summary.high_risk_days = 0;
        summary.low_utilization_days = 4;
        let recs = recommendations(&summary, 7);
        assert!(recs[0].contains("referral outreach"));

        summary.low_utilization_days = 3;
        let recs = recommendations(&summary, 7);
        assert_eq!(recs[0], "Maintain the current occupancy level");
    }

    #[test]
    fn test_not_ready_without_model() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(ModelCache::new(
            Arc::new(FileArtifactStore::new(dir.path())),
            Arc::new(SystemClock),
        ));
        let forecaster = Forecaster::new(cache, Thresholds::default());

        assert!(matches!(
            forecaster.forecast(7, 0.95),
            Err(ForecastError::ModelNotTrained)
        ));
        assert!(matches!(
            forecaster.respond(7, 0.95).unwrap(),
            ForecastResponse::NotReady { .. }
        ));
    }

    #[test]
    fn test_nan_forecast_rejected() {
        let mut artifact = sample_artifact();
        artifact.model.sigma2 = f64::NAN;
        assert!(matches!(
            forecast_from(&artifact, 3, 0.9, Thresholds::default()),
            Err(ForecastError::InvalidInterval { .. })
        ));
    }
}
