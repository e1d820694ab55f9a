//! End-to-end training pipeline and the single-flight trainer around it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::ModelCache;
use crate::config::{AppConfig, EvaluationConfig, FitterConfig, PreprocessConfig, SearchConfig};
use crate::error::{ForecastError, Result};
use crate::ml::baseline::{self, BaselineComparison};
use crate::ml::diagnostics::{DiagnosticReport, diagnose};
use crate::ml::evaluation::{
    PerformanceLevel, PerformanceMetrics, PerformanceTarget, performance_recommendations,
};
use crate::ml::identification::{IdentificationReport, identify};
use crate::ml::persistence::{ArtifactMetadata, FittedModelArtifact};
use crate::ml::search::{CandidateSearchEngine, ModelCandidate, SarimaFitter, SearchSpace};
use crate::ml::stationarity::{StationarityReport, adf_test};
use crate::observation::{ObservationRecord, ObservationSource, TargetField};
use crate::preprocess::{PreprocessSummary, SeriesPreprocessor};
use crate::traits::Clock;

/// Output of one successful pipeline run.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub artifact: FittedModelArtifact,
    pub identification: IdentificationReport,
    /// Absent when baseline comparison is switched off.
    pub baselines: Option<BaselineComparison>,
    pub ranked: Vec<ModelCandidate>,
    pub tried: usize,
    pub converged: usize,
    pub preprocess: PreprocessSummary,
}

/// Preprocess, search, validate and package a model from raw records.
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    pub preprocess: PreprocessConfig,
    pub search: SearchConfig,
    pub fitter: FitterConfig,
    pub evaluation: EvaluationConfig,
    pub target: TargetField,
}

impl TrainingPipeline {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            preprocess: config.preprocess.clone(),
            search: config.search.clone(),
            fitter: config.fitter,
            evaluation: config.evaluation,
            target: config.source.target,
        }
    }

    pub fn run(
        &self,
        records: &[ObservationRecord],
        trained_at: DateTime<Utc>,
    ) -> Result<TrainingResult> {
        let preprocessor = SeriesPreprocessor::new(self.preprocess.clone());
        let (series, preprocess) = preprocessor.prepare(records, self.target)?;
        let (train, test) = series.split(self.preprocess.train_ratio);
        if train.is_empty() || test.is_empty() {
            return Err(ForecastError::InsufficientData {
                needed: self.preprocess.min_days,
                got: series.len(),
            });
        }
        info!(
            "Training {} on {} days ({} train / {} test), {} to {}",
            self.target.as_str(),
            series.len(),
            train.len(),
            test.len(),
            series.start,
            series.end()
        );

        let stationarity = match adf_test(&train.values) {
            Ok(report) => {
                info!(
                    "ADF statistic {:.3}, p-value {:.4}: {}",
                    report.statistic,
                    report.p_value,
                    if report.is_stationary {
                        "stationary"
                    } else {
                        "non-stationary"
                    }
                );
                Some(report)
            }
            Err(e) => {
                warn!("Stationarity test not available: {}", e);
                None
            }
        };

        let identification = identify(&train.values, self.evaluation.identification_lags);
        match identification.suggested_period {
            Some(period) if !self.search.seasonal_periods.contains(&period) => warn!(
                "ACF peaks at lag {} but the search only covers periods {:?}",
                period, self.search.seasonal_periods
            ),
            Some(period) => info!("ACF suggests a seasonal period of {}", period),
            None => info!("No seasonal ACF peak above threshold"),
        }

        let engine = CandidateSearchEngine::new(
            SarimaFitter::new(self.fitter),
            SearchSpace::from(&self.search),
        )
        .with_workers(self.search.workers)
        .with_top_n(self.search.top_n);
        let outcome = engine.search(&train.values, Some(&test.values))?;

        let held_out = outcome.best.forecast(test.len(), 0.95);
        let metrics = PerformanceMetrics::compute(&test.values, &held_out.mean)?;
        let diagnostics = diagnose(&outcome.best.residuals);
        info!(
            "{}: rmse={:.3} mae={:.3} mape={:.2}% wape={:.2}% r2={:.3}, residuals white noise: {}",
            outcome.best.spec,
            metrics.rmse,
            metrics.mae,
            metrics.mape,
            metrics.wape,
            metrics.r_squared,
            diagnostics.white_noise
        );
        if diagnostics.low_confidence() {
            warn!("Residuals of {} remain autocorrelated", outcome.best.spec);
        }

        let baselines = if self.evaluation.compare_baselines {
            let comparison = baseline::compare(
                &train.values,
                &test.values,
                self.evaluation.moving_average_window,
                outcome.best_non_seasonal.as_ref(),
                &outcome.best,
                metrics,
            )?;
            if !comparison.sarima_beats_baselines {
                warn!(
                    "{} does not beat every baseline on MAE (best by MAPE: {})",
                    outcome.best.spec,
                    comparison.best_by_mape.as_str()
                );
            }
            Some(comparison)
        } else {
            None
        };

        let target = PerformanceTarget::from(&self.evaluation);
        if !metrics.meets_target(&target) {
            if self.evaluation.enforce {
                return Err(ForecastError::BelowTarget {
                    mape: metrics.mape,
                    mae: metrics.mae,
                });
            }
            warn!(
                "{} misses targets (mape {:.2}% > {}, mae {:.2} > {}), publishing anyway",
                outcome.best.spec, metrics.mape, target.max_mape, metrics.mae, target.max_mae
            );
        }

        let model = outcome
            .best
            .refit(&series.values, &self.fitter)
            .into_result()
            .map_err(|e| {
                ForecastError::Degenerate(format!(
                    "refit of {} on the full series failed: {e}",
                    outcome.best.spec
                ))
            })?;

        let artifact = FittedModelArtifact {
            version: FittedModelArtifact::CURRENT_VERSION,
            trained_at,
            target: self.target,
            model,
            data_start: series.start,
            data_end: series.end(),
            diagnostics,
            metrics,
            stationarity,
        };

        Ok(TrainingResult {
            artifact,
            identification,
            baselines,
            ranked: outcome.ranked,
            tried: outcome.tried,
            converged: outcome.converged,
            preprocess,
        })
    }
}

// ==================== Trainer ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingTrigger {
    Scheduled,
    Startup,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training {
        since: DateTime<Utc>,
        trigger: TrainingTrigger,
    },
}

/// Structured outcome of a training attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingReport {
    Succeeded {
        trigger: TrainingTrigger,
        metadata: ArtifactMetadata,
        metrics: PerformanceMetrics,
        performance_level: PerformanceLevel,
        performance_recommendations: Vec<String>,
        diagnostics: DiagnosticReport,
        stationarity: Option<StationarityReport>,
        identification: IdentificationReport,
        baselines: Option<BaselineComparison>,
        ranked: Vec<ModelCandidate>,
        tried: usize,
        converged: usize,
        duration_ms: u128,
    },
    Failed {
        trigger: TrainingTrigger,
        kind: String,
        reason: String,
    },
    AlreadyRunning {
        trigger: TrainingTrigger,
        since: DateTime<Utc>,
    },
}

impl TrainingReport {
    pub fn is_success(&self) -> bool {
        matches!(self, TrainingReport::Succeeded { .. })
    }
}

/// Resets the trainer to idle however the run ends.
struct RunGuard<'a> {
    state: &'a Mutex<TrainerState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = TrainerState::Idle;
    }
}

/// Runs the pipeline against a source, at most one run at a time.
pub struct Trainer {
    pipeline: TrainingPipeline,
    source: Arc<dyn ObservationSource>,
    cache: Arc<ModelCache>,
    clock: Arc<dyn Clock>,
    window_days: i64,
    state: Mutex<TrainerState>,
}

impl Trainer {
    pub fn new(
        pipeline: TrainingPipeline,
        source: Arc<dyn ObservationSource>,
        cache: Arc<ModelCache>,
        clock: Arc<dyn Clock>,
        window_days: i64,
    ) -> Self {
        Self {
            pipeline,
            source,
            cache,
            clock,
            window_days,
            state: Mutex::new(TrainerState::Idle),
        }
    }

    pub fn state(&self) -> TrainerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Train and publish a model. Blocks for the duration of the fit.
    pub fn run(&self, trigger: TrainingTrigger) -> TrainingReport {
        let _guard = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let TrainerState::Training { since, .. } = *state {
                warn!("Training already in progress since {}, skipping {:?} run", since, trigger);
                return TrainingReport::AlreadyRunning { trigger, since };
            }
            *state = TrainerState::Training {
                since: self.clock.now_utc(),
                trigger,
            };
            RunGuard { state: &self.state }
        };

        let started = Instant::now();
        info!("Starting {:?} training run", trigger);
        match self.train_and_publish() {
            Ok(result) => {
                let metadata = result.artifact.metadata();
                info!(
                    "Published {} in {} ms",
                    metadata.label,
                    started.elapsed().as_millis()
                );
                let metrics = result.artifact.metrics;
                TrainingReport::Succeeded {
                    trigger,
                    metadata,
                    metrics,
                    performance_level: metrics.level(),
                    performance_recommendations: performance_recommendations(&metrics),
                    diagnostics: result.artifact.diagnostics.clone(),
                    stationarity: result.artifact.stationarity.clone(),
                    identification: result.identification,
                    baselines: result.baselines,
                    ranked: result.ranked,
                    tried: result.tried,
                    converged: result.converged,
                    duration_ms: started.elapsed().as_millis(),
                }
            }
            Err(e) => {
                error!("Training run failed: {}", e);
                TrainingReport::Failed {
                    trigger,
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    fn train_and_publish(&self) -> Result<TrainingResult> {
        let now = self.clock.now_utc();
        let end = self.clock.today();
        let start = end - Duration::days(self.window_days);
        let records = self.source.fetch(start, end)?;
        let result = self.pipeline.run(&records, now)?;
        self.cache.replace(result.artifact.clone())?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::baseline::BaselineKind;
    use crate::ml::persistence::FileArtifactStore;
    use crate::observation::MemoryObservationSource;
    use crate::traits::MockClock;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::tempdir;

    fn small_pipeline() -> TrainingPipeline {
        let mut config = AppConfig::default();
        config.search.p = crate::config::OrderRange::new(0, 1);
        config.search.q = crate::config::OrderRange::new(0, 0);
        config.search.seasonal_p = crate::config::OrderRange::new(0, 0);
        config.search.seasonal_q = crate::config::OrderRange::new(0, 0);
        TrainingPipeline::from_config(&config)
    }

    fn weekly_records(days: i64) -> Vec<ObservationRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| {
                let value = 70.0 + [0.0, 2.0, 4.0, 3.0, 1.0, -3.0, -5.0][(i % 7) as usize];
                ObservationRecord::occupancy(start + Duration::days(i), value)
            })
            .collect()
    }

    #[test]
    fn test_pipeline_produces_artifact() {
        let trained_at = Utc.with_ymd_and_hms(2024, 4, 1, 2, 0, 0).unwrap();
        let result = small_pipeline().run(&weekly_records(70), trained_at).unwrap();
        let artifact = &result.artifact;

        assert_eq!(artifact.trained_at, trained_at);
        assert_eq!(artifact.data_start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(artifact.data_end, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(artifact.model.n_obs(), 70);
        assert!(result.converged > 0);
        assert!(!result.ranked.is_empty());
        assert!(artifact.metrics.mae < 1.0);
    }

    #[test]
    fn test_pipeline_rejects_short_history() {
        let err = small_pipeline()
            .run(&weekly_records(5), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { got: 5, .. }));
    }

    #[test]
    fn test_below_target_rejected_when_enforced() {
        let mut pipeline = small_pipeline();
        pipeline.evaluation.max_mape = -1.0;
        pipeline.evaluation.max_mae = -1.0;
        let err = pipeline.run(&weekly_records(70), Utc::now()).unwrap_err();
        assert!(matches!(err, ForecastError::BelowTarget { .. }));

        pipeline.evaluation.enforce = false;
        assert!(pipeline.run(&weekly_records(70), Utc::now()).is_ok());
    }

    #[test]
    fn test_trainer_publishes_and_returns_to_idle() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()));
        let cache = Arc::new(ModelCache::new(
            Arc::new(FileArtifactStore::new(dir.path())),
            clock.clone(),
        ));
        let trainer = Trainer::new(
            small_pipeline(),
            Arc::new(MemoryObservationSource::new(weekly_records(70))),
            cache.clone(),
            clock,
            365,
        );

        let report = trainer.run(TrainingTrigger::Manual);
        assert!(report.is_success(), "{report:?}");
        assert_eq!(trainer.state(), TrainerState::Idle);
        assert!(cache.peek().is_some());
    }

    #[test]
    fn test_failed_run_reports_kind_and_keeps_cache_empty() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(MockClock::new(Utc::now()));
        let cache = Arc::new(ModelCache::new(
            Arc::new(FileArtifactStore::new(dir.path())),
            clock.clone(),
        ));
        let trainer = Trainer::new(
            small_pipeline(),
            Arc::new(MemoryObservationSource::default()),
            cache.clone(),
            clock,
            365,
        );

        match trainer.run(TrainingTrigger::Scheduled) {
            TrainingReport::Failed { kind, .. } => assert_eq!(kind, "insufficient_data"),
            other => panic!("unexpected report {other:?}"),
        }
        assert!(cache.peek().is_none());
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_success_report_carries_evaluation() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()));
        let cache = Arc::new(ModelCache::new(
            Arc::new(FileArtifactStore::new(dir.path())),
            clock.clone(),
        ));
        let trainer = Trainer::new(
            small_pipeline(),
            Arc::new(MemoryObservationSource::new(weekly_records(70))),
            cache.clone(),
            clock,
            365,
        );

        let report = trainer.run(TrainingTrigger::Manual);
        let artifact = cache.peek().unwrap().artifact;
        match &report {
            TrainingReport::Succeeded {
                metrics,
                performance_level,
                performance_recommendations,
                diagnostics,
                stationarity,
                identification,
                baselines,
                ..
            } => {
                assert_eq!(*metrics, artifact.metrics);
                assert_eq!(*diagnostics, artifact.diagnostics);
                assert_eq!(*stationarity, artifact.stationarity);
                assert_eq!(*performance_level, artifact.metrics.level());
                assert!(!performance_recommendations.is_empty());
                assert_eq!(identification.suggested_period, Some(7));
                let baselines = baselines.as_ref().unwrap();
                assert!(baselines.score(BaselineKind::Naive).is_some());
                assert!(baselines.score(BaselineKind::MovingAverage).is_some());
                assert!(baselines.score(BaselineKind::Sarima).is_some());
            }
            other => panic!("expected success, got {other:?}"),
        }

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert!(json["metrics"]["mape"].is_number());
        assert!(json["diagnostics"]["ljung_box"].is_array());
        assert!(json["baselines"]["scores"].is_array());
    }

    #[test]
    fn test_baselines_can_be_switched_off() {
        let mut pipeline = small_pipeline();
        pipeline.evaluation.compare_baselines = false;
        let result = pipeline.run(&weekly_records(70), Utc::now()).unwrap();
        assert!(result.baselines.is_none());
    }

    #[test]
    fn test_failed_runs_keep_the_published_model() {
        let dir = tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()));
        let cache = Arc::new(ModelCache::new(
            Arc::new(FileArtifactStore::new(dir.path())),
            clock.clone(),
        ));
        let trainer_for = |pipeline: TrainingPipeline, days: i64| {
            Trainer::new(
                pipeline,
                Arc::new(MemoryObservationSource::new(weekly_records(days))),
                cache.clone(),
                clock.clone(),
                365,
            )
        };

        assert!(trainer_for(small_pipeline(), 70).run(TrainingTrigger::Manual).is_success());
        let published = cache.get_or_load().unwrap();
        let blob = std::fs::read(store.blob_path()).unwrap();
        let sidecar = std::fs::read(store.sidecar_path()).unwrap();

        // Intercept-only specs with a two-step budget never converge
        let mut stalled = small_pipeline();
        stalled.search.d = crate::config::OrderRange::new(0, 0);
        stalled.search.seasonal_d = crate::config::OrderRange::new(0, 0);
        stalled.fitter = FitterConfig {
            max_iterations: 2,
            tolerance: 1e-12,
        };
        let mut strict = small_pipeline();
        strict.evaluation.max_mape = -1.0;
        strict.evaluation.max_mae = -1.0;

        for (pipeline, days, expected) in [
            (small_pipeline(), 5, "insufficient_data"),
            (stalled, 70, "no_convergent_model"),
            (strict, 70, "below_target"),
        ] {
            match trainer_for(pipeline, days).run(TrainingTrigger::Scheduled) {
                TrainingReport::Failed { kind, .. } => assert_eq!(kind, expected),
                other => panic!("expected {expected}, got {other:?}"),
            }
            assert_eq!(*cache.get_or_load().unwrap(), *published, "{expected}");
            assert_eq!(std::fs::read(store.blob_path()).unwrap(), blob, "{expected}");
            assert_eq!(std::fs::read(store.sidecar_path()).unwrap(), sidecar, "{expected}");
        }

        // A fresh process still loads the first model
        let restarted = ModelCache::new(Arc::new(FileArtifactStore::new(dir.path())), clock.clone());
        assert_eq!(*restarted.get_or_load().unwrap(), *published);
    }

    #[test]
    fn test_report_serializes_with_status_tag() {
        let report = TrainingReport::Failed {
            trigger: TrainingTrigger::Manual,
            kind: "validation".to_string(),
            reason: "bad".to_string(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["trigger"], "manual");
    }
}
