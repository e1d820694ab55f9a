//! Seasonal ARIMA modelling for daily occupancy.
//!
//! Estimation, candidate search, correlogram identification, residual
//! diagnostics, held-out evaluation against simple baselines, artifact
//! persistence and the training pipeline that ties them together.

pub mod baseline;
pub mod diagnostics;
pub mod evaluation;
pub mod identification;
pub mod optim;
pub mod persistence;
pub mod sarima;
pub mod search;
pub mod stationarity;
pub mod training;

pub use baseline::{BaselineComparison, BaselineKind, BaselineScore};
pub use diagnostics::{DiagnosticReport, diagnose};
pub use evaluation::{
    PerformanceLevel, PerformanceMetrics, PerformanceTarget, performance_recommendations,
};
pub use identification::{IdentificationReport, identify};
pub use persistence::{ArtifactMetadata, ArtifactStore, FileArtifactStore, FittedModelArtifact};
pub use sarima::{FitOutcome, FittedSarima, SarimaForecast, SarimaSpec};
pub use search::{CandidateFitter, CandidateSearchEngine, ModelCandidate, SarimaFitter, SearchSpace};
pub use stationarity::{StationarityReport, adf_test};
pub use training::{Trainer, TrainerState, TrainingPipeline, TrainingReport, TrainingTrigger};
