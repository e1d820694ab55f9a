//! Error taxonomy for the forecasting engine.
//!
//! Library code returns these typed errors; the binary wraps them with
//! `anyhow::Context` at the edges.

use chrono::NaiveDate;
use thiserror::Error;

/// Top-level error for training and forecasting operations.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient data: need at least {needed} daily observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("no candidate model converged ({tried} candidates tried)")]
    NoConvergentModel { tried: usize },

    #[error("no trained model is available")]
    ModelNotTrained,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("forecast interval invalid on {date}")]
    InvalidInterval { date: NaiveDate },

    #[error("model misses performance target (mape {mape:.2}%, mae {mae:.2})")]
    BelowTarget { mape: f64, mae: f64 },

    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ForecastError {
    /// Short machine-readable tag used in structured training reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::InsufficientData { .. } => "insufficient_data",
            ForecastError::NoConvergentModel { .. } => "no_convergent_model",
            ForecastError::ModelNotTrained => "model_not_trained",
            ForecastError::Validation(_) => "validation",
            ForecastError::InvalidInterval { .. } => "invalid_interval",
            ForecastError::BelowTarget { .. } => "below_target",
            ForecastError::Degenerate(_) => "degenerate",
            ForecastError::Source(_) => "source",
            ForecastError::Persistence(_) => "persistence",
        }
    }
}

/// Why a single candidate fit was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("series too short for order: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("optimizer did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Errors saving or loading a model artifact.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("model version mismatch: expected v{expected}, found v{found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Errors raised by an observation source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Database(String),
}

pub type Result<T, E = ForecastError> = std::result::Result<T, E>;
