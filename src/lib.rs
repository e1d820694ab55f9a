//! BOR Forecast Library
//!
//! Forecasts daily hospital bed-occupancy rate with seasonal ARIMA models:
//! cleans census history, searches model orders, validates the winner, keeps
//! it in a process-local cache and retrains it on a schedule.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod observation;
pub mod preprocess;
pub mod scheduler;
pub mod stats;
pub mod traits;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStatus, ModelCache};
pub use config::AppConfig;
pub use db::{Database, PgObservationSource};
pub use error::{FitError, ForecastError, PersistenceError, SourceError};
pub use forecast::{
    ForecastPoint, ForecastResponse, ForecastResult, ForecastSummary, Forecaster, OccupancyStatus,
    Thresholds,
};
pub use ml::{
    ArtifactStore, CandidateSearchEngine, FileArtifactStore, FittedModelArtifact, FittedSarima,
    SarimaSpec, Trainer, TrainingPipeline, TrainingReport, TrainingTrigger,
};
pub use observation::{
    CsvObservationSource, MemoryObservationSource, ObservationRecord, ObservationSource,
    TargetField,
};
pub use preprocess::{SeriesPreprocessor, TimeSeries};
pub use scheduler::{RetrainScheduler, ScheduleSettings, SchedulerHandle};
pub use traits::{Clock, MockClock, SystemClock};
