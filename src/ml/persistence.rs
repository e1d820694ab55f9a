//! Model artifact persistence: a bincode blob plus a JSON metadata sidecar.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::ml::diagnostics::DiagnosticReport;
use crate::ml::evaluation::PerformanceMetrics;
use crate::ml::sarima::FittedSarima;
use crate::ml::stationarity::StationarityReport;
use crate::observation::TargetField;

const BLOB_FILE: &str = "model.bin";
const SIDECAR_FILE: &str = "model.json";

/// Everything needed to serve forecasts from one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModelArtifact {
    /// Format version for backward compatibility
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub target: TargetField,
    /// Model refitted on the full series; forecasts start the day after `data_end`.
    pub model: FittedSarima,
    pub data_start: NaiveDate,
    pub data_end: NaiveDate,
    pub diagnostics: DiagnosticReport,
    /// Held-out metrics from the train/test fit.
    pub metrics: PerformanceMetrics,
    pub stationarity: Option<StationarityReport>,
}

impl FittedModelArtifact {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn metadata(&self) -> ArtifactMetadata {
        ArtifactMetadata {
            version: self.version,
            order: self.model.spec.order(),
            seasonal_order: self.model.spec.seasonal_order(),
            label: self.model.spec.to_string(),
            target: self.target,
            aic: self.model.aic,
            bic: self.model.bic,
            rmse: self.metrics.rmse,
            mae: self.metrics.mae,
            mape: self.metrics.mape,
            residuals_white_noise: self.diagnostics.white_noise,
            training_timestamp: self.trained_at,
            data_date_range: DateRange {
                start: self.data_start,
                end: self.data_end,
            },
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} v{}: {} to {}, aic={:.2}, mae={:.2}, trained {}",
            self.model.spec,
            self.version,
            self.data_start,
            self.data_end,
            self.model.aic,
            self.metrics.mae,
            self.trained_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Human-readable summary stored next to the blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub version: u32,
    pub order: (usize, usize, usize),
    pub seasonal_order: (usize, usize, usize, usize),
    pub label: String,
    pub target: TargetField,
    pub aic: f64,
    pub bic: f64,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub residuals_white_noise: bool,
    pub training_timestamp: DateTime<Utc>,
    pub data_date_range: DateRange,
}

/// Durable home of the latest artifact.
pub trait ArtifactStore: Send + Sync {
    fn save(&self, artifact: &FittedModelArtifact) -> Result<(), PersistenceError>;
    fn load_latest(&self) -> Result<Option<FittedModelArtifact>, PersistenceError>;
    fn load_metadata(&self) -> Result<Option<ArtifactMetadata>, PersistenceError>;
}

/// Stores `model.bin` and `model.json` in one directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn blob_path(&self) -> PathBuf {
        self.dir.join(BLOB_FILE)
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.dir.join(SIDECAR_FILE)
    }
}

/// Write through a temporary file so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn check_version(found: u32) -> Result<(), PersistenceError> {
    if found > FittedModelArtifact::CURRENT_VERSION {
        return Err(PersistenceError::VersionMismatch {
            expected: FittedModelArtifact::CURRENT_VERSION,
            found,
        });
    }
    Ok(())
}

impl ArtifactStore for FileArtifactStore {
    fn save(&self, artifact: &FittedModelArtifact) -> Result<(), PersistenceError> {
        let blob =
            bincode::serialize(artifact).map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        let sidecar = serde_json::to_vec_pretty(&artifact.metadata())
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        write_atomic(&self.blob_path(), &blob)?;
        write_atomic(&self.sidecar_path(), &sidecar)?;
        info!(
            "Saved model artifact to {} ({} bytes)",
            self.dir.display(),
            blob.len()
        );
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<FittedModelArtifact>, PersistenceError> {
        let path = self.blob_path();
        if !path.exists() {
            debug!("No model artifact at {}", path.display());
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let artifact: FittedModelArtifact = bincode::deserialize(&bytes)
            .map_err(|e| PersistenceError::Deserialize(e.to_string()))?;
        check_version(artifact.version)?;
        Ok(Some(artifact))
    }

    fn load_metadata(&self) -> Result<Option<ArtifactMetadata>, PersistenceError> {
        let path = self.sidecar_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let metadata: ArtifactMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| PersistenceError::Deserialize(e.to_string()))?;
        check_version(metadata.version)?;
        Ok(Some(metadata))
    }
}
