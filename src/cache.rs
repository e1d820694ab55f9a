//! Process-local holder of the latest fitted artifact.
//!
//! Readers receive an `Arc` snapshot, so a concurrent `replace` never changes
//! the artifact a caller is already forecasting from.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::ml::persistence::{ArtifactMetadata, ArtifactStore, FittedModelArtifact};
use crate::traits::Clock;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact: Arc<FittedModelArtifact>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub loaded: bool,
    pub loaded_at: Option<DateTime<Utc>>,
    pub metadata: Option<ArtifactMetadata>,
}

pub struct ModelCache {
    entry: RwLock<Option<CacheEntry>>,
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ArtifactStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entry: RwLock::new(None),
            store,
            clock,
        }
    }

    /// Cached artifact, if one is in memory. Never touches the store.
    pub fn peek(&self) -> Option<CacheEntry> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached artifact, loading the latest persisted one on a miss.
    pub fn get_or_load(&self) -> Result<Arc<FittedModelArtifact>> {
        if let Some(entry) = self.peek() {
            return Ok(entry.artifact);
        }

        let mut guard = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have loaded while we waited
        if let Some(entry) = guard.as_ref() {
            return Ok(Arc::clone(&entry.artifact));
        }

        let artifact = self
            .store
            .load_latest()?
            .ok_or(ForecastError::ModelNotTrained)?;
        let artifact = Arc::new(artifact);
        info!("Loaded model artifact: {}", artifact.summary());
        *guard = Some(CacheEntry {
            artifact: Arc::clone(&artifact),
            loaded_at: self.clock.now_utc(),
        });
        Ok(artifact)
    }

    /// Persist `artifact` and make it the cached model.
    ///
    /// The save happens under the write lock, so concurrent replaces leave
    /// memory and disk holding the same artifact. Nothing changes in memory
    /// if persisting fails.
    pub fn replace(&self, artifact: FittedModelArtifact) -> Result<Arc<FittedModelArtifact>> {
        let mut guard = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        self.store.save(&artifact)?;
        let artifact = Arc::new(artifact);
        let previous = guard.replace(CacheEntry {
            artifact: Arc::clone(&artifact),
            loaded_at: self.clock.now_utc(),
        });
        if let Some(previous) = previous {
            debug!("Replaced cached model {}", previous.artifact.model.spec);
        }
        Ok(artifact)
    }

    /// Drop the in-memory entry; the next read reloads from the store.
    pub fn invalidate(&self) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn status(&self) -> Result<CacheStatus> {
        match self.peek() {
            Some(entry) => Ok(CacheStatus {
                loaded: true,
                loaded_at: Some(entry.loaded_at),
                metadata: Some(entry.artifact.metadata()),
            }),
            None => Ok(CacheStatus {
                loaded: false,
                loaded_at: None,
                metadata: self.store.load_metadata()?,
            }),
        }
    }
}
