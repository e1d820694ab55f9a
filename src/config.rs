use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::observation::TargetField;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub preprocess: PreprocessConfig,
    pub search: SearchConfig,
    pub fitter: FitterConfig,
    pub evaluation: EvaluationConfig,
    pub forecast: ForecastConfig,
    pub retrain: RetrainConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Database,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub csv_path: PathBuf,
    pub database_url: Option<String>,
    pub target: TargetField,
    /// Days of history fetched for each training run.
    pub window_days: i64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Csv,
            csv_path: PathBuf::from("data/census.csv"),
            database_url: None,
            target: TargetField::OccupancyRate,
            window_days: 730,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessConfig {
    pub min_days: usize,
    pub iqr_multiplier: f64,
    /// Reject out-of-range occupancy instead of clamping it.
    pub strict_range: bool,
    pub train_ratio: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_days: 30,
            iqr_multiplier: 1.5,
            strict_range: false,
            train_ratio: 0.8,
        }
    }
}

/// Inclusive range for one order parameter.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct OrderRange {
    pub min: usize,
    pub max: usize,
}

impl OrderRange {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn values(&self) -> impl Iterator<Item = usize> + Clone {
        self.min..=self.max
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub p: OrderRange,
    pub d: OrderRange,
    pub q: OrderRange,
    pub seasonal_p: OrderRange,
    pub seasonal_d: OrderRange,
    pub seasonal_q: OrderRange,
    pub seasonal_periods: Vec<usize>,
    /// Worker threads for candidate fits. Zero uses every available core.
    pub workers: usize,
    /// How many ranked candidates the training report keeps.
    pub top_n: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            p: OrderRange::new(0, 2),
            d: OrderRange::new(0, 1),
            q: OrderRange::new(0, 2),
            seasonal_p: OrderRange::new(0, 1),
            seasonal_d: OrderRange::new(0, 1),
            seasonal_q: OrderRange::new(0, 1),
            seasonal_periods: vec![7],
            workers: 0,
            top_n: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FitterConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct EvaluationConfig {
    pub max_mape: f64,
    pub max_mae: f64,
    /// Refuse to publish a model that misses both targets.
    pub enforce: bool,
    /// Score naive, moving-average and non-seasonal baselines on the test split.
    pub compare_baselines: bool,
    pub moving_average_window: usize,
    /// Lags for the identification ACF/PACF.
    pub identification_lags: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_mape: 10.0,
            max_mae: 5.0,
            enforce: true,
            compare_baselines: true,
            moving_average_window: 7,
            identification_lags: 40,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ForecastConfig {
    pub default_horizon: usize,
    pub default_confidence: f64,
    pub high_threshold: f64,
    pub low_threshold: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_horizon: 7,
            default_confidence: 0.95,
            high_threshold: 85.0,
            low_threshold: 60.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetrainConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub run_on_startup: bool,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24 * 7,
            run_on_startup: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub model_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Missing .env is fine, deployments set variables directly
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bor-forecast");

        let mut builder = Config::builder()
            // Source
            .set_default("source.kind", "csv")?
            .set_default("source.csv_path", "data/census.csv")?
            .set_default("source.database_url", None::<String>)?
            .set_default("source.target", "occupancy_rate")?
            .set_default("source.window_days", 730)?
            // Preprocessing
            .set_default("preprocess.min_days", 30)?
            .set_default("preprocess.iqr_multiplier", 1.5)?
            .set_default("preprocess.strict_range", false)?
            .set_default("preprocess.train_ratio", 0.8)?
            // Search space
            .set_default("search.p.min", 0)?
            .set_default("search.p.max", 2)?
            .set_default("search.d.min", 0)?
            .set_default("search.d.max", 1)?
            .set_default("search.q.min", 0)?
            .set_default("search.q.max", 2)?
            .set_default("search.seasonal_p.min", 0)?
            .set_default("search.seasonal_p.max", 1)?
            .set_default("search.seasonal_d.min", 0)?
            .set_default("search.seasonal_d.max", 1)?
            .set_default("search.seasonal_q.min", 0)?
            .set_default("search.seasonal_q.max", 1)?
            .set_default("search.seasonal_periods", vec![7])?
            .set_default("search.workers", 0)?
            .set_default("search.top_n", 20)?
            // Fitter
            .set_default("fitter.max_iterations", 1000)?
            .set_default("fitter.tolerance", 1e-8)?
            // Evaluation targets
            .set_default("evaluation.max_mape", 10.0)?
            .set_default("evaluation.max_mae", 5.0)?
            .set_default("evaluation.enforce", true)?
            .set_default("evaluation.compare_baselines", true)?
            .set_default("evaluation.moving_average_window", 7)?
            .set_default("evaluation.identification_lags", 40)?
            // Forecast
            .set_default("forecast.default_horizon", 7)?
            .set_default("forecast.default_confidence", 0.95)?
            .set_default("forecast.high_threshold", 85.0)?
            .set_default("forecast.low_threshold", 60.0)?
            // Retraining
            .set_default("retrain.enabled", true)?
            .set_default("retrain.interval_hours", 24 * 7)?
            .set_default("retrain.run_on_startup", false)?
            // Storage
            .set_default("storage.model_dir", "models")?
            // Local config file, then the user config directory on top
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // BOR__SEARCH__P__MAX=1 and friends
            .add_source(Environment::with_prefix("BOR").separator("__"));

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder
                .set_override("source.database_url", url)
                .context("Failed to apply DATABASE_URL")?;
        }

        let s = builder.build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make every training run fail.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        for (name, range) in [
            ("p", search.p),
            ("d", search.d),
            ("q", search.q),
            ("seasonal_p", search.seasonal_p),
            ("seasonal_d", search.seasonal_d),
            ("seasonal_q", search.seasonal_q),
        ] {
            if range.min > range.max {
                anyhow::bail!("search.{name}: min {} exceeds max {}", range.min, range.max);
            }
        }
        if search.seasonal_periods.is_empty() || search.seasonal_periods.contains(&0) {
            anyhow::bail!("search.seasonal_periods must be a non-empty list of positive periods");
        }
        let ratio = self.preprocess.train_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            anyhow::bail!("preprocess.train_ratio must lie in (0, 1)");
        }
        if self.evaluation.moving_average_window == 0 {
            anyhow::bail!("evaluation.moving_average_window must be positive");
        }
        if self.forecast.low_threshold >= self.forecast.high_threshold {
            anyhow::bail!("forecast.low_threshold must be below forecast.high_threshold");
        }
        Ok(())
    }
}
