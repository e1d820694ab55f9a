use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use bor_forecast::config::{AppConfig, SourceKind};
use bor_forecast::{
    Clock, CsvObservationSource, Database, FileArtifactStore, Forecaster, ModelCache,
    ObservationSource, PgObservationSource, RetrainScheduler, ScheduleSettings, SystemClock,
    Thresholds, Trainer, TrainingPipeline, TrainingTrigger,
};

#[derive(Parser, Debug)]
#[command(name = "bor-forecast")]
#[command(about = "Bed occupancy rate forecasting - train, forecast or run the retrain daemon")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model now and publish it to the model directory
    Train,
    /// Forecast from the latest published model
    Forecast {
        /// Days ahead (1-30)
        #[arg(long)]
        horizon: Option<usize>,
        /// Interval coverage (0.80-0.99)
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// Show the published model's metadata
    Status,
    /// Retrain on the configured schedule until interrupted
    Daemon,
    /// Export census records from the database to CSV
    Export {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("bor_forecast=debug");

    // Logs go to stderr so stdout carries only JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    rt.block_on(async {
        match args.command {
            Command::Train => run_train(&config).await,
            Command::Forecast {
                horizon,
                confidence,
            } => run_forecast(&config, horizon, confidence),
            Command::Status => run_status(&config),
            Command::Daemon => run_daemon(&config).await,
            Command::Export { from, to, out } => run_export(&config, from, to, &out).await,
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode output")?
    );
    Ok(())
}

fn build_cache(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<ModelCache> {
    let store = FileArtifactStore::new(config.storage.model_dir.clone());
    Arc::new(ModelCache::new(Arc::new(store), clock))
}

async fn build_source(config: &AppConfig) -> Result<Arc<dyn ObservationSource>> {
    match config.source.kind {
        SourceKind::Csv => {
            tracing::info!("Reading census from {}", config.source.csv_path.display());
            Ok(Arc::new(CsvObservationSource::new(
                config.source.csv_path.clone(),
            )))
        }
        SourceKind::Database => {
            let db = connect(config).await?;
            Ok(Arc::new(PgObservationSource::new(
                db,
                tokio::runtime::Handle::current(),
            )))
        }
    }
}

async fn connect(config: &AppConfig) -> Result<Database> {
    let url = config
        .source
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set (via .env file or environment variable)")?;
    tracing::info!("Connecting to database...");
    let db = Database::new(url).await?;
    tracing::info!("Database connected successfully");
    Ok(db)
}

async fn build_trainer(config: &AppConfig) -> Result<Arc<Trainer>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = build_source(config).await?;
    Ok(Arc::new(Trainer::new(
        TrainingPipeline::from_config(config),
        source,
        build_cache(config, Arc::clone(&clock)),
        clock,
        config.source.window_days,
    )))
}

async fn run_train(config: &AppConfig) -> Result<()> {
    let trainer = build_trainer(config).await?;
    let report = tokio::task::spawn_blocking(move || trainer.run(TrainingTrigger::Manual))
        .await
        .context("Training task failed")?;
    print_json(&report)?;
    if !report.is_success() {
        anyhow::bail!("training did not produce a model");
    }
    Ok(())
}

fn run_forecast(config: &AppConfig, horizon: Option<usize>, confidence: Option<f64>) -> Result<()> {
    let cache = build_cache(config, Arc::new(SystemClock));
    let forecaster = Forecaster::new(cache, Thresholds::from(&config.forecast));
    let response = forecaster
        .respond(
            horizon.unwrap_or(config.forecast.default_horizon),
            confidence.unwrap_or(config.forecast.default_confidence),
        )
        .context("Failed to produce forecast")?;
    print_json(&response)
}

fn run_status(config: &AppConfig) -> Result<()> {
    let cache = build_cache(config, Arc::new(SystemClock));
    let status = cache.status().context("Failed to read model status")?;
    print_json(&status)
}

/// Run in daemon mode - scheduled retraining until Ctrl-C
async fn run_daemon(config: &AppConfig) -> Result<()> {
    if !config.retrain.enabled {
        anyhow::bail!("retraining is disabled (retrain.enabled = false)");
    }
    tracing::info!("Starting BOR forecast daemon");

    let trainer = build_trainer(config).await?;
    let settings = ScheduleSettings::from(&config.retrain);
    let handle = RetrainScheduler::spawn(trainer, settings);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for the scheduler to stop");
    handle.shutdown().await;
    Ok(())
}

async fn run_export(config: &AppConfig, from: NaiveDate, to: NaiveDate, out: &Path) -> Result<()> {
    let db = connect(config).await?;
    let path = db.export_to_csv(out, from, to).await?;
    tracing::info!("Exported census records to {}", path.display());
    Ok(())
}
