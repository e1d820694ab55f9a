//! Periodic retraining on a tokio interval with an explicit stop signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::RetrainConfig;
use crate::ml::training::{Trainer, TrainingReport, TrainingTrigger};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSettings {
    pub period: Duration,
    pub run_on_startup: bool,
}

impl From<&RetrainConfig> for ScheduleSettings {
    fn from(config: &RetrainConfig) -> Self {
        Self {
            period: Duration::from_secs(config.interval_hours.max(1) * 3600),
            run_on_startup: config.run_on_startup,
        }
    }
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    reports: watch::Receiver<Option<TrainingReport>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Receiver that updates after every completed run.
    pub fn reports(&self) -> watch::Receiver<Option<TrainingReport>> {
        self.reports.clone()
    }

    /// Signal the loop to stop and wait for it, including any run in flight.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!("Retrain scheduler task ended abnormally: {}", e);
        }
    }
}

pub struct RetrainScheduler;

impl RetrainScheduler {
    /// Start the loop on the current tokio runtime.
    pub fn spawn(trainer: Arc<Trainer>, settings: ScheduleSettings) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut interval = if settings.run_on_startup {
                tokio::time::interval(settings.period)
            } else {
                tokio::time::interval_at(Instant::now() + settings.period, settings.period)
            };
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "Retrain scheduler started: every {:?}, run on startup: {}",
                settings.period, settings.run_on_startup
            );

            let mut first = true;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let trigger = if first && settings.run_on_startup {
                            TrainingTrigger::Startup
                        } else {
                            TrainingTrigger::Scheduled
                        };
                        first = false;

                        // Fitting is CPU-bound; keep it off the async workers
                        let trainer = Arc::clone(&trainer);
                        match tokio::task::spawn_blocking(move || trainer.run(trigger)).await {
                            Ok(report) => {
                                let _ = report_tx.send(Some(report));
                            }
                            Err(e) => error!("Training task panicked: {}", e),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Retrain scheduler stopped");
        });

        SchedulerHandle {
            stop: stop_tx,
            reports: report_rx,
            task,
        }
    }
}
