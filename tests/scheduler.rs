//! Retrain gating and scheduler lifecycle.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use tempfile::{TempDir, tempdir};

use bor_forecast::config::{AppConfig, OrderRange};
use bor_forecast::error::SourceError;
use bor_forecast::ml::TrainerState;
use bor_forecast::{
    FileArtifactStore, MemoryObservationSource, MockClock, ModelCache, ObservationRecord,
    ObservationSource, RetrainScheduler, ScheduleSettings, Trainer, TrainingPipeline,
    TrainingReport, TrainingTrigger,
};

fn history(days: usize) -> Vec<ObservationRecord> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..days)
        .map(|i| {
            let weekday = [70.0, 74.0, 78.0, 76.0, 72.0, 64.0, 62.0][i % 7];
            let wobble = ((i * 37) % 11) as f64 * 0.1;
            ObservationRecord::occupancy(start + ChronoDuration::days(i as i64), weekday + wobble)
        })
        .collect()
}

fn small_pipeline() -> TrainingPipeline {
    let mut config = AppConfig::default();
    config.search.p = OrderRange::new(0, 1);
    config.search.d = OrderRange::new(0, 0);
    config.search.q = OrderRange::new(0, 1);
    config.search.seasonal_q = OrderRange::new(0, 0);
    TrainingPipeline::from_config(&config)
}

fn trainer_with(source: Arc<dyn ObservationSource>, dir: &TempDir) -> Arc<Trainer> {
    let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2024, 4, 1, 3, 0, 0).unwrap()));
    let cache = Arc::new(ModelCache::new(
        Arc::new(FileArtifactStore::new(dir.path())),
        clock.clone(),
    ));
    Arc::new(Trainer::new(small_pipeline(), source, cache, clock, 365))
}

/// Source whose fetch blocks until the test releases it.
struct GatedSource {
    inner: MemoryObservationSource,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl ObservationSource for GatedSource {
    fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ObservationRecord>, SourceError> {
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        self.inner.fetch(start, end)
    }
}

#[test]
fn second_run_is_rejected_while_one_is_in_flight() {
    let dir = tempdir().unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let source = Arc::new(GatedSource {
        inner: MemoryObservationSource::new(history(91)),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let trainer = trainer_with(source, &dir);

    let first = {
        let trainer = Arc::clone(&trainer);
        thread::spawn(move || trainer.run(TrainingTrigger::Scheduled))
    };
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(matches!(trainer.state(), TrainerState::Training { .. }));

    match trainer.run(TrainingTrigger::Manual) {
        TrainingReport::AlreadyRunning { trigger, .. } => {
            assert_eq!(trigger, TrainingTrigger::Manual)
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    release_tx.send(()).unwrap();
    let report = first.join().unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(trainer.state(), TrainerState::Idle);
    assert!(trainer.cache().peek().is_some());
}

#[test]
fn failed_run_releases_the_gate() {
    let dir = tempdir().unwrap();
    let trainer = trainer_with(Arc::new(MemoryObservationSource::new(history(3))), &dir);

    assert!(!trainer.run(TrainingTrigger::Manual).is_success());
    assert_eq!(trainer.state(), TrainerState::Idle);
    assert!(!trainer.run(TrainingTrigger::Manual).is_success());
    assert_eq!(trainer.state(), TrainerState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_run_publishes_a_report() {
    let dir = tempdir().unwrap();
    let trainer = trainer_with(Arc::new(MemoryObservationSource::new(history(91))), &dir);
    let handle = RetrainScheduler::spawn(
        Arc::clone(&trainer),
        ScheduleSettings {
            period: Duration::from_secs(3600),
            run_on_startup: true,
        },
    );

    let mut reports = handle.reports();
    tokio::time::timeout(Duration::from_secs(60), reports.changed())
        .await
        .expect("scheduler produced no report")
        .unwrap();
    let report = reports.borrow().clone().unwrap();
    match report {
        TrainingReport::Succeeded { trigger, .. } => assert_eq!(trigger, TrainingTrigger::Startup),
        other => panic!("expected success, got {other:?}"),
    }
    assert!(trainer.cache().peek().is_some());

    tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
        .await
        .expect("scheduler did not stop");
}

#[tokio::test]
async fn idle_scheduler_stops_without_running() {
    let dir = tempdir().unwrap();
    let trainer = trainer_with(Arc::new(MemoryObservationSource::new(history(91))), &dir);
    let handle = RetrainScheduler::spawn(
        Arc::clone(&trainer),
        ScheduleSettings {
            period: Duration::from_secs(3600),
            run_on_startup: false,
        },
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.reports().borrow().is_none());

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("scheduler did not stop");
    assert!(trainer.cache().peek().is_none());
}
