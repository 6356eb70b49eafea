//! Integration tests for scheduled dispatch.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use echo_core::config::FileConfigStore;
use echo_core::{
    AssetCatalog, ConfigStore, DecisionOrchestrator, DedupLedger, Delivery, EchoConfig, EchoError,
    EchoResult, Frequency, PersistenceWorker, Sender, TriggerScheduler,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Sender that records deliveries and fails for chosen sessions.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, Delivery)>>,
    offline: HashSet<String>,
}

impl RecordingSender {
    fn with_offline(sessions: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            offline: sessions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.sent.lock().iter().map(|(s, _)| s.clone()).collect();
        sessions.sort();
        sessions
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, session_id: &str, delivery: &Delivery) -> EchoResult<()> {
        if self.offline.contains(session_id) {
            return Err(EchoError::delivery(session_id, "session offline"));
        }
        self.sent.lock().push((session_id.to_string(), delivery.clone()));
        Ok(())
    }
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

struct Fixture {
    _voices: tempfile::TempDir,
    state: tempfile::TempDir,
    store: Arc<dyn ConfigStore>,
    catalog: AssetCatalog,
}

fn fixture(frequency: Frequency, targets: &[&str]) -> Fixture {
    let voices = tempfile::tempdir().unwrap();
    for file in ["v_morning_01.mp3", "v_morning_02.mp3", "v_company_01.wav"] {
        std::fs::write(voices.path().join(file), b"RIFF").unwrap();
    }
    let state = tempfile::tempdir().unwrap();

    let config = EchoConfig::builder()
        .voice_directory(voices.path())
        .state_dir(state.path())
        .schedule("08:00", frequency)
        .targets(targets.iter().copied())
        .no_send_delay()
        .build();
    let store_path = state.path().join("echo.toml");
    std::fs::write(&store_path, toml::to_string_pretty(&config).unwrap()).unwrap();
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::open(store_path).unwrap());
    let catalog = AssetCatalog::load(voices.path()).unwrap();

    Fixture {
        _voices: voices,
        state,
        store,
        catalog,
    }
}

fn scheduler(
    fixture: &Fixture,
    sender: Arc<RecordingSender>,
    worker: &Arc<PersistenceWorker>,
) -> TriggerScheduler {
    let orchestrator = Arc::new(DecisionOrchestrator::from_config(
        Arc::clone(&fixture.store),
        fixture.catalog.clone(),
    ));
    let ledger = Arc::new(DedupLedger::open(fixture.state.path(), Arc::clone(worker)));
    TriggerScheduler::new(orchestrator, sender, ledger)
}

#[tokio::test]
async fn test_dispatch_survives_restart_without_resending() {
    let fixture = fixture(Frequency::Daily, &["qq:1", "qq:2", "qq:3"]);
    let worker = Arc::new(PersistenceWorker::spawn());

    let sender = Arc::new(RecordingSender::default());
    let first = scheduler(&fixture, Arc::clone(&sender), &worker);
    let report = first.dispatch_at(at(1, 8, 0)).await;
    assert_eq!(report.sent.len(), 3);
    assert_eq!(sender.sessions(), vec!["qq:1", "qq:2", "qq:3"]);
    for (_, delivery) in sender.sent.lock().iter() {
        assert!(delivery.path.is_file());
    }
    worker.flush().await;

    // A restart inside the grace window must not resend
    let sender = Arc::new(RecordingSender::default());
    let second = scheduler(&fixture, Arc::clone(&sender), &worker);
    let report = second.dispatch_at(at(1, 8, 15)).await;
    assert!(report.sent.is_empty());
    assert_eq!(report.skipped.len(), 3);

    // Next day is a new bucket
    let report = second.dispatch_at(at(2, 8, 0)).await;
    assert_eq!(report.sent.len(), 3);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_offline_session_does_not_block_batch() {
    let fixture = fixture(Frequency::Daily, &["qq:1", "qq:down", "qq:3"]);
    let worker = Arc::new(PersistenceWorker::spawn());
    let sender = Arc::new(RecordingSender::with_offline(&["qq:down"]));
    let scheduler = scheduler(&fixture, Arc::clone(&sender), &worker);

    let report = scheduler.dispatch_at(at(1, 8, 0)).await;
    assert_eq!(report.failed, vec!["qq:down"]);
    assert_eq!(sender.sessions(), vec!["qq:1", "qq:3"]);
    assert!(!scheduler.ledger().is_done("qq:down", "2024-05-01"));
    assert!(scheduler.ledger().is_done("qq:1", "2024-05-01"));

    worker.shutdown().await;
}

#[tokio::test]
async fn test_hourly_buckets() {
    let fixture = fixture(Frequency::Hourly, &["qq:1"]);
    let worker = Arc::new(PersistenceWorker::spawn());
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&fixture, Arc::clone(&sender), &worker);

    assert_eq!(
        scheduler.dispatch_at(at(1, 9, 0)).await.key.as_deref(),
        Some("2024-05-01 09")
    );
    assert!(scheduler.dispatch_at(at(1, 9, 5)).await.sent.is_empty());
    assert_eq!(scheduler.dispatch_at(at(1, 10, 0)).await.sent, vec!["qq:1"]);
    assert_eq!(sender.sent.lock().len(), 2);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_targets_are_saved() {
    let fixture = fixture(Frequency::Daily, &["qq:1"]);
    let worker = Arc::new(PersistenceWorker::spawn());
    let scheduler = scheduler(&fixture, Arc::new(RecordingSender::default()), &worker);

    assert!(scheduler.add_target("qq:9").unwrap());
    assert!(scheduler.remove_target("qq:1").unwrap());

    let reloaded = FileConfigStore::open(fixture.state.path().join("echo.toml")).unwrap();
    assert_eq!(reloaded.snapshot().schedule.target_sessions, vec!["qq:9"]);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_background_loop_stops_promptly() {
    let fixture = fixture(Frequency::Daily, &[]);
    let worker = Arc::new(PersistenceWorker::spawn());
    let scheduler = scheduler(&fixture, Arc::new(RecordingSender::default()), &worker);

    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.stop())
        .await
        .expect("stop should not wait for the sleep to finish")
        .unwrap();
    assert!(!scheduler.is_running().await);

    worker.shutdown().await;
}
