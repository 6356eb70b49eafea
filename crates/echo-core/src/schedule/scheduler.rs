//! Recurring broadcast scheduler.
//!
//! One cooperative background loop per instance. Each iteration re-reads the
//! configuration, checks whether a trigger window is open, dispatches to the
//! sessions that have not received the current bucket yet, and sleeps in
//! bounded steps so configuration edits and `stop()` are noticed promptly.

use chrono::{Local, NaiveDateTime, Utc};
use rand::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ledger::{DedupLedger, FailureOutcome};
use super::trigger::{evaluate_trigger, seconds_until_next_trigger, TriggerSpec, TriggerState};
use crate::config::EchoConfig;
use crate::error::{EchoError, EchoResult};
use crate::orchestrator::DecisionOrchestrator;
use crate::traits::{Delivery, Sender};

/// Sleep while recurring sends are disabled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Longest single sleep between iterations.
pub const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// What one dispatch attempt did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Bucket dispatched, `None` when no window was open.
    pub key: Option<String>,
    pub compensated: bool,
    pub tag: Option<String>,
    pub sent: Vec<String>,
    pub failed: Vec<String>,
    /// Sessions already done with this bucket.
    pub skipped: Vec<String>,
    /// Stopped before every pending session was tried.
    pub cancelled: bool,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    orchestrator: Arc<DecisionOrchestrator>,
    sender: Arc<dyn Sender>,
    ledger: Arc<DedupLedger>,
}

/// Drives scheduled broadcasts.
pub struct TriggerScheduler {
    inner: Arc<SchedulerInner>,
    worker: Mutex<Option<Worker>>,
}

impl TriggerScheduler {
    pub fn new(
        orchestrator: Arc<DecisionOrchestrator>,
        sender: Arc<dyn Sender>,
        ledger: Arc<DedupLedger>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                orchestrator,
                sender,
                ledger,
            }),
            worker: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        match self.worker.lock().await.as_ref() {
            Some(worker) if !worker.handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SchedulerState::Running
    }

    /// Start the background loop. Does nothing if already running.
    pub async fn start(&self) -> EchoResult<()> {
        let mut worker = self.worker.lock().await;
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Trigger scheduler already running");
                return Ok(());
            }
        }

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { inner.run(loop_token).await });
        *worker = Some(Worker { token, handle });
        info!("Trigger scheduler started");
        Ok(())
    }

    /// Stop the loop and wait for it to exit. Does nothing if stopped.
    pub async fn stop(&self) -> EchoResult<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        worker.token.cancel();
        worker
            .handle
            .await
            .map_err(|e| EchoError::Scheduler(format!("Scheduler task failed: {}", e)))?;
        info!("Trigger scheduler stopped");
        Ok(())
    }

    /// Add a target session and save the configuration.
    ///
    /// Returns `false` if the session was already a target.
    pub fn add_target(&self, session_id: &str) -> EchoResult<bool> {
        let store = self.inner.orchestrator.config();
        let mut added = false;
        store.update(&mut |config: &mut EchoConfig| {
            if !config.schedule.target_sessions.iter().any(|s| s == session_id) {
                config.schedule.target_sessions.push(session_id.to_string());
                added = true;
            }
        });
        if added {
            store.save()?;
            info!(session_id = %session_id, "Added schedule target");
        }
        Ok(added)
    }

    /// Remove a target session and save the configuration.
    ///
    /// Returns `false` if the session was not a target.
    pub fn remove_target(&self, session_id: &str) -> EchoResult<bool> {
        let store = self.inner.orchestrator.config();
        let mut removed = false;
        store.update(&mut |config: &mut EchoConfig| {
            let before = config.schedule.target_sessions.len();
            config.schedule.target_sessions.retain(|s| s != session_id);
            removed = config.schedule.target_sessions.len() != before;
        });
        if removed {
            self.inner.ledger.forget(session_id);
            store.save()?;
            info!(session_id = %session_id, "Removed schedule target");
        }
        Ok(removed)
    }

    pub fn targets(&self) -> Vec<String> {
        self.inner.orchestrator.config().snapshot().schedule.target_sessions
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.inner.ledger
    }

    /// Run one dispatch as if the local time were `now`.
    pub async fn dispatch_at(&self, now: NaiveDateTime) -> DispatchReport {
        let config = self.inner.orchestrator.config().snapshot();
        self.inner.dispatch(&config, now, &CancellationToken::new()).await
    }
}

impl SchedulerInner {
    async fn run(&self, token: CancellationToken) {
        let mut last_signature: Option<String> = None;
        loop {
            if token.is_cancelled() {
                break;
            }

            let config = self.orchestrator.config().snapshot();
            let signature = config.schedule_signature();
            if last_signature.as_deref() != Some(signature.as_str()) {
                if last_signature.is_some() {
                    info!(
                        time = %config.schedule.time,
                        frequency = %config.schedule.frequency,
                        targets = config.schedule.target_sessions.len(),
                        "Schedule configuration changed"
                    );
                }
                last_signature = Some(signature);
            }

            let wait = if config.enabled && config.schedule.enabled {
                let now = Local::now().naive_local();
                let report = self.dispatch(&config, now, &token).await;
                if report.cancelled {
                    break;
                }
                let spec = TriggerSpec::from_config(&config.schedule);
                let until = seconds_until_next_trigger(Local::now().naive_local(), &spec);
                Duration::from_secs(until.max(1)).min(MAX_SLEEP)
            } else {
                POLL_INTERVAL
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!("Trigger scheduler loop exited");
    }

    async fn dispatch(&self, config: &EchoConfig, now: NaiveDateTime, token: &CancellationToken) -> DispatchReport {
        let spec = TriggerSpec::from_config(&config.schedule);
        let state = evaluate_trigger(now, &spec);
        let (key, compensated) = match &state {
            TriggerState::Idle => return DispatchReport::default(),
            TriggerState::OnTime { key, .. } => (key.clone(), false),
            TriggerState::Compensated { key, late_by, .. } => {
                debug!(key = %key, late_by_secs = late_by.num_seconds(), "Inside grace window");
                (key.clone(), true)
            }
        };

        let mut report = DispatchReport {
            key: Some(key.clone()),
            compensated,
            ..Default::default()
        };

        let mut pending: Vec<String> = Vec::new();
        for session in &config.schedule.target_sessions {
            if pending.contains(session) || report.skipped.contains(session) {
                continue;
            }
            if self.ledger.is_done(session, &key) {
                report.skipped.push(session.clone());
            } else {
                pending.push(session.clone());
            }
        }
        if pending.is_empty() {
            return report;
        }
        pending.shuffle(&mut thread_rng());

        let tag = self.orchestrator.scheduled_tag(config, now);
        report.tag = Some(tag.clone());
        if compensated {
            info!(key = %key, tag = %tag, sessions = pending.len(), "Catching up missed scheduled send");
        } else {
            info!(key = %key, tag = %tag, sessions = pending.len(), "Scheduled send due");
        }

        let count = pending.len();
        for (i, session) in pending.into_iter().enumerate() {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.deliver(&session, &tag).await {
                Ok(delivery) => {
                    self.ledger.mark_sent(&session, &key, Utc::now());
                    if config.schedule.feed_context {
                        self.orchestrator.record_delivery(&session, &tag, Utc::now());
                    }
                    info!(session_id = %session, asset = %delivery.asset_id, tag = %tag, "Scheduled send delivered");
                    report.sent.push(session);
                }
                Err(e) => {
                    error!(
                        session_id = %session,
                        error = %e,
                        code = e.code().as_str(),
                        per_recipient = e.is_per_recipient(),
                        "Scheduled send failed"
                    );
                    match self.ledger.record_failure(&session, &key, config.schedule.max_attempts) {
                        FailureOutcome::Retry { attempts } => {
                            debug!(session_id = %session, attempts, "Will retry in this window");
                        }
                        FailureOutcome::GaveUp => {}
                    }
                    report.failed.push(session);
                }
            }

            if i + 1 < count {
                let delay = send_delay(config);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => {
                            report.cancelled = true;
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(
            key = %key,
            sent = report.sent.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Scheduled dispatch finished"
        );
        report
    }

    async fn deliver(&self, session: &str, tag: &str) -> EchoResult<Delivery> {
        let asset_id = self
            .orchestrator
            .select_for(Some(tag))
            .ok_or_else(|| EchoError::not_found(format!("any asset for tag '{}'", tag)))?;
        let path = self
            .orchestrator
            .resolve(&asset_id)
            .ok_or_else(|| EchoError::not_found(asset_id.clone()))?;
        let delivery = Delivery {
            asset_id,
            path,
            tag: Some(tag.to_string()),
        };
        self.sender.send(session, &delivery).await?;
        Ok(delivery)
    }
}

fn send_delay(config: &EchoConfig) -> Duration {
    let min = config.schedule.min_send_delay_ms;
    let max = config.schedule.max_send_delay_ms.max(min);
    if max == 0 {
        return Duration::ZERO;
    }
    let ms = thread_rng().gen_range(min..=max);
    Duration::from_millis(ms)
}

impl Drop for TriggerScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            warn!("Trigger scheduler dropped while running, cancelling");
            worker.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, InMemoryConfigStore};
    use crate::schedule::Frequency;
    use crate::selection::{derive_tags, AssetCatalog, AssetEntry};
    use crate::traits::MockSender;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn scheduler(sender: MockSender, targets: &[&str]) -> (tempfile::TempDir, TriggerScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let ids = ["t_morning_01.mp3", "t_morning_02.mp3", "t_morning_03.mp3"];
        let entries = ids
            .iter()
            .map(|id| {
                std::fs::write(dir.path().join(id), b"x").unwrap();
                AssetEntry::new(*id, derive_tags(std::path::Path::new(id)))
            })
            .collect();
        let config = EchoConfig::builder()
            .schedule("08:00", Frequency::Daily)
            .targets(targets.iter().copied())
            .schedule_tags(["morning"])
            .no_send_delay()
            .build();
        let store: Arc<dyn ConfigStore> = Arc::new(InMemoryConfigStore::new(config));
        let orchestrator = Arc::new(DecisionOrchestrator::from_config(
            store,
            AssetCatalog::from_entries(dir.path(), entries),
        ));
        let scheduler = TriggerScheduler::new(orchestrator, Arc::new(sender), Arc::new(DedupLedger::in_memory()));
        (dir, scheduler)
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_bucket() {
        let mut sender = MockSender::new();
        sender.expect_send().times(2).returning(|_: &str, _: &Delivery| Ok(()));
        let (_dir, scheduler) = scheduler(sender, &["a", "b"]);

        let report = scheduler.dispatch_at(at(8, 0)).await;
        assert_eq!(report.key.as_deref(), Some("2024-05-01"));
        assert_eq!(report.tag.as_deref(), Some("morning"));
        assert_eq!(report.sent.len(), 2);
        assert!(!report.compensated);

        let again = scheduler.dispatch_at(at(8, 5)).await;
        assert!(again.sent.is_empty());
        assert_eq!(again.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_sessions() {
        let mut sender = MockSender::new();
        sender
            .expect_send()
            .withf(|s: &str, _: &Delivery| s == "bad")
            .returning(|s: &str, _: &Delivery| Err(EchoError::delivery(s, "offline")));
        sender
            .expect_send()
            .withf(|s: &str, _: &Delivery| s != "bad")
            .times(2)
            .returning(|_: &str, _: &Delivery| Ok(()));
        let (_dir, scheduler) = scheduler(sender, &["a", "bad", "c"]);

        let report = scheduler.dispatch_at(at(8, 0)).await;
        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(report.sent.len(), 2);
        assert!(!scheduler.ledger().is_done("bad", "2024-05-01"));

        // Retried inside the window until attempts run out
        let retry = scheduler.dispatch_at(at(8, 10)).await;
        assert!(retry.compensated);
        assert_eq!(retry.failed, vec!["bad"]);
        let last = scheduler.dispatch_at(at(8, 20)).await;
        assert_eq!(last.failed, vec!["bad"]);
        assert!(scheduler.ledger().is_done("bad", "2024-05-01"));

        let after = scheduler.dispatch_at(at(8, 25)).await;
        assert!(after.sent.is_empty() && after.failed.is_empty());
    }

    #[tokio::test]
    async fn test_outside_window_is_idle() {
        let mut sender = MockSender::new();
        sender.expect_send().never();
        let (_dir, scheduler) = scheduler(sender, &["a"]);

        assert_eq!(scheduler.dispatch_at(at(7, 59)).await, DispatchReport::default());
        assert_eq!(scheduler.dispatch_at(at(8, 40)).await, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_sends_nothing() {
        let mut sender = MockSender::new();
        sender.expect_send().never();
        let (_dir, scheduler) = scheduler(sender, &["a", "b"]);

        let token = CancellationToken::new();
        token.cancel();
        let config = scheduler.inner.orchestrator.config().snapshot();
        let report = scheduler.inner.dispatch(&config, at(8, 0), &token).await;
        assert!(report.cancelled);
        assert!(report.sent.is_empty());
    }

    #[tokio::test]
    async fn test_feed_context_seeds_mood() {
        let mut sender = MockSender::new();
        sender.expect_send().returning(|_: &str, _: &Delivery| Ok(()));
        let (_dir, scheduler) = scheduler(sender, &["a"]);

        scheduler.dispatch_at(at(8, 0)).await;
        let mood = scheduler
            .inner
            .orchestrator
            .context()
            .live_mood("a", Utc::now())
            .unwrap();
        assert_eq!(mood.tag, "morning");
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_dir, scheduler) = scheduler(MockSender::new(), &[]);
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state().await, SchedulerState::Running);

        scheduler.stop().await.unwrap();
        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    }

    #[test]
    fn test_add_remove_target() {
        let (_dir, scheduler) = scheduler(MockSender::new(), &["a"]);
        assert!(scheduler.add_target("b").unwrap());
        assert!(!scheduler.add_target("b").unwrap());
        assert_eq!(scheduler.targets(), vec!["a", "b"]);

        assert!(scheduler.remove_target("a").unwrap());
        assert!(!scheduler.remove_target("a").unwrap());
        assert_eq!(scheduler.targets(), vec!["b"]);
    }
}
