//! Per-session dedup state for scheduled sends.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::persistence::{load_json, PersistenceWorker};

/// Name of the ledger file inside the state directory.
pub const LEDGER_FILE: &str = "schedule_ledger.json";

/// Dedup state of one target session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Last bucket this session is done with.
    pub last_key: Option<String>,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Bucket currently being retried.
    pub pending_key: Option<String>,
    pub attempts: u32,
}

/// Outcome of recording a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Will be retried inside the same window.
    Retry { attempts: u32 },
    /// Attempts exhausted; the bucket is closed for this session.
    GaveUp,
}

/// Dedup ledger keyed by session id.
///
/// Sessions are tracked independently: one session's failure never blocks
/// or duplicates delivery to another within the same bucket.
#[derive(Default)]
pub struct DedupLedger {
    records: Mutex<BTreeMap<String, SessionRecord>>,
    persistence: Option<(Arc<PersistenceWorker>, PathBuf)>,
}

impl DedupLedger {
    /// Ledger held only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Ledger persisted under `state_dir`, restored from any previous run.
    pub fn open(state_dir: &Path, worker: Arc<PersistenceWorker>) -> Self {
        let path = state_dir.join(LEDGER_FILE);
        let records = load_json::<BTreeMap<String, SessionRecord>>(&path).unwrap_or_default();
        if !records.is_empty() {
            info!(path = %path.display(), sessions = records.len(), "Restored schedule ledger");
        }
        Self {
            records: Mutex::new(records),
            persistence: Some((worker, path)),
        }
    }

    /// Whether `session_id` is done with bucket `key`.
    pub fn is_done(&self, session_id: &str, key: &str) -> bool {
        self.records
            .lock()
            .get(session_id)
            .and_then(|r| r.last_key.as_deref())
            == Some(key)
    }

    /// Failed attempts for `session_id` in bucket `key`.
    pub fn attempts(&self, session_id: &str, key: &str) -> u32 {
        self.records
            .lock()
            .get(session_id)
            .filter(|r| r.pending_key.as_deref() == Some(key))
            .map(|r| r.attempts)
            .unwrap_or(0)
    }

    /// Record a successful delivery.
    pub fn mark_sent(&self, session_id: &str, key: &str, now: DateTime<Utc>) {
        let mut records = self.records.lock();
        let record = records.entry(session_id.to_string()).or_default();
        record.last_key = Some(key.to_string());
        record.last_sent_at = Some(now);
        record.pending_key = None;
        record.attempts = 0;
        self.persist(&records);
    }

    /// Record a failed delivery; after `max_attempts` the bucket is closed.
    pub fn record_failure(&self, session_id: &str, key: &str, max_attempts: u32) -> FailureOutcome {
        let mut records = self.records.lock();
        let outcome = {
            let record = records.entry(session_id.to_string()).or_default();
            if record.pending_key.as_deref() != Some(key) {
                record.pending_key = Some(key.to_string());
                record.attempts = 0;
            }
            record.attempts += 1;
            if record.attempts >= max_attempts.max(1) {
                warn!(session_id = %session_id, key = %key, attempts = record.attempts, "Giving up on scheduled send");
                record.last_key = Some(key.to_string());
                record.pending_key = None;
                record.attempts = 0;
                FailureOutcome::GaveUp
            } else {
                FailureOutcome::Retry {
                    attempts: record.attempts,
                }
            }
        };
        self.persist(&records);
        outcome
    }

    /// Drop a session's state.
    pub fn forget(&self, session_id: &str) {
        let mut records = self.records.lock();
        if records.remove(session_id).is_some() {
            self.persist(&records);
        }
    }

    pub fn record(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.lock().get(session_id).cloned()
    }

    /// Queue a write of `records`; called with the lock held so writes
    /// reach the worker in mutation order.
    fn persist(&self, records: &BTreeMap<String, SessionRecord>) {
        if let Some((worker, path)) = &self.persistence {
            worker.submit_json(path.clone(), records);
        }
    }
}
