//! Bounded background writer for learned state.
//!
//! The hot paths never touch the filesystem. They hand serialized documents
//! to a single worker task through a bounded channel; a full queue drops the
//! write with a warning. Writes are atomic (temp file + rename) and failures
//! are logged and swallowed.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Work item for the persistence worker.
#[derive(Debug)]
pub enum PersistTask {
    /// Replace `path` with `contents`.
    Write { path: PathBuf, contents: Vec<u8> },
    /// Acknowledge once every earlier task has completed.
    Flush(oneshot::Sender<()>),
}

/// Single background task draining a bounded queue of writes.
pub struct PersistenceWorker {
    sender: mpsc::Sender<PersistTask>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(receiver));
        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue `value` to be written to `path` as pretty JSON.
    ///
    /// Never blocks. Returns `false` if the value could not be serialized or
    /// the queue was full or closed.
    pub fn submit_json<T: Serialize + ?Sized>(&self, path: impl Into<PathBuf>, value: &T) -> bool {
        let path = path.into();
        match serde_json::to_vec_pretty(value) {
            Ok(contents) => self.submit(PersistTask::Write { path, contents }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to serialize state, skipping write");
                false
            }
        }
    }

    /// Queue a raw task without blocking.
    pub fn submit(&self, task: PersistTask) -> bool {
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task = %describe(&task), "Persistence queue full, dropping write");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task = %describe(&task), "Persistence worker stopped, dropping write");
                false
            }
        }
    }

    /// Wait until every task queued before this call has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(PersistTask::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Flush, then stop the worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.flush().await;
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("Persistence worker stopped");
        }
    }
}

fn describe(task: &PersistTask) -> String {
    match task {
        PersistTask::Write { path, .. } => path.display().to_string(),
        PersistTask::Flush(_) => "flush".to_string(),
    }
}

async fn run(mut receiver: mpsc::Receiver<PersistTask>) {
    while let Some(task) = receiver.recv().await {
        match task {
            PersistTask::Write { path, contents } => {
                if let Err(e) = write_atomic(&path, &contents).await {
                    error!(path = %path.display(), error = %e, "Failed to persist state");
                } else {
                    debug!(path = %path.display(), bytes = contents.len(), "Persisted state");
                }
            }
            PersistTask::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Read a JSON document written by the worker. Missing or corrupt files
/// yield `None` with a warning.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read persisted state");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt persisted state");
            None
        }
    }
}
