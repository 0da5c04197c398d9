//! Snapshot persistence to the external snippet store.
//!
//! The engine never waits on the snippet store while a session is committing
//! operations. Coordinators hand finished [`DocumentSnapshot`]s to a
//! [`SnapshotPersister`], whose background task writes them through a
//! [`SnippetStore`] and retries failures with exponential backoff.
//!
//! Two stores are provided:
//!
//! - [`MemorySnippetStore`]: in-process, for tests and development
//! - [`FileSnippetStore`]: one JSON file per document

pub mod file_store;
pub mod memory_store;

pub use file_store::FileSnippetStore;
pub use memory_store::MemorySnippetStore;

use crate::config::PersistenceConfig;
use crate::ids::{DocumentId, SessionToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// The backend is temporarily unreachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Internal storage error
    #[error("Internal storage error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Document text at a session version, as written to the snippet store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    /// Session the snapshot was taken from
    pub session: Option<SessionToken>,
    /// Session version `text` corresponds to
    pub version: u64,
    pub text: String,
    pub taken_at: DateTime<Utc>,
}

/// Canonical storage of snippet text.
///
/// Implementations must be safe to share between tasks.
#[trait_variant::make(Send)]
pub trait SnippetStore: Send + Sync {
    /// Current canonical text of a document, or `None` if it has never been stored.
    async fn load_document(&self, document_id: &DocumentId) -> StorageResult<Option<String>>;

    /// Replace the canonical text of a document.
    async fn save_snapshot(&self, snapshot: &DocumentSnapshot) -> StorageResult<()>;
}

enum PersistJob {
    Save(DocumentSnapshot),
    Flush(oneshot::Sender<()>),
}

/// Counters kept by the persister task.
#[derive(Debug, Default)]
pub struct PersisterStats {
    saved: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl PersisterStats {
    /// Snapshots written successfully
    pub fn saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    /// Failed attempts that were retried
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Snapshots dropped after exhausting all attempts
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Handle for queueing snapshots to the background writer.
///
/// Cloning is cheap; the background task runs until every handle is dropped.
#[derive(Clone)]
pub struct SnapshotPersister {
    tx: mpsc::UnboundedSender<PersistJob>,
    stats: Arc<PersisterStats>,
}

impl SnapshotPersister {
    /// Start the writer task on the current runtime.
    pub fn spawn<S>(store: Arc<S>, config: PersistenceConfig) -> (Self, JoinHandle<()>)
    where
        S: SnippetStore + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PersisterStats::default());
        let task = tokio::spawn(run_persister(store, config, rx, Arc::clone(&stats)));
        (Self { tx, stats }, task)
    }

    /// Queue a snapshot. Never blocks; returns `false` if the writer has stopped.
    pub fn enqueue(&self, snapshot: DocumentSnapshot) -> bool {
        self.tx.send(PersistJob::Save(snapshot)).is_ok()
    }

    /// Wait until every snapshot queued before this call has been handled.
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(PersistJob::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn stats(&self) -> &PersisterStats {
        &self.stats
    }
}

async fn run_persister<S: SnippetStore>(
    store: Arc<S>,
    config: PersistenceConfig,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    stats: Arc<PersisterStats>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            PersistJob::Save(snapshot) => {
                save_with_retry(store.as_ref(), &config, &snapshot, &stats).await;
            }
            PersistJob::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    tracing::debug!("Snapshot persister stopped");
}

async fn save_with_retry<S: SnippetStore>(
    store: &S,
    config: &PersistenceConfig,
    snapshot: &DocumentSnapshot,
    stats: &PersisterStats,
) {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match store.save_snapshot(snapshot).await {
            Ok(()) => {
                stats.saved.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    document = %snapshot.document_id,
                    version = snapshot.version,
                    "Snapshot saved"
                );
                return;
            }
            Err(e) if attempt < max_attempts => {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                let delay = config.backoff(attempt);
                tracing::warn!(
                    document = %snapshot.document_id,
                    attempt,
                    ?delay,
                    "Snapshot save failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    document = %snapshot.document_id,
                    version = snapshot.version,
                    "Giving up on snapshot after {} attempts: {}",
                    max_attempts,
                    e
                );
            }
        }
    }
}
