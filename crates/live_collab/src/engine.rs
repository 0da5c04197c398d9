//! The engine façade.
//!
//! [`CollabEngine`] wires the session registry, the lifecycle manager, the
//! snapshot persister and the time source together and exposes one async
//! method per transport contract. A transport layer maps each method onto a
//! route and each [`CollabError`] variant onto a status code.
//!
//! # Example
//!
//! ```no_run
//! use live_collab::{CollabEngine, DocumentId, EngineConfig, Identity, MemorySnippetStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let snippets = Arc::new(MemorySnippetStore::with_document("snippet-1", "fn main() {}"));
//!     let engine = CollabEngine::new(EngineConfig::default(), snippets)?;
//!     let sweeper = engine.spawn_sweeper();
//!
//!     let view = engine
//!         .create_session(DocumentId::from("snippet-1"), Identity::new("u1", "Ada"), None)
//!         .await?;
//!     println!("share this token: {}", view.session.token);
//!
//!     engine.shutdown().await;
//!     sweeper.await?;
//!     Ok(())
//! }
//! ```

use crate::clock::{SharedTimeSource, SystemTimeSource};
use crate::config::{ConfigError, EngineConfig};
use crate::error::CollabResult;
use crate::feed::{UpdateBatch, UpdateQuery};
use crate::ids::{DocumentId, Identity, SessionToken, UserId};
use crate::lifecycle::{LifecycleManager, ShutdownHandle, SweepReport};
use crate::merge::ConflictRecord;
use crate::operation::{Operation, Submission};
use crate::permissions::Role;
use crate::persistence::{MemorySnippetStore, PersisterStats, SnapshotPersister, SnippetStore};
use crate::presence::Cursor;
use crate::session::{ChatMessage, JoinResult, LockInfo, SessionRecord, SessionView, SubmitResult};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Entry point for hosting live collaboration sessions.
///
/// Must be created inside a tokio runtime: construction starts the snapshot
/// writer task.
pub struct CollabEngine<S: SnippetStore + 'static = MemorySnippetStore> {
    config: EngineConfig,
    sessions: Arc<SessionStore>,
    snippets: Arc<S>,
    lifecycle: Arc<LifecycleManager<S>>,
    persister: SnapshotPersister,
    time: SharedTimeSource,
}

impl<S: SnippetStore + 'static> CollabEngine<S> {
    /// Create an engine reading the system clock.
    pub fn new(config: EngineConfig, snippets: Arc<S>) -> Result<Self, ConfigError> {
        Self::with_time_source(config, snippets, Arc::new(SystemTimeSource))
    }

    /// Create an engine driven by the given time source.
    pub fn with_time_source(
        config: EngineConfig,
        snippets: Arc<S>,
        time: SharedTimeSource,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let sessions = Arc::new(SessionStore::new());
        let (persister, _writer) =
            SnapshotPersister::spawn(Arc::clone(&snippets), config.persistence.clone());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&sessions),
            Arc::clone(&snippets),
            persister.clone(),
            Arc::clone(&time),
            config.clone(),
        ));

        Ok(Self {
            config,
            sessions,
            snippets,
            lifecycle,
            persister,
            time,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snippets(&self) -> &Arc<S> {
        &self.snippets
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Counters of the background snapshot writer.
    pub fn persister_stats(&self) -> &PersisterStats {
        self.persister.stats()
    }

    /// Number of sessions held in memory, closed ones included until evicted.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    // ========== Lifecycle ==========

    /// `POST /sessions`
    pub async fn create_session(
        &self,
        document_id: DocumentId,
        host: Identity,
        ttl: Option<Duration>,
    ) -> CollabResult<SessionView> {
        self.lifecycle.create_session(document_id, host, ttl).await
    }

    /// `POST /sessions/{token}/join`
    pub async fn join(
        &self,
        token: &SessionToken,
        identity: Identity,
        role: Role,
    ) -> CollabResult<JoinResult> {
        self.lifecycle.join(token, identity, role).await
    }

    /// Sign a link inviting someone into the session as `role`.
    pub async fn create_invite(
        &self,
        token: &SessionToken,
        host: UserId,
        role: Role,
        ttl: Option<Duration>,
    ) -> CollabResult<String> {
        self.lifecycle.create_invite(token, host, role, ttl).await
    }

    pub async fn join_with_invite(
        &self,
        invite: &str,
        identity: Identity,
    ) -> CollabResult<JoinResult> {
        self.lifecycle.join_with_invite(invite, identity).await
    }

    pub async fn leave(&self, token: &SessionToken, user_id: UserId) -> CollabResult<()> {
        self.lifecycle.leave(token, user_id).await
    }

    /// `DELETE /sessions/{token}`. Returns `false` if the session was already closed.
    pub async fn end(&self, token: &SessionToken, user_id: UserId) -> CollabResult<bool> {
        self.lifecycle.end(token, user_id).await
    }

    pub async fn force_end(&self, token: &SessionToken) -> CollabResult<bool> {
        self.lifecycle.force_end(token).await
    }

    /// `GET /sessions/{token}`
    pub async fn session_view(&self, token: &SessionToken) -> CollabResult<SessionView> {
        self.sessions.get(token).await?.view().await
    }

    // ========== Edits ==========

    /// `POST /sessions/{token}/operations`
    pub async fn submit_operation(
        &self,
        token: &SessionToken,
        user_id: UserId,
        operation: Operation,
        base_version: u64,
    ) -> CollabResult<SubmitResult> {
        self.sessions
            .get(token)
            .await?
            .submit_operation(Submission {
                author_id: user_id,
                base_version,
                operation,
            })
            .await
    }

    /// `POST /sessions/{token}/cursor`
    pub async fn submit_cursor(
        &self,
        token: &SessionToken,
        user_id: UserId,
        cursor: Cursor,
    ) -> CollabResult<()> {
        self.sessions
            .get(token)
            .await?
            .submit_cursor(user_id, cursor)
            .await
    }

    /// Push a whole document edited against `base_version`.
    pub async fn submit_snapshot(
        &self,
        token: &SessionToken,
        user_id: UserId,
        base_version: u64,
        text: impl Into<String>,
    ) -> CollabResult<SubmitResult> {
        let result = self
            .sessions
            .get(token)
            .await?
            .submit_snapshot(user_id, base_version, text.into())
            .await;
        if let Err(e) = &result {
            if e.is_conflict() {
                tracing::info!(session = %token.short(), "Snapshot push conflicted: {}", e);
            }
        }
        result
    }

    pub async fn resolve_conflict(
        &self,
        token: &SessionToken,
        user_id: UserId,
        conflict_id: Uuid,
        text: impl Into<String>,
    ) -> CollabResult<SubmitResult> {
        self.sessions
            .get(token)
            .await?
            .resolve_conflict(user_id, conflict_id, text.into())
            .await
    }

    pub async fn pending_conflicts(&self, token: &SessionToken) -> CollabResult<Vec<ConflictRecord>> {
        self.sessions.get(token).await?.pending_conflicts().await
    }

    // ========== Lock and chat ==========

    pub async fn acquire_lock(&self, token: &SessionToken, user_id: UserId) -> CollabResult<LockInfo> {
        self.sessions.get(token).await?.acquire_lock(user_id).await
    }

    pub async fn release_lock(&self, token: &SessionToken, user_id: UserId) -> CollabResult<()> {
        self.sessions.get(token).await?.release_lock(user_id).await
    }

    pub async fn post_message(
        &self,
        token: &SessionToken,
        user_id: UserId,
        text: impl Into<String>,
        line_ref: Option<u32>,
    ) -> CollabResult<ChatMessage> {
        self.sessions
            .get(token)
            .await?
            .post_message(user_id, text.into(), line_ref)
            .await
    }

    pub async fn recent_messages(
        &self,
        token: &SessionToken,
        limit: usize,
    ) -> CollabResult<Vec<ChatMessage>> {
        self.sessions.get(token).await?.recent_messages(limit).await
    }

    // ========== Feed ==========

    /// `GET /sessions/{token}/updates`
    ///
    /// Blocks until something newer than the query's cursors exists or the
    /// clamped timeout elapses. Dropping the future abandons the wait.
    pub async fn wait_for_updates(
        &self,
        token: &SessionToken,
        user_id: UserId,
        query: UpdateQuery,
    ) -> CollabResult<UpdateBatch> {
        let timeout = self.config.feed.clamp_timeout(query.timeout);
        self.sessions
            .get(token)
            .await?
            .wait_for_updates(user_id, query, timeout)
            .await
    }

    // ========== Recovery ==========

    pub async fn export_session(&self, token: &SessionToken) -> CollabResult<SessionRecord> {
        self.sessions.get(token).await?.export().await
    }

    pub async fn restore_session(&self, record: SessionRecord) -> CollabResult<SessionView> {
        self.lifecycle.restore_session(record).await
    }

    // ========== Maintenance ==========

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.lifecycle.sweep(now).await
    }

    /// Start the periodic sweeper. It stops on [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.lifecycle.spawn_sweeper()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.lifecycle.shutdown_handle()
    }

    /// Stop the sweeper and every session, then wait for pending snapshots.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
    }
}
