//! Session lifecycle: creation, membership, invites, ending and the
//! periodic sweep.

use crate::clock::SharedTimeSource;
use crate::config::EngineConfig;
use crate::coordinator::{SessionHandle, SweepAction};
use crate::error::{CollabError, CollabResult};
use crate::ids::{DocumentId, Identity, SessionToken, UserId};
use crate::invite::{InviteClaims, InviteSigner};
use crate::permissions::Role;
use crate::persistence::{SnapshotPersister, SnippetStore};
use crate::session::{JoinResult, SessionRecord, SessionState, SessionView};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Outcome of one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sessions looked at
    pub examined: usize,
    /// Sessions transitioned to expired
    pub expired: usize,
    /// Closed sessions dropped from memory
    pub evicted: usize,
    /// Sessions whose coordinator could not be reached
    pub failed: usize,
}

impl SweepReport {
    /// Sessions whose status changed in this pass.
    pub fn transitioned(&self) -> usize {
        self.expired
    }
}

/// Handle for stopping background tasks.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Signal background tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Creates sessions, routes membership changes and expires idle sessions.
pub struct LifecycleManager<S: SnippetStore> {
    sessions: Arc<SessionStore>,
    snippets: Arc<S>,
    persister: SnapshotPersister,
    time: SharedTimeSource,
    config: EngineConfig,
    invites: InviteSigner,
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: SnippetStore + 'static> LifecycleManager<S> {
    pub fn new(
        sessions: Arc<SessionStore>,
        snippets: Arc<S>,
        persister: SnapshotPersister,
        time: SharedTimeSource,
        config: EngineConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let invites = InviteSigner::from_config(&config.invite);
        Self {
            sessions,
            snippets,
            persister,
            time,
            config,
            invites,
            shutdown_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Open a session on a snippet with `host` as its first participant.
    ///
    /// The initial text comes from the snippet store; an unknown snippet
    /// starts empty. `ttl` defaults to the configured session lifetime.
    pub async fn create_session(
        &self,
        document_id: DocumentId,
        host: Identity,
        ttl: Option<Duration>,
    ) -> CollabResult<SessionView> {
        let text = self
            .snippets
            .load_document(&document_id)
            .await?
            .unwrap_or_default();
        let ttl = ttl.unwrap_or_else(|| self.config.session.default_ttl());
        let now = self.now();
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|ttl| now.checked_add_signed(*ttl).is_some())
            .ok_or_else(|| CollabError::InvalidOperation(format!("ttl out of range: {ttl:?}")))?;

        loop {
            let token = SessionToken::generate();
            let state = SessionState::new(
                token.clone(),
                document_id.clone(),
                &host,
                text.clone(),
                ttl,
                now,
                self.config.session.clone(),
            );
            let view = state.view(now);
            let handle = SessionHandle::spawn(state, Arc::clone(&self.time), self.persister.clone());
            if self.sessions.insert(handle.clone()).await {
                tracing::info!(
                    session = %token.short(),
                    document = %document_id,
                    host = %host.user_id,
                    "Session created"
                );
                return Ok(view);
            }
            // 256-bit collision; stop the orphan and draw again
            let _ = handle.shutdown().await;
        }
    }

    pub async fn join(
        &self,
        token: &SessionToken,
        identity: Identity,
        role: Role,
    ) -> CollabResult<JoinResult> {
        self.sessions.get(token).await?.join(identity, role).await
    }

    /// Sign an invite granting `role` in the session. Only the host may
    /// invite, and never to the host role. `ttl` defaults to the configured
    /// invite lifetime.
    pub async fn create_invite(
        &self,
        token: &SessionToken,
        host: UserId,
        role: Role,
        ttl: Option<Duration>,
    ) -> CollabResult<String> {
        if role == Role::Host {
            return Err(CollabError::forbidden(&host, "invites cannot grant the host role"));
        }
        let view = self.sessions.get(token).await?.view().await?;
        if view.session.host_id != host {
            return Err(CollabError::forbidden(&host, "only the host may invite"));
        }
        if view.session.status.is_terminal() {
            return Err(CollabError::SessionClosed {
                token: token.clone(),
                status: view.session.status,
            });
        }

        let ttl = ttl.unwrap_or_else(|| self.config.invite.default_ttl());
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.now().checked_add_signed(ttl))
            .ok_or_else(|| CollabError::InvalidOperation(format!("ttl out of range: {ttl:?}")))?;
        let claims = InviteClaims {
            token: token.clone(),
            role,
            expires_at,
        };
        let invite = self
            .invites
            .sign(&claims)
            .map_err(|e| CollabError::InvalidOperation(e.to_string()))?;

        tracing::info!(session = %token.short(), role = %role, "Invite created");
        Ok(invite)
    }

    /// Join through a signed invite with the role it grants.
    pub async fn join_with_invite(
        &self,
        invite: &str,
        identity: Identity,
    ) -> CollabResult<JoinResult> {
        let claims = self.invites.verify(invite).map_err(|e| {
            tracing::warn!(user = %identity.user_id, "Invite rejected: {}", e);
            CollabError::forbidden(&identity.user_id, e.to_string())
        })?;
        if claims.is_expired(self.now()) {
            return Err(CollabError::Expired(claims.token));
        }
        self.join(&claims.token, identity, claims.role).await
    }

    pub async fn leave(&self, token: &SessionToken, user_id: UserId) -> CollabResult<()> {
        self.sessions.get(token).await?.leave(user_id).await
    }

    /// End a session on behalf of its host. Idempotent.
    pub async fn end(&self, token: &SessionToken, user_id: UserId) -> CollabResult<bool> {
        self.sessions.get(token).await?.end(Some(user_id)).await
    }

    /// End a session without a host check.
    pub async fn force_end(&self, token: &SessionToken) -> CollabResult<bool> {
        self.sessions.get(token).await?.end(None).await
    }

    /// Register a session rebuilt from an exported record.
    pub async fn restore_session(&self, record: SessionRecord) -> CollabResult<SessionView> {
        let token = record.session.token.clone();
        let state = SessionState::restore(record, self.config.session.clone())?;
        let view = state.view(self.now());
        let handle = SessionHandle::spawn(state, Arc::clone(&self.time), self.persister.clone());
        if !self.sessions.insert(handle.clone()).await {
            let _ = handle.shutdown().await;
            return Err(CollabError::InvalidOperation(format!(
                "session {} is already live",
                token.short()
            )));
        }
        tracing::info!(session = %token.short(), version = view.session.version, "Session restored");
        Ok(view)
    }

    /// Expire overdue and idle sessions and evict long-closed ones.
    ///
    /// Sessions are visited concurrently. A session that cannot be reached is
    /// counted as failed and dropped from the registry; it never stops the
    /// rest of the pass.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let handles = self.sessions.handles().await;
        let idle_grace = self.config.sweep.idle_grace();
        let retention = self.config.sweep.terminal_retention();

        let results = join_all(
            handles
                .iter()
                .map(|handle| handle.sweep(now, idle_grace, retention)),
        )
        .await;

        let mut report = SweepReport {
            examined: handles.len(),
            ..SweepReport::default()
        };
        for (handle, result) in handles.iter().zip(results) {
            match result {
                Ok(SweepAction::Kept) => {}
                Ok(SweepAction::Expired) => report.expired += 1,
                Ok(SweepAction::Evicted) => {
                    self.sessions.remove(handle.token()).await;
                    report.evicted += 1;
                }
                Err(e) => {
                    tracing::warn!(session = %handle.token().short(), "Sweep failed: {}", e);
                    if handle.is_closed() {
                        self.sessions.remove(handle.token()).await;
                    }
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            expired = report.expired,
            evicted = report.evicted,
            failed = report.failed,
            "Sweep complete"
        );
        report
    }

    /// Run [`sweep`](Self::sweep) every configured interval until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.sweep.interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.sweep(manager.now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    /// Stop every coordinator and wait for their final snapshots to be written.
    pub async fn shutdown(&self) {
        self.shutdown_handle().shutdown();
        let handles = self.sessions.drain().await;
        let count = handles.len();
        join_all(handles.iter().map(|handle| handle.shutdown())).await;
        self.persister.flush().await;
        tracing::info!(sessions = count, "Lifecycle manager shut down");
    }
}
