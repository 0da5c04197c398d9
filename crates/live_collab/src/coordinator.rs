//! Per-session coordinator task.
//!
//! Each live session is owned by one tokio task that holds its
//! [`SessionState`] and processes [`SessionCommand`]s strictly one at a time.
//! That task is the only writer, so the version check, transformation and
//! append of a submission can never interleave with another submission for
//! the same session. Different sessions run on different tasks and never
//! share mutable state.
//!
//! Callers talk to the task through a cloneable [`SessionHandle`]. Requests
//! carry a oneshot reply channel; state changes are published on a `watch`
//! channel that long-poll waiters subscribe to (see [`crate::feed`]).

use crate::clock::SharedTimeSource;
use crate::error::{CollabError, CollabResult};
use crate::feed::{wait_for_news, FeedHead, UpdateBatch, UpdateQuery, WaitOutcome};
use crate::ids::{Identity, SessionToken, UserId};
use crate::merge::ConflictRecord;
use crate::operation::Submission;
use crate::permissions::Role;
use crate::persistence::SnapshotPersister;
use crate::presence::Cursor;
use crate::session::{
    ChatMessage, JoinResult, LockInfo, SessionRecord, SessionState, SessionView, SubmitResult,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<T>;

/// Commands accepted by a session coordinator.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Join {
        identity: Identity,
        role: Role,
        reply: Reply<CollabResult<JoinResult>>,
    },
    Leave {
        user_id: UserId,
        reply: Reply<CollabResult<()>>,
    },
    Submit {
        submission: Submission,
        reply: Reply<CollabResult<SubmitResult>>,
    },
    Cursor {
        user_id: UserId,
        cursor: Cursor,
        reply: Reply<CollabResult<()>>,
    },
    Snapshot {
        user_id: UserId,
        base_version: u64,
        text: String,
        reply: Reply<CollabResult<SubmitResult>>,
    },
    ResolveConflict {
        user_id: UserId,
        conflict_id: Uuid,
        text: String,
        reply: Reply<CollabResult<SubmitResult>>,
    },
    PendingConflicts {
        reply: Reply<Vec<ConflictRecord>>,
    },
    AcquireLock {
        user_id: UserId,
        reply: Reply<CollabResult<LockInfo>>,
    },
    ReleaseLock {
        user_id: UserId,
        reply: Reply<CollabResult<()>>,
    },
    PostMessage {
        user_id: UserId,
        text: String,
        line_ref: Option<u32>,
        reply: Reply<CollabResult<ChatMessage>>,
    },
    RecentMessages {
        limit: usize,
        reply: Reply<Vec<ChatMessage>>,
    },
    Heartbeat {
        user_id: UserId,
        reply: Reply<CollabResult<()>>,
    },
    Collect {
        user_id: UserId,
        since_version: u64,
        since_event: u64,
        reply: Reply<CollabResult<UpdateBatch>>,
    },
    View {
        reply: Reply<SessionView>,
    },
    Export {
        reply: Reply<SessionRecord>,
    },
    /// `user_id: None` is the authorised override.
    End {
        user_id: Option<UserId>,
        reply: Reply<CollabResult<bool>>,
    },
    Sweep {
        now: DateTime<Utc>,
        idle_grace: ChronoDuration,
        retention: ChronoDuration,
        reply: Reply<SweepAction>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// What a sweep pass did to one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepAction {
    /// Still live, or closed but within its retention
    Kept,
    /// Transitioned to expired by this pass
    Expired,
    /// Closed long enough ago; the coordinator has stopped
    Evicted,
}

/// Cloneable handle to a session coordinator.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    token: SessionToken,
    commands: mpsc::UnboundedSender<SessionCommand>,
    feed: watch::Receiver<FeedHead>,
}

impl SessionHandle {
    /// Start a coordinator task owning `state`.
    pub fn spawn(
        state: SessionState,
        time: SharedTimeSource,
        persister: SnapshotPersister,
    ) -> SessionHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let (head_tx, feed) = watch::channel(state.head());
        let token = state.token().clone();

        let coordinator = Coordinator {
            state,
            commands: rx,
            head: head_tx,
            time,
            persister,
        };
        tokio::spawn(coordinator.run());

        SessionHandle {
            token,
            commands,
            feed,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Whether the coordinator task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest published head, without waiting.
    pub fn head(&self) -> FeedHead {
        *self.feed.borrow()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> CollabResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| CollabError::Unavailable(self.token.clone()))?;
        response
            .await
            .map_err(|_| CollabError::Unavailable(self.token.clone()))
    }

    pub async fn join(&self, identity: Identity, role: Role) -> CollabResult<JoinResult> {
        self.request(|reply| SessionCommand::Join {
            identity,
            role,
            reply,
        })
        .await?
    }

    pub async fn leave(&self, user_id: UserId) -> CollabResult<()> {
        self.request(|reply| SessionCommand::Leave { user_id, reply })
            .await?
    }

    pub async fn submit_operation(&self, submission: Submission) -> CollabResult<SubmitResult> {
        self.request(|reply| SessionCommand::Submit { submission, reply })
            .await?
    }

    pub async fn submit_cursor(&self, user_id: UserId, cursor: Cursor) -> CollabResult<()> {
        self.request(|reply| SessionCommand::Cursor {
            user_id,
            cursor,
            reply,
        })
        .await?
    }

    pub async fn submit_snapshot(
        &self,
        user_id: UserId,
        base_version: u64,
        text: String,
    ) -> CollabResult<SubmitResult> {
        self.request(|reply| SessionCommand::Snapshot {
            user_id,
            base_version,
            text,
            reply,
        })
        .await?
    }

    pub async fn resolve_conflict(
        &self,
        user_id: UserId,
        conflict_id: Uuid,
        text: String,
    ) -> CollabResult<SubmitResult> {
        self.request(|reply| SessionCommand::ResolveConflict {
            user_id,
            conflict_id,
            text,
            reply,
        })
        .await?
    }

    pub async fn pending_conflicts(&self) -> CollabResult<Vec<ConflictRecord>> {
        self.request(|reply| SessionCommand::PendingConflicts { reply })
            .await
    }

    pub async fn acquire_lock(&self, user_id: UserId) -> CollabResult<LockInfo> {
        self.request(|reply| SessionCommand::AcquireLock { user_id, reply })
            .await?
    }

    pub async fn release_lock(&self, user_id: UserId) -> CollabResult<()> {
        self.request(|reply| SessionCommand::ReleaseLock { user_id, reply })
            .await?
    }

    pub async fn post_message(
        &self,
        user_id: UserId,
        text: String,
        line_ref: Option<u32>,
    ) -> CollabResult<ChatMessage> {
        self.request(|reply| SessionCommand::PostMessage {
            user_id,
            text,
            line_ref,
            reply,
        })
        .await?
    }

    pub async fn recent_messages(&self, limit: usize) -> CollabResult<Vec<ChatMessage>> {
        self.request(|reply| SessionCommand::RecentMessages { limit, reply })
            .await
    }

    /// Refresh a participant's presence. Strangers are refused.
    pub async fn heartbeat(&self, user_id: UserId) -> CollabResult<()> {
        self.request(|reply| SessionCommand::Heartbeat { user_id, reply })
            .await?
    }

    pub async fn view(&self) -> CollabResult<SessionView> {
        self.request(|reply| SessionCommand::View { reply }).await
    }

    pub async fn export(&self) -> CollabResult<SessionRecord> {
        self.request(|reply| SessionCommand::Export { reply }).await
    }

    /// End on behalf of `user_id`, or unconditionally when `None`.
    pub async fn end(&self, user_id: Option<UserId>) -> CollabResult<bool> {
        self.request(|reply| SessionCommand::End { user_id, reply })
            .await?
    }

    pub(crate) async fn sweep(
        &self,
        now: DateTime<Utc>,
        idle_grace: ChronoDuration,
        retention: ChronoDuration,
    ) -> CollabResult<SweepAction> {
        self.request(|reply| SessionCommand::Sweep {
            now,
            idle_grace,
            retention,
            reply,
        })
        .await
    }

    /// Stop the coordinator after flushing unsaved changes to the persister.
    pub async fn shutdown(&self) -> CollabResult<()> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    /// Long-poll for updates newer than the query's cursors.
    ///
    /// Membership is checked before waiting. The wait itself does not occupy
    /// the coordinator; once it ends the coordinator is asked for the batch.
    /// A timeout yields whatever is current, usually an empty batch.
    pub async fn wait_for_updates(
        &self,
        user_id: UserId,
        query: UpdateQuery,
        timeout: Duration,
    ) -> CollabResult<UpdateBatch> {
        self.heartbeat(user_id.clone()).await?;

        let mut feed = self.feed.clone();
        let since_event = query
            .since_event
            .unwrap_or_else(|| feed.borrow().event_seq);

        if wait_for_news(&mut feed, query.since_version, since_event, timeout).await
            == WaitOutcome::Closed
        {
            return Err(CollabError::NotFound(self.token.clone()));
        }

        self.request(|reply| SessionCommand::Collect {
            user_id,
            since_version: query.since_version,
            since_event,
            reply,
        })
        .await?
    }
}

struct Coordinator {
    state: SessionState,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    head: watch::Sender<FeedHead>,
    time: SharedTimeSource,
    persister: SnapshotPersister,
}

impl Coordinator {
    async fn run(mut self) {
        tracing::debug!("Coordinator for session {} started", self.state.token().short());

        while let Some(command) = self.commands.recv().await {
            let keep_running = self.handle(command);
            self.publish();
            if !keep_running {
                break;
            }
        }

        self.flush_snapshot();
        tracing::debug!("Coordinator for session {} stopped", self.state.token().short());
    }

    /// Apply one command. Returns `false` when the coordinator should stop.
    fn handle(&mut self, command: SessionCommand) -> bool {
        let now = self.time.now();
        match command {
            SessionCommand::Join {
                identity,
                role,
                reply,
            } => {
                let result = self.state.join(&identity, role, now);
                if result.is_ok() {
                    tracing::info!(
                        session = %self.state.token().short(),
                        user = %identity.user_id,
                        "Participant joined"
                    );
                }
                let _ = reply.send(result);
            }
            SessionCommand::Leave { user_id, reply } => {
                let result = self.state.leave(&user_id, now);
                if result.is_ok() {
                    tracing::info!(
                        session = %self.state.token().short(),
                        user = %user_id,
                        "Participant left"
                    );
                }
                let _ = reply.send(result);
            }
            SessionCommand::Submit { submission, reply } => {
                let result = self.state.submit_operation(submission, now);
                self.after_commit(&result);
                let _ = reply.send(result);
            }
            SessionCommand::Cursor {
                user_id,
                cursor,
                reply,
            } => {
                let _ = reply.send(self.state.submit_cursor(&user_id, cursor, now));
            }
            SessionCommand::Snapshot {
                user_id,
                base_version,
                text,
                reply,
            } => {
                let result = self.state.submit_snapshot(&user_id, base_version, &text, now);
                self.after_commit(&result);
                let _ = reply.send(result);
            }
            SessionCommand::ResolveConflict {
                user_id,
                conflict_id,
                text,
                reply,
            } => {
                let result = self.state.resolve_conflict(&user_id, conflict_id, &text, now);
                self.after_commit(&result);
                let _ = reply.send(result);
            }
            SessionCommand::PendingConflicts { reply } => {
                let _ = reply.send(self.state.pending_conflicts());
            }
            SessionCommand::AcquireLock { user_id, reply } => {
                let _ = reply.send(self.state.acquire_lock(&user_id, now));
            }
            SessionCommand::ReleaseLock { user_id, reply } => {
                let _ = reply.send(self.state.release_lock(&user_id, now));
            }
            SessionCommand::PostMessage {
                user_id,
                text,
                line_ref,
                reply,
            } => {
                let _ = reply.send(self.state.post_message(&user_id, &text, line_ref, now));
            }
            SessionCommand::RecentMessages { limit, reply } => {
                let _ = reply.send(self.state.recent_messages(limit));
            }
            SessionCommand::Heartbeat { user_id, reply } => {
                let _ = reply.send(self.state.heartbeat(&user_id, now));
            }
            SessionCommand::Collect {
                user_id,
                since_version,
                since_event,
                reply,
            } => {
                let result = self
                    .state
                    .heartbeat(&user_id, now)
                    .and_then(|()| self.state.collect_updates(since_version, since_event, now));
                let _ = reply.send(result);
            }
            SessionCommand::View { reply } => {
                let _ = reply.send(self.state.view(now));
            }
            SessionCommand::Export { reply } => {
                let _ = reply.send(self.state.export());
            }
            SessionCommand::End { user_id, reply } => {
                let result = match &user_id {
                    Some(user_id) => self.state.end(user_id, now),
                    None => Ok(self.state.force_end(now)),
                };
                if let Ok(true) = result {
                    tracing::info!(
                        session = %self.state.token().short(),
                        forced = user_id.is_none(),
                        "Session ended"
                    );
                    self.flush_snapshot();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Sweep {
                now,
                idle_grace,
                retention,
                reply,
            } => {
                let action = self.sweep(now, idle_grace, retention);
                let _ = reply.send(action);
                return action != SweepAction::Evicted;
            }
            SessionCommand::Shutdown { reply } => {
                self.flush_snapshot();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn sweep(
        &mut self,
        now: DateTime<Utc>,
        idle_grace: ChronoDuration,
        retention: ChronoDuration,
    ) -> SweepAction {
        let due = self.state.expire_if_due(now);
        let idle = !due && self.state.is_idle(now, idle_grace) && self.state.expire(now);
        if due || idle {
            tracing::info!(
                session = %self.state.token().short(),
                idle,
                "Session expired"
            );
            self.flush_snapshot();
            return SweepAction::Expired;
        }

        if self.state.is_evictable(now, retention) {
            tracing::info!(session = %self.state.token().short(), "Session evicted");
            self.flush_snapshot();
            return SweepAction::Evicted;
        }
        SweepAction::Kept
    }

    fn after_commit<T>(&mut self, result: &CollabResult<T>) {
        if result.is_ok() && self.state.snapshot_due() {
            let snapshot = self.state.take_snapshot(self.time.now());
            self.enqueue(snapshot);
        }
    }

    /// Queue a final snapshot if anything changed since the last one.
    fn flush_snapshot(&mut self) {
        if self.state.has_unsaved_changes() {
            let snapshot = self.state.take_snapshot(self.time.now());
            self.enqueue(snapshot);
        }
    }

    fn enqueue(&self, snapshot: crate::persistence::DocumentSnapshot) {
        if !self.persister.enqueue(snapshot) {
            tracing::warn!(
                session = %self.state.token().short(),
                "Snapshot persister is gone; snapshot dropped"
            );
        }
    }

    fn publish(&self) {
        let head = self.state.head();
        self.head.send_if_modified(|current| {
            if *current == head {
                false
            } else {
                *current = head;
                true
            }
        });
    }
}
