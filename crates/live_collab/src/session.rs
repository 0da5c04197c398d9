//! Authoritative state of one collaboration session.
//!
//! [`SessionState`] is plain synchronous data. It is owned by exactly one
//! coordinator task (see [`crate::coordinator`]), which is what serialises
//! every mutation; nothing in here locks. All methods take the current time
//! as an argument so expiry rules can be exercised without a clock.

use crate::clock::VersionClock;
use crate::config::SessionConfig;
use crate::error::{CollabError, CollabResult};
use crate::feed::{EventRing, FeedEventKind, FeedHead, UpdateBatch};
use crate::ids::{DocumentId, Identity, SessionToken, UserId};
use crate::merge::{
    diff_to_operations, same_modulo_line_endings, three_way_merge, ConflictRecord, MergeOutcome,
};
use crate::operation::{CommittedOperation, Operation, Submission};
use crate::permissions::Role;
use crate::persistence::DocumentSnapshot;
use crate::presence::{Cursor, JoinKind, Participant, ParticipantView, Roster};
use crate::transform::rebase;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting joins and edits.
    Active,
    /// Closed by the host.
    Ended,
    /// Closed by the sweeper or by reaching its expiry time.
    Expired,
}

impl SessionStatus {
    /// Whether the session can never become active again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The exclusive edit lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: UserId,
    pub acquired_at: DateTime<Utc>,
}

/// A chat message posted to the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub author_id: UserId,
    pub display_name: String,
    pub text: String,
    /// Line of the snippet the message refers to
    pub line_ref: Option<u32>,
    pub sent_at: DateTime<Utc>,
}

/// Session metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub token: SessionToken,
    pub document_id: DocumentId,
    pub host_id: UserId,
    pub status: SessionStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// When the session became ended or expired
    pub ended_at: Option<DateTime<Utc>>,
}

/// Session metadata together with its participants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionMeta,
    pub participants: Vec<ParticipantView>,
}

/// Reply to a successful join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResult {
    pub view: SessionView,
    /// Current document text
    pub document: String,
    /// Version `document` corresponds to
    pub version: u64,
}

/// Reply to an accepted edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub committed_version: u64,
    /// The edit as committed, after transformation
    pub operations: Vec<Operation>,
}

/// Everything needed to rebuild a session after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionMeta,
    pub participants: Vec<Participant>,
    /// Retained window of the operation log, oldest first
    pub operations: Vec<CommittedOperation>,
    /// Document text at `session.version`
    pub document: String,
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub lock: Option<LockInfo>,
}

/// Mutable state owned by a session coordinator.
#[derive(Debug)]
pub struct SessionState {
    token: SessionToken,
    document_id: DocumentId,
    host_id: UserId,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,

    document: String,
    clock: VersionClock,
    /// Committed operations, oldest first, contiguous up to the current version
    log: VecDeque<CommittedOperation>,
    /// Full text at recent versions, for snapshot pushes
    history: VecDeque<(u64, String)>,
    roster: Roster,
    conflicts: Vec<ConflictRecord>,
    lock: Option<LockInfo>,
    messages: VecDeque<ChatMessage>,
    events: EventRing,
    config: SessionConfig,
    ops_since_snapshot: u64,
}

impl SessionState {
    /// Open a session on `document` with `host` as its first participant.
    pub fn new(
        token: SessionToken,
        document_id: DocumentId,
        host: &Identity,
        document: String,
        ttl: Duration,
        now: DateTime<Utc>,
        config: SessionConfig,
    ) -> Self {
        let mut roster = Roster::new().with_presence_timeout(config.presence_timeout());
        // An empty roster always has room
        let _ = roster.join(host, Role::Host, now, usize::MAX);

        let mut history = VecDeque::with_capacity(config.history_depth);
        history.push_back((0, document.clone()));

        Self {
            token,
            document_id,
            host_id: host.user_id.clone(),
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            last_activity_at: now,
            ended_at: None,
            document,
            clock: VersionClock::new(),
            log: VecDeque::new(),
            history,
            roster,
            conflicts: Vec::new(),
            lock: None,
            messages: VecDeque::new(),
            events: EventRing::new(config.event_buffer),
            config,
            ops_since_snapshot: 0,
        }
    }

    /// Rebuild a session from an exported record.
    pub fn restore(record: SessionRecord, config: SessionConfig) -> CollabResult<Self> {
        let SessionRecord {
            session,
            participants,
            operations,
            document,
            conflicts,
            messages,
            lock,
        } = record;

        let contiguous = operations
            .iter()
            .zip(operations.iter().skip(1))
            .all(|(a, b)| b.committed_version == a.committed_version + 1);
        let ends_at_version = operations
            .last()
            .map_or(true, |op| op.committed_version == session.version);
        if !contiguous || !ends_at_version {
            return Err(CollabError::InvalidOperation(format!(
                "session record {} has a gap in its operation log",
                session.token.short()
            )));
        }

        let mut log: VecDeque<CommittedOperation> = operations.into();
        while log.len() > config.max_retained_ops {
            log.pop_front();
        }
        let mut messages: VecDeque<ChatMessage> = messages.into();
        while messages.len() > config.message_history {
            messages.pop_front();
        }
        let mut history = VecDeque::with_capacity(config.history_depth);
        history.push_back((session.version, document.clone()));

        Ok(Self {
            token: session.token,
            document_id: session.document_id,
            host_id: session.host_id,
            status: session.status,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity_at: session.last_activity_at,
            ended_at: session.ended_at,
            document,
            clock: VersionClock::with_value(session.version),
            log,
            history,
            roster: Roster::from_participants(participants)
                .with_presence_timeout(config.presence_timeout()),
            conflicts,
            lock,
            messages,
            events: EventRing::new(config.event_buffer),
            config,
            ops_since_snapshot: 0,
        })
    }

    /// Export the full state.
    pub fn export(&self) -> SessionRecord {
        SessionRecord {
            session: self.meta(),
            participants: self.roster.iter().cloned().collect(),
            operations: self.log.iter().cloned().collect(),
            document: self.document.clone(),
            conflicts: self.conflicts.clone(),
            messages: self.messages.iter().cloned().collect(),
            lock: self.lock.clone(),
        }
    }

    // ========== Accessors ==========

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.clock.current()
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Oldest base version a submission may still name.
    pub fn oldest_available(&self) -> u64 {
        self.version() - self.log.len() as u64
    }

    pub fn head(&self) -> FeedHead {
        FeedHead {
            version: self.version(),
            event_seq: self.events.last_seq(),
            status: self.status,
        }
    }

    pub fn meta(&self) -> SessionMeta {
        SessionMeta {
            token: self.token.clone(),
            document_id: self.document_id.clone(),
            host_id: self.host_id.clone(),
            status: self.status,
            version: self.version(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity_at: self.last_activity_at,
            ended_at: self.ended_at,
        }
    }

    /// Metadata and roster as seen at `now`.
    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        SessionView {
            session: self.meta(),
            participants: self.roster.views(now),
        }
    }

    pub fn participant(&self, user_id: &UserId) -> Option<&Participant> {
        self.roster.get(user_id)
    }

    // ========== Lifecycle ==========

    /// Mark the session expired if its expiry time has passed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Active && now > self.expires_at {
            self.close(SessionStatus::Expired, now);
            return true;
        }
        false
    }

    /// Whether nobody is present and the session has been quiet for `grace`.
    pub fn is_idle(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.status == SessionStatus::Active
            && self.roster.is_empty_of_active(now)
            && now - self.last_activity_at > grace
    }

    /// Whether a closed session has been kept long enough to drop.
    pub fn is_evictable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match (self.status.is_terminal(), self.ended_at) {
            (true, Some(ended_at)) => now - ended_at > retention,
            (true, None) => true,
            _ => false,
        }
    }

    /// Transition to expired. Returns `false` if already closed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.close(SessionStatus::Expired, now);
        true
    }

    /// End the session on behalf of `user_id`. Only the host may end it;
    /// ending a closed session is a no-op returning `false`.
    pub fn end(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<bool> {
        let is_host = self
            .roster
            .get(user_id)
            .is_some_and(|p| p.role.can_end());
        if !is_host {
            return Err(CollabError::forbidden(user_id, "only the host may end the session"));
        }
        Ok(self.force_end(now))
    }

    /// End the session regardless of who asks.
    pub fn force_end(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.close(SessionStatus::Ended, now);
        true
    }

    fn close(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(now);
        if self.lock.take().is_some() {
            self.events.push(FeedEventKind::LockChanged { lock: None }, now);
        }
        self.events.push(FeedEventKind::StatusChanged { status }, now);
    }

    // ========== Participants ==========

    /// Add or reactivate a participant.
    ///
    /// Only the creator holds the host role; a user who joined before keeps
    /// the role first granted. The host is never turned away by the
    /// participant cap.
    pub fn join(
        &mut self,
        identity: &Identity,
        role: Role,
        now: DateTime<Utc>,
    ) -> CollabResult<JoinResult> {
        self.expire_if_due(now);
        if self.status.is_terminal() {
            return Err(CollabError::Expired(self.token.clone()));
        }
        if role == Role::Host && identity.user_id != self.host_id {
            return Err(CollabError::forbidden(
                &identity.user_id,
                "the host role belongs to the session creator",
            ));
        }

        let cap = if identity.user_id == self.host_id {
            usize::MAX
        } else {
            self.config.max_participants
        };
        let (kind, participant) = self.roster.join(identity, role, now, cap)?;
        let joined = FeedEventKind::ParticipantJoined {
            user_id: participant.user_id.clone(),
            display_name: participant.display_name.clone(),
            role: participant.role,
        };
        if kind != JoinKind::AlreadyActive {
            self.events.push(joined, now);
        }
        self.last_activity_at = now;

        Ok(JoinResult {
            view: self.view(now),
            document: self.document.clone(),
            version: self.version(),
        })
    }

    /// Mark a participant as away. The session itself stays.
    pub fn leave(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<()> {
        if self.roster.leave(user_id, now)? {
            if self.lock.as_ref().is_some_and(|l| &l.holder == user_id) {
                self.lock = None;
                self.events.push(FeedEventKind::LockChanged { lock: None }, now);
            }
            self.events.push(
                FeedEventKind::ParticipantLeft {
                    user_id: user_id.clone(),
                },
                now,
            );
        }
        Ok(())
    }

    /// Record that a participant is still polling. Strangers are refused.
    pub fn heartbeat(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<()> {
        if self.roster.get(user_id).is_none() {
            return Err(CollabError::forbidden(user_id, "not a participant of this session"));
        }
        self.roster.touch(user_id, now);
        Ok(())
    }

    /// Move a participant's cursor. Viewers may do this; the version and the
    /// operation log are never touched.
    pub fn submit_cursor(
        &mut self,
        user_id: &UserId,
        cursor: Cursor,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        self.ensure_open(now)?;
        self.roster.set_cursor(user_id, cursor, now)?;
        self.events.push(
            FeedEventKind::CursorMoved {
                user_id: user_id.clone(),
                cursor,
            },
            now,
        );
        Ok(())
    }

    // ========== Edits ==========

    /// Transform a submission against everything committed since its base
    /// version and append it to the log.
    pub fn submit_operation(
        &mut self,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> CollabResult<SubmitResult> {
        let Submission {
            author_id,
            base_version,
            operation,
        } = submission;

        self.ensure_editor(&author_id)?;
        self.ensure_open(now)?;
        self.ensure_unlocked(&author_id, now)?;
        operation.validate()?;
        self.ensure_in_window(base_version)?;

        let concurrent: Vec<Operation> = self
            .log
            .iter()
            .filter(|c| c.committed_version > base_version)
            .flat_map(|c| c.operations.iter().cloned())
            .collect();
        operation.check_bounds(self.length_at_base(&concurrent))?;
        let transformed = rebase(&[operation], &concurrent, true);

        let committed_version = self.commit(&author_id, base_version, transformed.clone(), now);
        Ok(SubmitResult {
            committed_version,
            operations: transformed,
        })
    }

    /// Accept a whole-document push made against `base_version`.
    ///
    /// The push is merged three ways against the text at `base_version` and
    /// the current text. A clean merge is committed as ordinary operations;
    /// divergence is stored as an unresolved conflict and returned as
    /// [`CollabError::MergeConflict`].
    pub fn submit_snapshot(
        &mut self,
        author_id: &UserId,
        base_version: u64,
        text: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<SubmitResult> {
        self.ensure_editor(author_id)?;
        self.ensure_open(now)?;
        self.ensure_unlocked(author_id, now)?;

        let original = self
            .history
            .iter()
            .find(|(version, _)| *version == base_version)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| CollabError::VersionConflict {
                base_version,
                oldest_available: self.history.front().map_or(0, |(v, _)| *v),
                current_version: self.version(),
                document: self.document.clone(),
            })?;

        match three_way_merge(&original, &self.document, text) {
            MergeOutcome::Merged { text: merged, .. } => {
                Ok(self.commit_text(author_id, &merged, now))
            }
            MergeOutcome::Conflict(record) => {
                let record = record.raised(author_id.clone(), base_version, now);
                tracing::info!(
                    session = %self.token.short(),
                    user = %author_id,
                    conflict = %record.id,
                    "Merge conflict on snapshot push"
                );
                self.events.push(
                    FeedEventKind::ConflictRaised {
                        conflict_id: record.id,
                        raised_by: author_id.clone(),
                    },
                    now,
                );
                self.conflicts.push(record.clone());
                Err(CollabError::MergeConflict(Box::new(record)))
            }
        }
    }

    /// Settle a conflict by committing the chosen text.
    pub fn resolve_conflict(
        &mut self,
        user_id: &UserId,
        conflict_id: Uuid,
        text: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<SubmitResult> {
        self.ensure_editor(user_id)?;
        self.ensure_open(now)?;
        self.ensure_unlocked(user_id, now)?;

        let index = self
            .conflicts
            .iter()
            .position(|c| c.id == conflict_id && !c.resolved)
            .ok_or(CollabError::ConflictNotFound(conflict_id))?;

        let result = self.commit_text(user_id, text, now);
        self.conflicts[index].resolve();
        self.events.push(
            FeedEventKind::ConflictResolved {
                conflict_id,
                resolved_by: user_id.clone(),
            },
            now,
        );
        Ok(result)
    }

    /// Conflicts still waiting for a decision.
    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    /// Commit the change from the current text to `text`. Commits nothing when
    /// they differ at most in line endings.
    fn commit_text(&mut self, author_id: &UserId, text: &str, now: DateTime<Utc>) -> SubmitResult {
        if same_modulo_line_endings(&self.document, text) {
            return SubmitResult {
                committed_version: self.version(),
                operations: Vec::new(),
            };
        }
        let operations = diff_to_operations(&self.document, text);
        let base_version = self.version();
        let committed_version = self.commit(author_id, base_version, operations.clone(), now);
        SubmitResult {
            committed_version,
            operations,
        }
    }

    fn commit(
        &mut self,
        author_id: &UserId,
        base_version: u64,
        operations: Vec<Operation>,
        now: DateTime<Utc>,
    ) -> u64 {
        let committed_version = self.clock.next();
        let committed = CommittedOperation {
            committed_version,
            author_id: author_id.clone(),
            base_version,
            operations,
            committed_at: now,
        };
        committed.apply(&mut self.document);

        tracing::debug!(
            session = %self.token.short(),
            author = %author_id,
            version = committed_version,
            base = base_version,
            "Committed operation"
        );

        self.log.push_back(committed);
        while self.log.len() > self.config.max_retained_ops {
            self.log.pop_front();
        }
        self.history
            .push_back((committed_version, self.document.clone()));
        while self.history.len() > self.config.history_depth {
            self.history.pop_front();
        }

        self.last_activity_at = now;
        self.roster.touch(author_id, now);
        self.ops_since_snapshot += 1;
        committed_version
    }

    // ========== Edit lock ==========

    /// Take the edit lock. A lock older than the configured TTL may be taken over.
    pub fn acquire_lock(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<LockInfo> {
        self.ensure_editor(user_id)?;
        self.ensure_open(now)?;
        self.ensure_unlocked(user_id, now)?;

        if let Some(lock) = &self.lock {
            if &lock.holder == user_id {
                return Ok(lock.clone());
            }
        }
        let lock = LockInfo {
            holder: user_id.clone(),
            acquired_at: now,
        };
        self.lock = Some(lock.clone());
        self.events.push(
            FeedEventKind::LockChanged {
                lock: Some(lock.clone()),
            },
            now,
        );
        Ok(lock)
    }

    /// Drop the edit lock. The holder or the host may release it.
    pub fn release_lock(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<()> {
        let Some(lock) = &self.lock else {
            return Ok(());
        };
        let is_host = self
            .roster
            .get(user_id)
            .is_some_and(|p| p.role.can_end());
        if &lock.holder != user_id && !is_host {
            return Err(CollabError::forbidden(user_id, "lock is held by another user"));
        }
        self.lock = None;
        self.events.push(FeedEventKind::LockChanged { lock: None }, now);
        Ok(())
    }

    pub fn lock(&self) -> Option<&LockInfo> {
        self.lock.as_ref()
    }

    // ========== Chat ==========

    pub fn post_message(
        &mut self,
        user_id: &UserId,
        text: &str,
        line_ref: Option<u32>,
        now: DateTime<Utc>,
    ) -> CollabResult<ChatMessage> {
        self.ensure_open(now)?;
        let author = self.roster.active(user_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CollabError::InvalidOperation("empty message".to_string()));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            author_id: user_id.clone(),
            display_name: author.display_name.clone(),
            text: text.to_string(),
            line_ref,
            sent_at: now,
        };
        self.messages.push_back(message.clone());
        while self.messages.len() > self.config.message_history {
            self.messages.pop_front();
        }
        self.events.push(
            FeedEventKind::ChatMessage {
                message: message.clone(),
            },
            now,
        );
        self.roster.touch(user_id, now);
        self.last_activity_at = now;
        Ok(message)
    }

    /// Up to `limit` most recent messages, oldest first.
    pub fn recent_messages(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    // ========== Feed ==========

    /// Everything committed after `since_version` and every event after
    /// `since_event`.
    pub fn collect_updates(
        &self,
        since_version: u64,
        since_event: u64,
        now: DateTime<Utc>,
    ) -> CollabResult<UpdateBatch> {
        if since_version < self.oldest_available() {
            return Err(CollabError::VersionConflict {
                base_version: since_version,
                oldest_available: self.oldest_available(),
                current_version: self.version(),
                document: self.document.clone(),
            });
        }

        Ok(UpdateBatch {
            version: self.version(),
            event_seq: self.events.last_seq(),
            operations: self
                .log
                .iter()
                .filter(|c| c.committed_version > since_version)
                .cloned()
                .collect(),
            events: self.events.since(since_event),
            participants: self.roster.views(now),
            last_activity_at: self.last_activity_at,
            status: self.status,
            lock: self.lock.clone(),
        })
    }

    // ========== Persistence ==========

    /// Whether enough commits accumulated since the last snapshot.
    pub fn snapshot_due(&self) -> bool {
        self.ops_since_snapshot >= self.config.snapshot_every_ops
    }

    /// Whether anything was committed since the last snapshot.
    pub fn has_unsaved_changes(&self) -> bool {
        self.ops_since_snapshot > 0
    }

    /// Take a snapshot of the current text and reset the commit counter.
    pub fn take_snapshot(&mut self, now: DateTime<Utc>) -> DocumentSnapshot {
        self.ops_since_snapshot = 0;
        DocumentSnapshot {
            document_id: self.document_id.clone(),
            session: Some(self.token.clone()),
            version: self.version(),
            text: self.document.clone(),
            taken_at: now,
        }
    }

    // ========== Guards ==========

    fn ensure_open(&mut self, now: DateTime<Utc>) -> CollabResult<()> {
        self.expire_if_due(now);
        if self.status.is_terminal() {
            return Err(CollabError::SessionClosed {
                token: self.token.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_editor(&self, user_id: &UserId) -> CollabResult<()> {
        match self.roster.get(user_id) {
            None => Err(CollabError::forbidden(user_id, "not a participant of this session")),
            Some(p) if !p.is_active() => {
                Err(CollabError::forbidden(user_id, "participant has left the session"))
            }
            Some(p) if !p.role.can_edit() => {
                Err(CollabError::forbidden(user_id, "viewers cannot edit"))
            }
            Some(_) => Ok(()),
        }
    }

    fn ensure_unlocked(&self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<()> {
        match &self.lock {
            Some(lock)
                if &lock.holder != user_id && now - lock.acquired_at < self.config.lock_ttl() =>
            {
                Err(CollabError::Locked {
                    holder: lock.holder.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Character length of the document at the base of `concurrent`, the
    /// operations committed since.
    fn length_at_base(&self, concurrent: &[Operation]) -> usize {
        concurrent
            .iter()
            .rev()
            .fold(self.document.chars().count(), |len, op| {
                len.saturating_add(op.deleted_len())
                    .saturating_sub(op.inserted_len())
            })
    }

    fn ensure_in_window(&self, base_version: u64) -> CollabResult<()> {
        let current = self.version();
        let oldest = self.oldest_available();
        if base_version < oldest || base_version > current {
            return Err(CollabError::VersionConflict {
                base_version,
                oldest_available: oldest,
                current_version: current,
                document: self.document.clone(),
            });
        }
        Ok(())
    }
}
