//! Error types for the collaboration engine.

use crate::ids::{SessionToken, UserId};
use crate::merge::ConflictRecord;
use crate::session::SessionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for collaboration operations.
pub type CollabResult<T> = Result<T, CollabError>;

/// Errors that can occur while driving a collaboration session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// No session is registered under the token.
    #[error("Session not found: {0}")]
    NotFound(SessionToken),

    /// The session is past its expiry time or no longer active.
    #[error("Session expired: {0}")]
    Expired(SessionToken),

    /// The session no longer accepts mutations.
    #[error("Session {token} is closed ({status:?})")]
    SessionClosed {
        token: SessionToken,
        status: SessionStatus,
    },

    /// The caller's role does not allow the request.
    #[error("Forbidden for user {user_id}: {reason}")]
    Forbidden { user_id: UserId, reason: String },

    /// The client's base version cannot be rebased against the retained log.
    ///
    /// The client must discard its pending edits and resync from `document`.
    #[error(
        "Version conflict: base version {base_version} is outside the retained window \
         (oldest available {oldest_available}, current {current_version})"
    )]
    VersionConflict {
        base_version: u64,
        oldest_available: u64,
        current_version: u64,
        document: String,
    },

    /// A three-way merge found concurrent divergent edits.
    #[error("Merge conflict: {}", .0.reason)]
    MergeConflict(Box<ConflictRecord>),

    /// The user has never joined the session.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(UserId),

    /// The session already holds its maximum number of active participants.
    #[error("Session is full (max: {0})")]
    SessionFull(usize),

    /// Another participant holds the edit lock.
    #[error("Snippet is locked by {holder}")]
    Locked { holder: UserId },

    /// The request is malformed.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// No conflict record exists under the id.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(Uuid),

    /// The session's coordinator task has stopped.
    #[error("Session coordinator unavailable: {0}")]
    Unavailable(SessionToken),

    /// The snippet store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CollabError {
    /// Whether the error carries conflicting texts for a resolution UI.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CollabError::VersionConflict { .. } | CollabError::MergeConflict(_)
        )
    }

    /// Whether the error means the session can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CollabError::NotFound(_)
                | CollabError::Expired(_)
                | CollabError::SessionClosed { .. }
                | CollabError::Unavailable(_)
        )
    }

    pub(crate) fn forbidden(user_id: &UserId, reason: impl Into<String>) -> Self {
        CollabError::Forbidden {
            user_id: user_id.clone(),
            reason: reason.into(),
        }
    }
}

impl From<crate::persistence::StorageError> for CollabError {
    fn from(err: crate::persistence::StorageError) -> Self {
        CollabError::Storage(err.to_string())
    }
}
