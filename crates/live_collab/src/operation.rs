//! Edit operations for collaborative text editing.
//!
//! Positions are offsets in Unicode scalar values (`char`s), never bytes, so an
//! operation authored by any client can be applied without splitting a
//! multi-byte character.

use crate::error::{CollabError, CollabResult};
use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The payload of an edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert `text` at the position.
    Insert { text: String },
    /// Remove `length` characters starting at the position.
    Delete { length: usize },
}

/// A primitive insert or delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Character offset in the document the operation was authored against.
    pub position: usize,
}

impl Operation {
    /// Create an insert operation.
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Insert { text: text.into() },
            position,
        }
    }

    /// Create a delete operation.
    pub fn delete(position: usize, length: usize) -> Self {
        Self {
            kind: OperationKind::Delete { length },
            position,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self.kind, OperationKind::Insert { .. })
    }

    /// Number of characters inserted, or zero for deletes.
    pub fn inserted_len(&self) -> usize {
        match &self.kind {
            OperationKind::Insert { text } => text.chars().count(),
            OperationKind::Delete { .. } => 0,
        }
    }

    /// Number of characters deleted, or zero for inserts.
    pub fn deleted_len(&self) -> usize {
        match &self.kind {
            OperationKind::Insert { .. } => 0,
            OperationKind::Delete { length } => *length,
        }
    }

    /// Whether applying the operation leaves any document unchanged.
    pub fn is_noop(&self) -> bool {
        match &self.kind {
            OperationKind::Insert { text } => text.is_empty(),
            OperationKind::Delete { length } => *length == 0,
        }
    }

    /// Reject operations a client should never submit.
    pub fn validate(&self) -> CollabResult<()> {
        if self.is_noop() {
            return Err(CollabError::InvalidOperation(
                "empty insert or zero-length delete".to_string(),
            ));
        }
        Ok(())
    }

    /// Reject operations reaching past the end of a document of `len`
    /// characters.
    pub fn check_bounds(&self, len: usize) -> CollabResult<()> {
        let end = self.position.checked_add(self.deleted_len());
        match end {
            Some(end) if end <= len => Ok(()),
            _ => Err(CollabError::InvalidOperation(format!(
                "operation at {} spanning {} characters exceeds document length {}",
                self.position,
                self.deleted_len(),
                len
            ))),
        }
    }

    /// Apply this operation to `text`, clamping offsets past the end.
    pub fn apply(&self, text: &mut String) {
        let char_len = text.chars().count();
        let start = self.position.min(char_len);
        match &self.kind {
            OperationKind::Insert { text: inserted } => {
                let at = byte_offset(text, start);
                text.insert_str(at, inserted);
            }
            OperationKind::Delete { length } => {
                let end = start.saturating_add(*length).min(char_len);
                if end > start {
                    let from = byte_offset(text, start);
                    let to = byte_offset(text, end);
                    text.replace_range(from..to, "");
                }
            }
        }
    }
}

/// Apply a sequence of operations in order.
pub fn apply_all<'a>(text: &mut String, ops: impl IntoIterator<Item = &'a Operation>) {
    for op in ops {
        op.apply(text);
    }
}

/// Byte offset of the `char_index`-th character, or the string length.
fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// An operation as submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub author_id: UserId,
    /// Session version the author believed current when authoring.
    pub base_version: u64,
    pub operation: Operation,
}

/// An accepted, immutable entry of the session's operation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOperation {
    /// Version this operation produced.
    pub committed_version: u64,
    pub author_id: UserId,
    pub base_version: u64,
    /// The submission after transformation against every concurrent commit.
    ///
    /// Usually a single edit. A delete split around a concurrent insert yields
    /// two, and a delete already covered by earlier deletes becomes a
    /// zero-length delete.
    pub operations: Vec<Operation>,
    pub committed_at: DateTime<Utc>,
}

impl CommittedOperation {
    /// Apply the committed edits to `text`.
    pub fn apply(&self, text: &mut String) {
        apply_all(text, &self.operations);
    }

    /// Whether the commit left the document unchanged.
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(Operation::is_noop)
    }
}
