//! Whole-document three-way merge.
//!
//! Used when a client cannot express its pending edits as operations against a
//! known version, e.g. after a long offline stretch or a full-document paste.
//!
//! # Merge rules
//!
//! - **No change**: all three texts equal, the server text stands.
//! - **Fast-forward**: only one side differs from the ancestor, that side wins.
//! - **Convergent edit**: both sides made the same change.
//! - **Divergence**: anything else is refused with a [`ConflictRecord`]. No
//!   line-level merge is attempted; a guessed merge of source code can silently
//!   drop edits.

use crate::error::{CollabError, CollabResult};
use crate::ids::UserId;
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Texts of a merge that could not be reconciled automatically.
///
/// A record stays in its session until a participant resolves it explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    /// Last common ancestor the client saw
    pub base: String,
    /// Server document at merge time
    pub yours: String,
    /// Client's proposed document
    pub theirs: String,
    pub resolved: bool,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// Version the client's ancestor corresponds to, when known
    pub base_version: Option<u64>,
    /// Participant whose push raised the conflict
    pub raised_by: Option<UserId>,
}

impl ConflictRecord {
    /// Create an unresolved record.
    pub fn new(
        base: impl Into<String>,
        yours: impl Into<String>,
        theirs: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            base: base.into(),
            yours: yours.into(),
            theirs: theirs.into(),
            resolved: false,
            reason: reason.into(),
            created_at: Utc::now(),
            base_version: None,
            raised_by: None,
        }
    }

    /// Attach the session context of the push that raised the conflict.
    pub fn raised(mut self, by: UserId, base_version: u64, at: DateTime<Utc>) -> Self {
        self.raised_by = Some(by);
        self.base_version = Some(base_version);
        self.created_at = at;
        self
    }

    /// Mark the conflict as handled.
    pub fn resolve(&mut self) {
        self.resolved = true;
    }
}

/// Which input a successful merge took its text from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeSource {
    /// Nothing changed anywhere
    Unchanged,
    /// Only the server side changed
    Yours,
    /// Only the client side changed
    Theirs,
    /// Both sides made the same change
    Convergent,
}

/// Result of a three-way merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { text: String, source: MergeSource },
    Conflict(ConflictRecord),
}

impl MergeOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeOutcome::Conflict(_))
    }

    /// The merged text, or [`CollabError::MergeConflict`].
    pub fn into_result(self) -> CollabResult<String> {
        match self {
            MergeOutcome::Merged { text, .. } => Ok(text),
            MergeOutcome::Conflict(record) => Err(CollabError::MergeConflict(Box::new(record))),
        }
    }
}

/// Merge `theirs` (client) into `yours` (server) given their common `original`.
///
/// Inputs are compared with line endings normalised to `\n`; the text
/// returned is the winning input exactly as given.
pub fn three_way_merge(original: &str, yours: &str, theirs: &str) -> MergeOutcome {
    let o = normalize_line_endings(original);
    let y = normalize_line_endings(yours);
    let t = normalize_line_endings(theirs);

    let (text, source) = if o == y && o == t {
        (yours, MergeSource::Unchanged)
    } else if o == y {
        (theirs, MergeSource::Theirs)
    } else if o == t {
        (yours, MergeSource::Yours)
    } else if y == t {
        (yours, MergeSource::Convergent)
    } else {
        return MergeOutcome::Conflict(ConflictRecord::new(
            original,
            yours,
            theirs,
            "Concurrent edits detected. Manual resolution required.",
        ));
    };

    MergeOutcome::Merged {
        text: text.to_string(),
        source,
    }
}

/// Whether two texts differ only in their line endings, if at all.
pub fn same_modulo_line_endings(a: &str, b: &str) -> bool {
    a == b || normalize_line_endings(a) == normalize_line_endings(b)
}

/// Replace Windows line endings with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Express the change from `from` to `to` as at most one delete followed by one
/// insert, covering the span between the common prefix and common suffix.
pub fn diff_to_operations(from: &str, to: &str) -> Vec<Operation> {
    let from_chars: Vec<char> = from.chars().collect();
    let to_chars: Vec<char> = to.chars().collect();

    let prefix = from_chars
        .iter()
        .zip(&to_chars)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = from_chars.len().min(to_chars.len()) - prefix;
    let suffix = from_chars
        .iter()
        .rev()
        .zip(to_chars.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let removed = from_chars.len() - prefix - suffix;
    let inserted: String = to_chars[prefix..to_chars.len() - suffix].iter().collect();

    let mut ops = Vec::with_capacity(2);
    if removed > 0 {
        ops.push(Operation::delete(prefix, removed));
    }
    if !inserted.is_empty() {
        ops.push(Operation::insert(prefix, inserted));
    }
    ops
}
