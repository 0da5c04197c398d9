//! Real-time collaborative editing sessions for code snippets.
//!
//! A host opens a session on a snippet and shares its token. Participants
//! join as editors or viewers, submit character-range operations against a
//! base version, and long-poll for everything committed since the version
//! they last saw. Concurrent edits are reconciled with operational
//! transformation; whole-document pushes fall back to a three-way merge.
//!
//! # Modules
//!
//! - `clock`: Version counter and injectable time sources
//! - `ids`: Session tokens, user and document identifiers
//! - `invite`: Signed invite links
//! - `permissions`: Participant roles
//! - `operation`: Insert/delete operations and committed log entries
//! - `transform`: Operational transformation of concurrent operations
//! - `merge`: Three-way merge fallback and conflict records
//! - `presence`: Participant roster, cursors and colors
//! - `feed`: Update batches, feed events and the long-poll wait
//! - `session`: Authoritative per-session state
//! - `coordinator`: The task that serialises each session's mutations
//! - `store`: Registry of live sessions
//! - `lifecycle`: Creation, ending, expiry and the sweeper
//! - `persistence`: Snapshot writes to the snippet store
//! - `config`: Engine configuration
//! - `engine`: The façade binding it all together
//! - `error`: Error types for the crate
//!
//! # Example
//!
//! ```
//! use live_collab::{apply_all, rebase, Operation};
//!
//! // Two users edit "hello" concurrently from the same base version
//! let committed = Operation::insert(0, "Oh, ");
//! let mine = Operation::insert(5, "!");
//!
//! // Mine is rebased over what the server already committed
//! let rebased = rebase(&[mine], &[committed.clone()], true);
//!
//! let mut text = String::from("hello");
//! apply_all(&mut text, [&committed]);
//! apply_all(&mut text, &rebased);
//! assert_eq!(text, "Oh, hello!");
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ids;
pub mod invite;
pub mod lifecycle;
pub mod merge;
pub mod operation;
pub mod permissions;
pub mod persistence;
pub mod presence;
pub mod session;
pub mod store;
pub mod transform;

// Re-export commonly used types
pub use clock::{ManualTimeSource, SharedTimeSource, SystemTimeSource, TimeSource, VersionClock};
pub use config::{
    ConfigError, EngineConfig, FeedConfig, InviteConfig, PersistenceConfig, SessionConfig,
    SweepConfig,
};
pub use coordinator::{SessionHandle, SweepAction};
pub use engine::CollabEngine;
pub use error::{CollabError, CollabResult};
pub use feed::{FeedEvent, FeedEventKind, UpdateBatch, UpdateQuery};
pub use ids::{DocumentId, Identity, SessionToken, UserId};
pub use invite::{InviteClaims, InviteError, InviteSigner};
pub use lifecycle::{LifecycleManager, ShutdownHandle, SweepReport};
pub use merge::{three_way_merge, ConflictRecord, MergeOutcome, MergeSource};
pub use operation::{apply_all, CommittedOperation, Operation, OperationKind, Submission};
pub use permissions::Role;
pub use persistence::{
    DocumentSnapshot, FileSnippetStore, MemorySnippetStore, SnapshotPersister, SnippetStore,
    StorageError, StorageResult,
};
pub use presence::{Cursor, ParticipantView};
pub use session::{
    ChatMessage, JoinResult, LockInfo, SessionMeta, SessionRecord, SessionStatus, SessionView,
    SubmitResult,
};
pub use store::SessionStore;
pub use transform::{rebase, transform};
