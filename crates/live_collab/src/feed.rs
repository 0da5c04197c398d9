//! Update feed and long-poll waiting.
//!
//! Every session publishes a small [`FeedHead`] through a `tokio::sync::watch`
//! channel after each state change. Long-poll waiters subscribe to that channel
//! and never touch the session's command queue while they wait, so any number
//! of them can park on one session without slowing down operation commits. A
//! single publish wakes all of them.
//!
//! Non-operation changes (cursor moves, joins, chat, ...) are recorded as
//! [`FeedEvent`]s with their own sequence number, kept in a bounded ring.

use crate::ids::UserId;
use crate::operation::CommittedOperation;
use crate::permissions::Role;
use crate::presence::{Cursor, ParticipantView};
use crate::session::{ChatMessage, LockInfo, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// The part of a session's state waiters key off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedHead {
    pub version: u64,
    pub event_seq: u64,
    pub status: SessionStatus,
}

impl FeedHead {
    /// Whether anything newer than the given cursors happened.
    pub fn has_news(&self, since_version: u64, since_event: u64) -> bool {
        self.version > since_version || self.event_seq > since_event || self.status.is_terminal()
    }
}

/// A non-operation change to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEventKind {
    CursorMoved {
        user_id: UserId,
        cursor: Cursor,
    },
    ParticipantJoined {
        user_id: UserId,
        display_name: String,
        role: Role,
    },
    ParticipantLeft {
        user_id: UserId,
    },
    LockChanged {
        lock: Option<LockInfo>,
    },
    ChatMessage {
        message: ChatMessage,
    },
    ConflictRaised {
        conflict_id: Uuid,
        raised_by: UserId,
    },
    ConflictResolved {
        conflict_id: Uuid,
        resolved_by: UserId,
    },
    StatusChanged {
        status: SessionStatus,
    },
}

/// A sequenced feed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: FeedEventKind,
}

/// Bounded history of feed events.
///
/// Sequence numbers start at 1 and never repeat; the oldest events are dropped
/// once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct EventRing {
    events: VecDeque<FeedEvent>,
    capacity: usize,
    last_seq: u64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            last_seq: 0,
        }
    }

    /// Append an event and return its sequence number.
    pub fn push(&mut self, kind: FeedEventKind, at: DateTime<Utc>) -> u64 {
        self.last_seq += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(FeedEvent {
            seq: self.last_seq,
            at,
            kind,
        });
        self.last_seq
    }

    /// Events with `seq > since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<FeedEvent> {
        let skip = self.events.partition_point(|e| e.seq <= since);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Sequence number of the newest event, or 0 if none was ever pushed.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Parameters of a long-poll request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateQuery {
    /// Newest version the client has applied
    pub since_version: u64,
    /// Newest feed event the client has seen; `None` means "only new ones"
    pub since_event: Option<u64>,
    /// How long to wait; `None` uses the configured default
    pub timeout: Option<Duration>,
}

impl UpdateQuery {
    pub fn since(version: u64) -> Self {
        Self {
            since_version: version,
            ..Default::default()
        }
    }

    pub fn with_events_since(mut self, seq: u64) -> Self {
        self.since_event = Some(seq);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Everything a client needs to catch up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Session version after the returned operations
    pub version: u64,
    /// Newest feed event sequence number
    pub event_seq: u64,
    pub operations: Vec<CommittedOperation>,
    pub events: Vec<FeedEvent>,
    pub participants: Vec<ParticipantView>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub lock: Option<LockInfo>,
}

impl UpdateBatch {
    /// Whether the batch carries no operations and no events.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.events.is_empty()
    }
}

/// How a wait on the feed ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Something newer than the cursors is available
    Ready,
    /// Nothing happened before the deadline
    TimedOut,
    /// The session's coordinator is gone
    Closed,
}

/// Park until the feed reports news past `since_version`/`since_event`.
///
/// Cancel-safe: dropping the future simply stops waiting.
pub async fn wait_for_news(
    rx: &mut watch::Receiver<FeedHead>,
    since_version: u64,
    since_event: u64,
    timeout: Duration,
) -> WaitOutcome {
    let wait = rx.wait_for(|head| head.has_news(since_version, since_event));
    match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(_)) => WaitOutcome::Ready,
        Ok(Err(_)) => WaitOutcome::Closed,
        Err(_) => WaitOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(version: u64, event_seq: u64) -> FeedHead {
        FeedHead {
            version,
            event_seq,
            status: SessionStatus::Active,
        }
    }

    fn left(user: &str) -> FeedEventKind {
        FeedEventKind::ParticipantLeft {
            user_id: UserId::from(user),
        }
    }

    #[test]
    fn test_has_news() {
        assert!(!head(3, 7).has_news(3, 7));
        assert!(head(4, 7).has_news(3, 7));
        assert!(head(3, 8).has_news(3, 7));
        let ended = FeedHead {
            status: SessionStatus::Ended,
            ..head(3, 7)
        };
        assert!(ended.has_news(3, 7));
    }

    #[test]
    fn test_event_ring_is_bounded() {
        let mut ring = EventRing::new(3);
        let now = Utc::now();
        for i in 0..5 {
            ring.push(left(&format!("u{i}")), now);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.last_seq(), 5);
        let seqs: Vec<u64> = ring.since(0).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        let seqs: Vec<u64> = ring.since(4).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5]);
        assert!(ring.since(5).is_empty());
    }

    #[test]
    fn test_event_serde_shape() {
        let event = FeedEvent {
            seq: 9,
            at: Utc::now(),
            kind: FeedEventKind::CursorMoved {
                user_id: UserId::from("ada"),
                cursor: Cursor::new(2, 4),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cursor_moved");
        assert_eq!(json["seq"], 9);
        assert_eq!(json["cursor"]["line"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_tx, mut rx) = watch::channel(head(1, 0));
        let outcome = wait_for_news(&mut rx, 1, 0, Duration::from_millis(500)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_behind() {
        let (_tx, mut rx) = watch::channel(head(5, 0));
        let outcome = wait_for_news(&mut rx, 2, 0, Duration::from_secs(5)).await;
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn test_publish_wakes_all_waiters() {
        let (tx, rx) = watch::channel(head(1, 0));
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let mut rx = rx.clone();
            waiters.push(tokio::spawn(async move {
                wait_for_news(&mut rx, 1, 0, Duration::from_secs(10)).await
            }));
        }
        tokio::task::yield_now().await;
        tx.send_replace(head(2, 0));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), WaitOutcome::Ready);
        }
    }

    #[tokio::test]
    async fn test_wait_reports_closed() {
        let (tx, mut rx) = watch::channel(head(1, 0));
        drop(tx);
        let outcome = wait_for_news(&mut rx, 1, 0, Duration::from_secs(10)).await;
        assert_eq!(outcome, WaitOutcome::Closed);
    }
}
