//! End-to-end tests of the collaboration engine.
//!
//! Each test drives a fresh engine through its public API the way a transport
//! layer would: create a session, join participants, submit edits and poll
//! for updates.

use live_collab::{
    CollabEngine, CollabError, Cursor, DocumentId, EngineConfig, FeedEventKind, FileSnippetStore,
    Identity, InviteConfig, ManualTimeSource, MemorySnippetStore, Operation, Role, SessionConfig,
    SessionStatus, SessionToken, SnippetStore, TimeSource, UpdateQuery, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SNIPPET: &str = "snippet-1";

/// Test harness around one engine with a manual clock
struct Harness {
    engine: Arc<CollabEngine>,
    time: ManualTimeSource,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let snippets = Arc::new(MemorySnippetStore::with_document(SNIPPET, "fn main() {}"));
        let time = ManualTimeSource::starting_now();
        let engine =
            CollabEngine::with_time_source(config, snippets, Arc::new(time.clone())).unwrap();
        Self {
            engine: Arc::new(engine),
            time,
        }
    }

    /// Create a session hosted by "host" and join the given editors.
    async fn session_with(&self, editors: &[&str]) -> SessionToken {
        let view = self
            .engine
            .create_session(DocumentId::from(SNIPPET), Identity::new("host", "Hana"), None)
            .await
            .unwrap();
        let token = view.session.token;
        for name in editors {
            self.engine
                .join(&token, Identity::new(*name, *name), Role::Editor)
                .await
                .unwrap();
        }
        token
    }

    async fn document(&self, token: &SessionToken) -> String {
        self.engine
            .export_session(token)
            .await
            .unwrap()
            .document
    }
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

// ========== Operations ==========

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_get_distinct_gap_free_versions() {
    let h = Harness::with_config(EngineConfig::default().with_max_participants(16));
    let writers: Vec<String> = (0..8).map(|i| format!("writer-{i}")).collect();
    let names: Vec<&str> = writers.iter().map(String::as_str).collect();
    let token = h.session_with(&names).await;

    let mut tasks = Vec::new();
    for writer in writers {
        let engine = Arc::clone(&h.engine);
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            let mut versions = Vec::new();
            for _ in 0..10 {
                let result = engine
                    .submit_operation(&token, user(&writer), Operation::insert(0, "x"), 0)
                    .await
                    .unwrap();
                versions.push(result.committed_version);
            }
            versions
        }));
    }

    let mut all = BTreeSet::new();
    for task in tasks {
        let versions = task.await.unwrap();
        // Each writer sees its own commits in increasing order
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        all.extend(versions);
    }
    assert_eq!(all, (1..=80).collect::<BTreeSet<u64>>());

    let record = h.engine.export_session(&token).await.unwrap();
    assert_eq!(record.session.version, 80);
    assert_eq!(record.document, format!("{}fn main() {{}}", "x".repeat(80)));
}

#[tokio::test]
async fn test_concurrent_inserts_are_transformed() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    // Both edit version 0: host appends a comment, bob renames the function
    h.engine
        .submit_operation(&token, user("host"), Operation::insert(12, " // entry"), 0)
        .await
        .unwrap();
    let result = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(3, "real_"), 0)
        .await
        .unwrap();

    assert_eq!(result.committed_version, 2);
    assert_eq!(h.document(&token).await, "fn real_main() {} // entry");
}

#[tokio::test]
async fn test_duplicate_delete_is_a_noop() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    // Both remove "main" from the same base
    h.engine
        .submit_operation(&token, user("host"), Operation::delete(3, 4), 0)
        .await
        .unwrap();
    let result = h
        .engine
        .submit_operation(&token, user("bob"), Operation::delete(3, 4), 0)
        .await
        .unwrap();

    assert_eq!(result.committed_version, 2);
    assert!(result.operations.iter().all(Operation::is_noop));
    assert_eq!(h.document(&token).await, "fn () {}");
}

#[tokio::test]
async fn test_viewer_cannot_edit_but_can_move_cursor() {
    let h = Harness::new();
    let token = h.session_with(&[]).await;
    h.engine
        .join(&token, Identity::new("vic", "Vic"), Role::Viewer)
        .await
        .unwrap();

    let err = h
        .engine
        .submit_operation(&token, user("vic"), Operation::insert(0, "x"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CollabError::Forbidden { .. }));

    h.engine
        .submit_cursor(&token, user("vic"), Cursor::new(1, 4))
        .await
        .unwrap();
    let view = h.engine.session_view(&token).await.unwrap();
    assert_eq!(view.session.version, 0);
    let vic = view
        .participants
        .iter()
        .find(|p| p.user_id == user("vic"))
        .unwrap();
    assert_eq!(vic.cursor, Cursor::new(1, 4));
}

#[tokio::test]
async fn test_stale_base_version_reports_conflict() {
    let config = EngineConfig::default().with_session(SessionConfig {
        max_retained_ops: 2,
        ..SessionConfig::default()
    });
    let h = Harness::with_config(config);
    let token = h.session_with(&["bob"]).await;

    for base in 0..3 {
        h.engine
            .submit_operation(&token, user("host"), Operation::insert(0, "/"), base)
            .await
            .unwrap();
    }

    let err = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "x"), 0)
        .await
        .unwrap_err();
    match err {
        CollabError::VersionConflict {
            oldest_available,
            current_version,
            document,
            ..
        } => {
            assert_eq!(oldest_available, 1);
            assert_eq!(current_version, 3);
            assert_eq!(document, "///fn main() {}");
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }

    // A base from the future is refused too
    let err = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "x"), 9)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_out_of_range_edit_keeps_session_usable() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;
    h.engine
        .submit_operation(&token, user("host"), Operation::insert(0, "// "), 0)
        .await
        .unwrap();

    let err = h
        .engine
        .submit_operation(&token, user("bob"), Operation::delete(2, usize::MAX), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, CollabError::InvalidOperation(_)));

    let result = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(12, "\n"), 0)
        .await
        .unwrap();
    assert_eq!(result.committed_version, 2);
    assert_eq!(h.document(&token).await, "// fn main() {}\n");
}

// ========== Lifecycle ==========

#[tokio::test]
async fn test_expired_session_refuses_joins_and_is_swept() {
    let h = Harness::new();
    let view = h
        .engine
        .create_session(
            DocumentId::from(SNIPPET),
            Identity::new("host", "Hana"),
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    let token = view.session.token;

    h.time.advance(chrono::Duration::seconds(2));

    let err = h
        .engine
        .join(&token, Identity::new("bob", "Bob"), Role::Editor)
        .await
        .unwrap_err();
    assert_eq!(err, CollabError::Expired(token.clone()));

    h.engine.sweep(h.time.now()).await;
    let view = h.engine.session_view(&token).await.unwrap();
    assert_eq!(view.session.status, SessionStatus::Expired);
}

#[tokio::test]
async fn test_sweep_counts_ttl_expiries() {
    let h = Harness::new();
    for ttl in [1, 1, 3_600] {
        h.engine
            .create_session(
                DocumentId::from(SNIPPET),
                Identity::new("host", "Hana"),
                Some(Duration::from_secs(ttl)),
            )
            .await
            .unwrap();
    }

    h.time.advance(chrono::Duration::seconds(2));
    let report = h.engine.sweep(h.time.now()).await;
    assert_eq!(report.examined, 3);
    assert_eq!(report.expired, 2);
    assert_eq!(report.failed, 0);

    // Already expired sessions are not counted twice
    let report = h.engine.sweep(h.time.now()).await;
    assert_eq!(report.expired, 0);
}

#[tokio::test]
async fn test_ended_session_is_closed_to_edits() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    let err = h.engine.end(&token, user("bob")).await.unwrap_err();
    assert!(matches!(err, CollabError::Forbidden { .. }));

    assert!(h.engine.end(&token, user("host")).await.unwrap());
    assert!(!h.engine.end(&token, user("host")).await.unwrap());

    let err = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "x"), 0)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CollabError::SessionClosed {
            token: token.clone(),
            status: SessionStatus::Ended,
        }
    );
}

#[tokio::test]
async fn test_session_full() {
    let h = Harness::with_config(EngineConfig::default().with_max_participants(2));
    let token = h.session_with(&["bob"]).await;

    let err = h
        .engine
        .join(&token, Identity::new("carol", "Carol"), Role::Editor)
        .await
        .unwrap_err();
    assert_eq!(err, CollabError::SessionFull(2));

    // Leaving frees the seat
    h.engine.leave(&token, user("bob")).await.unwrap();
    h.engine
        .join(&token, Identity::new("carol", "Carol"), Role::Editor)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_host_is_never_locked_out() {
    let h = Harness::with_config(EngineConfig::default().with_max_participants(2));
    let token = h.session_with(&["bob"]).await;
    h.engine.leave(&token, user("host")).await.unwrap();
    h.engine
        .join(&token, Identity::new("carol", "Carol"), Role::Editor)
        .await
        .unwrap();

    let joined = h
        .engine
        .join(&token, Identity::new("host", "Hana"), Role::Host)
        .await
        .unwrap();
    assert_eq!(joined.view.participants.iter().filter(|p| p.active).count(), 3);
    assert!(h.engine.end(&token, user("host")).await.unwrap());
}

#[tokio::test]
async fn test_silent_participant_frees_a_seat() {
    let h = Harness::with_config(EngineConfig::default().with_max_participants(2));
    let token = h.session_with(&["bob"]).await;

    h.time.advance(chrono::Duration::seconds(61));
    h.engine
        .submit_cursor(&token, user("host"), Cursor::new(1, 0))
        .await
        .unwrap();

    let view = h.engine.session_view(&token).await.unwrap();
    let bob = view.participants.iter().find(|p| p.user_id == user("bob")).unwrap();
    assert!(!bob.active);

    h.engine
        .join(&token, Identity::new("carol", "Carol"), Role::Editor)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invite_links() {
    let invite_config = InviteConfig {
        secret: Some("shared-app-key".to_string()),
        default_ttl_secs: 3_600,
    };
    let h = Harness::with_config(EngineConfig::default().with_invite(invite_config.clone()));
    let token = h.session_with(&[]).await;

    let invite = h
        .engine
        .create_invite(&token, user("host"), Role::Viewer, None)
        .await
        .unwrap();
    let joined = h
        .engine
        .join_with_invite(&invite, Identity::new("val", "Val"))
        .await
        .unwrap();
    let val = joined.view.participants.iter().find(|p| p.user_id == user("val")).unwrap();
    assert_eq!(val.role, Role::Viewer);

    // An engine with a different key refuses the link
    let other = Harness::new();
    let err = other
        .engine
        .join_with_invite(&invite, Identity::new("eve", "Eve"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollabError::Forbidden { .. }));

    h.time.advance(chrono::Duration::seconds(3_601));
    let err = h
        .engine
        .join_with_invite(&invite, Identity::new("bob", "Bob"))
        .await
        .unwrap_err();
    assert_eq!(err, CollabError::Expired(token));
}

#[tokio::test]
async fn test_rejoin_returns_current_document() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;
    h.engine.leave(&token, user("bob")).await.unwrap();
    h.engine
        .submit_operation(&token, user("host"), Operation::insert(0, "// v2\n"), 0)
        .await
        .unwrap();

    let joined = h
        .engine
        .join(&token, Identity::new("bob", "Bob"), Role::Viewer)
        .await
        .unwrap();
    assert_eq!(joined.version, 1);
    assert_eq!(joined.document, "// v2\nfn main() {}");
    let bob = joined
        .view
        .participants
        .iter()
        .find(|p| p.user_id == user("bob"))
        .unwrap();
    assert!(bob.active);
    assert_eq!(bob.role, Role::Editor);
}

// ========== Long polling ==========

#[tokio::test]
async fn test_long_poll_fans_out_one_commit() {
    let h = Harness::new();
    let token = h.session_with(&["a", "b", "c"]).await;

    let mut waiters = Vec::new();
    for name in ["a", "b", "c"] {
        let engine = Arc::clone(&h.engine);
        let token = token.clone();
        waiters.push(tokio::spawn(async move {
            engine
                .wait_for_updates(
                    &token,
                    user(name),
                    UpdateQuery::since(0).with_timeout(Duration::from_secs(10)),
                )
                .await
        }));
    }
    tokio::task::yield_now().await;

    h.engine
        .submit_operation(&token, user("host"), Operation::insert(0, "#"), 0)
        .await
        .unwrap();

    let mut batches = Vec::new();
    for waiter in waiters {
        batches.push(waiter.await.unwrap().unwrap());
    }
    for batch in &batches {
        assert_eq!(batch.version, 1);
        assert_eq!(batch.operations.len(), 1);
        assert_eq!(batch.operations[0].author_id, user("host"));
    }
    assert_eq!(batches[0].operations, batches[1].operations);
    assert_eq!(batches[1].operations, batches[2].operations);
}

#[tokio::test(start_paused = true)]
async fn test_long_poll_times_out_with_empty_batch() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    let start = tokio::time::Instant::now();
    let batch = h
        .engine
        .wait_for_updates(
            &token,
            user("bob"),
            UpdateQuery::since(0).with_timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap();
    assert!(batch.is_empty());
    assert_eq!(batch.version, 0);
    assert!(start.elapsed() >= Duration::from_millis(500));

    // Requested timeouts are clamped to the configured maximum
    let start = tokio::time::Instant::now();
    h.engine
        .wait_for_updates(
            &token,
            user("bob"),
            UpdateQuery::since(0).with_timeout(Duration::from_secs(600)),
        )
        .await
        .unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(60));
}

#[tokio::test]
async fn test_long_poll_returns_missed_operations_immediately() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;
    for base in 0..2 {
        h.engine
            .submit_operation(&token, user("host"), Operation::insert(0, "+"), base)
            .await
            .unwrap();
    }

    let batch = h
        .engine
        .wait_for_updates(&token, user("bob"), UpdateQuery::since(0))
        .await
        .unwrap();
    let versions: Vec<u64> = batch.operations.iter().map(|c| c.committed_version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn test_long_poll_wakes_on_cursor_event() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    // The join event is already there; start from its sequence number
    let seen = h
        .engine
        .wait_for_updates(&token, user("bob"), UpdateQuery::since(0).with_events_since(0))
        .await
        .unwrap();
    assert!(seen.event_seq > 0);

    let waiter = {
        let engine = Arc::clone(&h.engine);
        let token = token.clone();
        let query = UpdateQuery::since(0)
            .with_events_since(seen.event_seq)
            .with_timeout(Duration::from_secs(10));
        tokio::spawn(async move { engine.wait_for_updates(&token, user("bob"), query).await })
    };
    tokio::task::yield_now().await;

    h.engine
        .submit_cursor(&token, user("host"), Cursor::new(2, 3))
        .await
        .unwrap();

    let batch = waiter.await.unwrap().unwrap();
    assert!(batch.operations.is_empty());
    assert_eq!(batch.events.len(), 1);
    assert_eq!(
        batch.events[0].kind,
        FeedEventKind::CursorMoved {
            user_id: user("host"),
            cursor: Cursor::new(2, 3),
        }
    );
}

#[tokio::test]
async fn test_long_poll_returns_when_session_ends() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    let waiter = {
        let engine = Arc::clone(&h.engine);
        let token = token.clone();
        tokio::spawn(async move {
            engine
                .wait_for_updates(
                    &token,
                    user("bob"),
                    UpdateQuery::since(0).with_timeout(Duration::from_secs(10)),
                )
                .await
        })
    };
    tokio::task::yield_now().await;
    h.engine.end(&token, user("host")).await.unwrap();

    let batch = waiter.await.unwrap().unwrap();
    assert_eq!(batch.status, SessionStatus::Ended);
}

#[tokio::test]
async fn test_stranger_poll_is_refused_immediately() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    let poll = h.engine.wait_for_updates(
        &token,
        user("mallory"),
        UpdateQuery::since(0).with_timeout(Duration::from_secs(30)),
    );
    let err = tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .expect("stranger waited on the feed")
        .unwrap_err();
    assert!(matches!(err, CollabError::Forbidden { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_long_poll_has_no_side_effects() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    tokio::select! {
        _ = h.engine.wait_for_updates(&token, user("bob"), UpdateQuery::since(0)) => {
            panic!("nothing should have been published");
        }
        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
    }

    let result = h
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "x"), 0)
        .await
        .unwrap();
    assert_eq!(result.committed_version, 1);
    let view = h.engine.session_view(&token).await.unwrap();
    assert_eq!(view.session.version, 1);
}

// ========== Lock, chat and snapshots ==========

#[tokio::test]
async fn test_edit_lock_blocks_other_editors() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    let lock = h.engine.acquire_lock(&token, user("bob")).await.unwrap();
    assert_eq!(lock.holder, user("bob"));

    let err = h
        .engine
        .submit_operation(&token, user("host"), Operation::insert(0, "x"), 0)
        .await
        .unwrap_err();
    assert_eq!(err, CollabError::Locked { holder: user("bob") });

    h.engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "y"), 0)
        .await
        .unwrap();

    // The host may break the lock
    h.engine.release_lock(&token, user("host")).await.unwrap();
    h.engine
        .submit_operation(&token, user("host"), Operation::insert(0, "x"), 1)
        .await
        .unwrap();
    assert_eq!(h.document(&token).await, "xyfn main() {}");
}

#[tokio::test]
async fn test_stale_lock_can_be_taken_over() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;
    h.engine.acquire_lock(&token, user("bob")).await.unwrap();

    let err = h.engine.acquire_lock(&token, user("host")).await.unwrap_err();
    assert!(matches!(err, CollabError::Locked { .. }));

    h.time.advance(chrono::Duration::minutes(6));
    let lock = h.engine.acquire_lock(&token, user("host")).await.unwrap();
    assert_eq!(lock.holder, user("host"));
}

#[tokio::test]
async fn test_chat_history_is_bounded() {
    let config = EngineConfig::default().with_session(SessionConfig {
        message_history: 3,
        ..SessionConfig::default()
    });
    let h = Harness::with_config(config);
    let token = h.session_with(&["bob"]).await;

    for i in 0..5 {
        h.engine
            .post_message(&token, user("bob"), format!("message {i}"), Some(1))
            .await
            .unwrap();
    }

    let messages = h.engine.recent_messages(&token, 10).await.unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["message 2", "message 3", "message 4"]);
    assert_eq!(messages[0].display_name, "bob");
    assert_eq!(h.engine.recent_messages(&token, 1).await.unwrap().len(), 1);

    let err = h
        .engine
        .post_message(&token, user("bob"), "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CollabError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_snapshot_push_merges_and_conflicts() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;

    // Nobody else moved: fast-forward
    let result = h
        .engine
        .submit_snapshot(&token, user("bob"), 0, "fn main() { run(); }")
        .await
        .unwrap();
    assert_eq!(result.committed_version, 1);

    // The host pushes against the stale version 0
    let err = h
        .engine
        .submit_snapshot(&token, user("host"), 0, "fn start() {}")
        .await
        .unwrap_err();
    let CollabError::MergeConflict(record) = err else {
        panic!("expected a merge conflict");
    };
    assert_eq!(record.base, "fn main() {}");
    assert_eq!(record.yours, "fn main() { run(); }");
    assert_eq!(record.theirs, "fn start() {}");

    let pending = h.engine.pending_conflicts(&token).await.unwrap();
    assert_eq!(pending.len(), 1);

    let result = h
        .engine
        .resolve_conflict(&token, user("host"), record.id, "fn start() { run(); }")
        .await
        .unwrap();
    assert_eq!(result.committed_version, 2);
    assert!(h.engine.pending_conflicts(&token).await.unwrap().is_empty());
    assert_eq!(h.document(&token).await, "fn start() { run(); }");

    let err = h
        .engine
        .resolve_conflict(&token, user("host"), record.id, "x")
        .await
        .unwrap_err();
    assert_eq!(err, CollabError::ConflictNotFound(record.id));
}

#[tokio::test]
async fn test_unchanged_push_keeps_crlf_line_endings() {
    let snippets = Arc::new(MemorySnippetStore::with_document("win", "a\r\nb\r\n"));
    let engine = CollabEngine::new(EngineConfig::default(), snippets).unwrap();
    let view = engine
        .create_session(DocumentId::from("win"), Identity::new("host", "Hana"), None)
        .await
        .unwrap();
    let token = view.session.token;

    // Editors normalise to LF; the text is otherwise unchanged
    let result = engine
        .submit_snapshot(&token, user("host"), 0, "a\nb\n")
        .await
        .unwrap();
    assert_eq!(result.committed_version, 0);
    assert!(result.operations.is_empty());

    let record = engine.export_session(&token).await.unwrap();
    assert_eq!(record.document, "a\r\nb\r\n");
}

// ========== Recovery and persistence ==========

#[tokio::test]
async fn test_export_and_restore_into_new_engine() {
    let h = Harness::new();
    let token = h.session_with(&["bob"]).await;
    h.engine
        .submit_operation(&token, user("bob"), Operation::insert(12, "\n"), 0)
        .await
        .unwrap();
    h.engine
        .post_message(&token, user("bob"), "added a newline", None)
        .await
        .unwrap();
    let record = h.engine.export_session(&token).await.unwrap();

    let other = Harness::new();
    let view = other.engine.restore_session(record.clone()).await.unwrap();
    assert_eq!(view.session.token, token);
    assert_eq!(view.session.version, 1);

    let restored = other.engine.export_session(&token).await.unwrap();
    assert_eq!(restored.document, record.document);
    assert_eq!(restored.operations, record.operations);
    assert_eq!(
        other.engine.recent_messages(&token, 10).await.unwrap().len(),
        1
    );

    // Restoring over a live session is refused
    assert!(other.engine.restore_session(record).await.is_err());

    // Editing continues from the restored version
    let result = other
        .engine
        .submit_operation(&token, user("bob"), Operation::insert(0, "// "), 1)
        .await
        .unwrap();
    assert_eq!(result.committed_version, 2);
}

#[tokio::test]
async fn test_file_store_receives_final_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let snippets = Arc::new(FileSnippetStore::new(temp_dir.path()).unwrap());
    let engine = CollabEngine::new(EngineConfig::default(), Arc::clone(&snippets)).unwrap();

    let view = engine
        .create_session(DocumentId::from("greeting"), Identity::new("host", "Hana"), None)
        .await
        .unwrap();
    let token = view.session.token;
    engine
        .submit_operation(&token, user("host"), Operation::insert(0, "hello"), 0)
        .await
        .unwrap();
    engine.end(&token, user("host")).await.unwrap();
    engine.shutdown().await;

    let text = snippets
        .load_document(&DocumentId::from("greeting"))
        .await
        .unwrap();
    assert_eq!(text.as_deref(), Some("hello"));
    assert_eq!(engine.persister_stats().saved(), 1);
    assert_eq!(engine.session_count().await, 0);

    // A new session on the same snippet starts from the saved text
    let engine = CollabEngine::new(EngineConfig::default(), snippets).unwrap();
    let view = engine
        .create_session(DocumentId::from("greeting"), Identity::new("host", "Hana"), None)
        .await
        .unwrap();
    let record = engine.export_session(&view.session.token).await.unwrap();
    assert_eq!(record.document, "hello");
}
