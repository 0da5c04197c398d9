//! Registry of live sessions.
//!
//! Maps session tokens to coordinator handles. The registry is an ordinary
//! value shared through `Arc`, never a global, so every engine (and every
//! test) gets its own.

use crate::coordinator::SessionHandle;
use crate::error::{CollabError, CollabResult};
use crate::ids::SessionToken;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Token to coordinator lookup table.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionToken, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns `false` and leaves the registry unchanged
    /// if the token is already taken.
    pub async fn insert(&self, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(handle.token()) {
            return false;
        }
        sessions.insert(handle.token().clone(), handle);
        true
    }

    /// Look up a session, failing with [`CollabError::NotFound`].
    pub async fn get(&self, token: &SessionToken) -> CollabResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| CollabError::NotFound(token.clone()))
    }

    pub async fn contains(&self, token: &SessionToken) -> bool {
        self.sessions.read().await.contains_key(token)
    }

    pub async fn remove(&self, token: &SessionToken) -> Option<SessionHandle> {
        self.sessions.write().await.remove(token)
    }

    /// Snapshot of all handles, for sweeps and shutdown.
    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove and return every handle.
    pub async fn drain(&self) -> Vec<SessionHandle> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }

    pub async fn tokens(&self) -> Vec<SessionToken> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
