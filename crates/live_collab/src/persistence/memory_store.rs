//! In-memory snippet store.
//!
//! Keeps the latest text of each document plus every snapshot written to it,
//! which makes it convenient for asserting on persistence in tests.

use super::{DocumentSnapshot, SnippetStore, StorageResult};
use crate::ids::DocumentId;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct StoredDocument {
    text: String,
    snapshots: Vec<DocumentSnapshot>,
}

/// In-memory implementation of [`SnippetStore`].
///
/// Thread-safe through an internal `RwLock`; share it with `Arc`.
#[derive(Default)]
pub struct MemorySnippetStore {
    documents: RwLock<HashMap<DocumentId, StoredDocument>>,
}

impl MemorySnippetStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with one document.
    pub fn with_document(document_id: impl Into<DocumentId>, text: impl Into<String>) -> Self {
        let store = Self::new();
        store.insert_document(document_id, text);
        store
    }

    /// Set the canonical text of a document without recording a snapshot.
    pub fn insert_document(&self, document_id: impl Into<DocumentId>, text: impl Into<String>) {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.entry(document_id.into()).or_default().text = text.into();
    }

    /// Latest snapshot written for a document.
    pub fn latest_snapshot(&self, document_id: &DocumentId) -> Option<DocumentSnapshot> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents
            .get(document_id)
            .and_then(|doc| doc.snapshots.last().cloned())
    }

    /// Number of snapshots written for a document.
    pub fn snapshot_count(&self, document_id: &DocumentId) -> usize {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents.get(document_id).map_or(0, |doc| doc.snapshots.len())
    }

    /// Get the number of documents in the store
    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SnippetStore for MemorySnippetStore {
    async fn load_document(&self, document_id: &DocumentId) -> StorageResult<Option<String>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(document_id).map(|doc| doc.text.clone()))
    }

    async fn save_snapshot(&self, snapshot: &DocumentSnapshot) -> StorageResult<()> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let doc = documents.entry(snapshot.document_id.clone()).or_default();
        doc.text = snapshot.text.clone();
        doc.snapshots.push(snapshot.clone());
        Ok(())
    }
}
