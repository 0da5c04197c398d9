//! File-based snippet store.
//!
//! # Directory Structure
//!
//! ```text
//! data/
//! ├── {document_id}.json    # Latest snapshot of each document
//! └── ...
//! ```
//!
//! Document ids are escaped so that any id maps to a single file inside the
//! base directory. Writes go to a temporary file first and are moved into
//! place with a rename, so readers never observe a half-written snapshot.
//! File I/O runs on tokio's blocking pool.

use super::{DocumentSnapshot, SnippetStore, StorageError, StorageResult};
use crate::ids::DocumentId;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// File-based implementation of [`SnippetStore`]
pub struct FileSnippetStore {
    /// Base directory for all document files
    base_path: PathBuf,
}

impl FileSnippetStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> StorageResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn document_path(&self, document_id: &DocumentId) -> PathBuf {
        self.base_path
            .join(format!("{}.json", escape_file_name(&document_id.0)))
    }

    /// List the ids of every stored document.
    pub fn list_documents(&self) -> StorageResult<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(snapshot) = read_snapshot(&path)? {
                ids.push(snapshot.document_id);
            }
        }
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }

    /// Latest snapshot of a document, if any.
    pub async fn latest_snapshot(
        &self,
        document_id: &DocumentId,
    ) -> StorageResult<Option<DocumentSnapshot>> {
        let path = self.document_path(document_id);
        blocking(move || read_snapshot(&path)).await
    }
}

impl SnippetStore for FileSnippetStore {
    async fn load_document(&self, document_id: &DocumentId) -> StorageResult<Option<String>> {
        Ok(self
            .latest_snapshot(document_id)
            .await?
            .map(|snapshot| snapshot.text))
    }

    async fn save_snapshot(&self, snapshot: &DocumentSnapshot) -> StorageResult<()> {
        let path = self.document_path(&snapshot.document_id);
        let snapshot = snapshot.clone();
        blocking(move || write_snapshot(&path, &snapshot)).await
    }
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::InternalError(format!("blocking task failed: {e}")))?
}

fn read_snapshot(path: &Path) -> StorageResult<Option<DocumentSnapshot>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(snapshot))
}

fn write_snapshot(path: &Path, snapshot: &DocumentSnapshot) -> StorageResult<()> {
    let temp_path = path.with_extension("json.tmp");

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
    }

    fs::rename(temp_path, path)?;
    Ok(())
}

/// Keep `[A-Za-z0-9_-]`, encode every other byte as `%XX`.
fn escape_file_name(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}
