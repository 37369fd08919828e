//! JSON-file document store.
//!
//! Each collection is a pretty-printed JSON array in `{dir}/{collection}.json`.
//! Reads are served from memory; every successful write rewrites the file of
//! the touched collection (write to a temp file, then rename).
//!
//! A write therefore costs O(n) in the size of its collection: one create or
//! update serializes and rewrites the whole file. That is acceptable for the
//! few thousand records a single newsroom deployment accumulates; a larger
//! deployment should back [`DocumentStore`](super::DocumentStore) with a
//! real database instead.
//!
//! # Layout
//!
//! ```text
//! store_dir/
//! ├── sources.json
//! ├── sitemaps.json
//! ├── crawls.json
//! └── articles.json
//! ```

use super::memory::MemoryStore;
use super::{Collection, Document, DocumentStore, Filter};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Document store persisted as one JSON file per collection.
///
/// Reads are served from memory; every write rewrites its collection file.
pub struct JsonFileStore {
    dir: PathBuf,
    memory: MemoryStore,
    flush_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore").field("dir", &self.dir).finish()
    }
}

impl JsonFileStore {
    /// Open (or initialise) a store directory.
    ///
    /// Missing collection files are treated as empty collections. A file that
    /// is not a JSON array of objects is a [`StoreError::Validation`].
    #[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let mut collections = BTreeMap::new();
        for collection in Collection::ALL {
            let path = collection_path(&dir, collection);
            if !fs::try_exists(&path).await? {
                continue;
            }
            let raw = fs::read(&path).await?;
            let docs = parse_collection(collection, &raw)?;
            debug!(%collection, count = docs.len(), "Loaded collection");
            collections.insert(collection, docs);
        }
        info!("Document store opened");

        Ok(Self {
            dir,
            memory: MemoryStore::from_documents(collections),
            flush_lock: Mutex::new(()),
        })
    }

    async fn flush(&self, collection: Collection) -> Result<(), StoreError> {
        let _guard = self.flush_lock.lock().await;
        let docs = self.memory.snapshot(collection).await;
        let json = serde_json::to_vec_pretty(&docs).map_err(|e| StoreError::Validation {
            collection,
            reason: e.to_string(),
        })?;

        let path = collection_path(&self.dir, collection);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            error!(path = %path.display(), error = %e, "Failed to replace collection file");
            return Err(e.into());
        }
        Ok(())
    }
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection.name()))
}

fn parse_collection(collection: Collection, raw: &[u8]) -> Result<Vec<Document>, StoreError> {
    let value: Value = serde_json::from_slice(raw).map_err(|source| StoreError::Decode {
        collection,
        source,
    })?;
    let Value::Array(items) = value else {
        return Err(StoreError::Validation {
            collection,
            reason: "collection file is not a JSON array".to_string(),
        });
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(doc) => Ok(doc),
            other => Err(StoreError::Validation {
                collection,
                reason: format!("collection entry is not an object: {other}"),
            }),
        })
        .collect()
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn create(
        &self,
        collection: Collection,
        record: Document,
    ) -> Result<Document, StoreError> {
        let doc = self.memory.create(collection, record).await?;
        self.flush(collection).await?;
        Ok(doc)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Document, StoreError> {
        self.memory.get(collection, id).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Document, StoreError> {
        let doc = self.memory.update(collection, id, patch).await?;
        self.flush(collection).await?;
        Ok(doc)
    }

    async fn list(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        self.memory.list(collection, filter).await
    }
}
