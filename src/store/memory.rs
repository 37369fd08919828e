//! In-process document store.

use super::{Collection, Document, DocumentStore, Filter};
use crate::error::StoreError;
use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

const ID_LEN: usize = 15;

fn required_fields(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Sources => &["name", "url"],
        Collection::Sitemaps => &["url", "source", "news", "verified"],
        Collection::Crawls => &["source", "name", "url", "sitemap"],
        Collection::Articles => &["title", "url", "source", "crawl"],
    }
}

fn immutable_fields(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Articles => &["id", "url", "source", "crawl"],
        _ => &["id"],
    }
}

/// Random 15-character lowercase alphanumeric id.
pub(crate) fn new_id() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Reject documents missing a required field of `collection`.
///
/// # Errors
///
/// [`StoreError::Validation`] naming the first field that is absent, `null`
/// or blank.
pub(crate) fn check_required(collection: Collection, doc: &Document) -> Result<(), StoreError> {
    for field in required_fields(collection) {
        match doc.get(*field) {
            None | Some(Value::Null) => {
                return Err(StoreError::Validation {
                    collection,
                    reason: format!("missing required field `{field}`"),
                });
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(StoreError::Validation {
                    collection,
                    reason: format!("required field `{field}` is blank"),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Collections held in memory, insertion ordered.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously persisted documents.
    pub fn from_documents(collections: BTreeMap<Collection, Vec<Document>>) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    /// Copy of every document in a collection.
    pub async fn snapshot(&self, collection: Collection) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        collection: Collection,
        mut record: Document,
    ) -> Result<Document, StoreError> {
        check_required(collection, &record)?;
        record.insert("id".to_string(), Value::String(new_id()));
        let mut guard = self.collections.write().await;
        guard.entry(collection).or_default().push(record.clone());
        Ok(record)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Document, StoreError> {
        let guard = self.collections.read().await;
        guard
            .get(&collection)
            .and_then(|docs| {
                docs.iter()
                    .find(|d| d.get("id").and_then(Value::as_str) == Some(id))
            })
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Document, StoreError> {
        let mut guard = self.collections.write().await;
        let doc = guard
            .get_mut(&collection)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|d| d.get("id").and_then(Value::as_str) == Some(id))
            })
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })?;

        for field in immutable_fields(collection) {
            if let Some(new_value) = patch.get(*field) {
                if doc.get(*field) != Some(new_value) {
                    return Err(StoreError::Validation {
                        collection,
                        reason: format!("field `{field}` is immutable"),
                    });
                }
            }
        }

        let mut merged = doc.clone();
        for (key, value) in patch {
            merged.insert(key, value);
        }
        check_required(collection, &merged)?;
        *doc = merged.clone();
        Ok(merged)
    }

    async fn list(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = MemoryStore::new();
        let a = store
            .create(Collection::Sources, doc(json!({"name": "A", "url": "https://a"})))
            .await
            .unwrap();
        let b = store
            .create(Collection::Sources, doc(json!({"name": "B", "url": "https://b"})))
            .await
            .unwrap();
        let id_a = a["id"].as_str().unwrap();
        assert_eq!(id_a.len(), ID_LEN);
        assert_ne!(a["id"], b["id"]);
        assert_eq!(store.get(Collection::Sources, id_a).await.unwrap()["name"], "A");
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let store = MemoryStore::new();
        let err = store
            .create(Collection::Sitemaps, doc(json!({"url": "https://a/sitemap.xml"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_and_guards_immutable_fields() {
        let store = MemoryStore::new();
        let created = store
            .create(
                Collection::Articles,
                doc(json!({"title": "T", "url": "https://u", "source": "s", "crawl": "c"})),
            )
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let updated = store
            .update(Collection::Articles, &id, doc(json!({"validated": true})))
            .await
            .unwrap();
        assert_eq!(updated["validated"], true);
        assert_eq!(updated["title"], "T");

        let err = store
            .update(Collection::Articles, &id, doc(json!({"url": "https://other"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_in_insertion_order() {
        let store = MemoryStore::new();
        for (i, verified) in [false, true, false].into_iter().enumerate() {
            store
                .create(
                    Collection::Crawls,
                    doc(json!({
                        "source": "s", "name": "n", "url": format!("https://u/{i}"),
                        "sitemap": "m", "verified": verified
                    })),
                )
                .await
                .unwrap();
        }
        let pending = store
            .list(Collection::Crawls, &Filter::eq("verified", false))
            .await
            .unwrap();
        let urls: Vec<_> = pending.iter().map(|d| d["url"].as_str().unwrap()).collect();
        assert_eq!(urls, vec!["https://u/0", "https://u/2"]);

        let found = store
            .find_one(Collection::Crawls, "url", &json!("https://u/1"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get(Collection::Articles, "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
