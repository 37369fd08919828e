//! Document store adapter.
//!
//! The persistence engine itself lives outside this crate. The pipeline only
//! needs create/read/update/list-with-filter over four named collections, so
//! the engine is consumed through [`DocumentStore`], which speaks untyped JSON
//! documents. [`Repository`] sits on top and is the only place documents are
//! turned into typed records: every read goes through serde with
//! `deny_unknown_fields`, so a malformed document becomes a
//! [`StoreError::Decode`] instead of a partially filled struct.
//!
//! Two engines ship with the crate:
//! - [`memory::MemoryStore`]: in-process, also the in-memory layer of the file store
//! - [`json_file::JsonFileStore`]: one JSON file per collection on disk
//!
//! Uniqueness of `url` on sitemaps, crawls and articles is enforced by the
//! callers with check-then-create. Concurrent writers for the same source
//! can race; that window is accepted rather than locked.

pub mod json_file;
pub mod memory;

use crate::error::StoreError;
use crate::models::{
    Article, ArticlePatch, Crawl, CrawlPatch, NewArticle, NewCrawl, NewSitemap, NewSource,
    Sitemap, SitemapPatch, Source, SourcePatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A stored JSON document.
pub type Document = Map<String, Value>;

/// The named collections the pipeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Sources,
    Sitemaps,
    Crawls,
    Articles,
}

impl Collection {
    /// Every collection, in the order the file store lays them out.
    pub const ALL: [Collection; 4] = [
        Collection::Sources,
        Collection::Sitemaps,
        Collection::Crawls,
        Collection::Articles,
    ];

    /// Collection name as stored on disk and printed in errors.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Sources => "sources",
            Collection::Sitemaps => "sitemaps",
            Collection::Crawls => "crawls",
            Collection::Articles => "articles",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Attribute filter for [`DocumentStore::list`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Field equals value. A missing field equals `null`.
    Eq(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    /// Match documents whose `field` equals `value`.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    /// Conjoin `other` onto this filter.
    ///
    /// `Filter::All` is the identity, so `Filter::All.and(f)` is just `f`.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All => other,
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            single => Filter::And(vec![single, other]),
        }
    }

    /// Whether `doc` satisfies every clause of this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => match doc.get(field) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            },
            Filter::And(parts) => parts.iter().all(|p| p.matches(doc)),
        }
    }
}

/// Untyped CRUD over named collections.
///
/// `list` returns documents in insertion order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document; the store assigns and returns its `id`.
    async fn create(&self, collection: Collection, record: Document)
    -> Result<Document, StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Document, StoreError>;

    /// Merge `patch` into the stored document and return the result.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Document, StoreError>;

    async fn list(&self, collection: Collection, filter: &Filter)
    -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        attr: &str,
        value: &Value,
    ) -> Result<Option<Document>, StoreError> {
        let filter = Filter::Eq(attr.to_string(), value.clone());
        Ok(self.list(collection, &filter).await?.into_iter().next())
    }
}

fn encode<T: Serialize>(collection: Collection, value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Validation {
            collection,
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(StoreError::Validation {
            collection,
            reason: e.to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(collection: Collection, doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|source| {
        warn!(%collection, error = %source, "Stored document failed typed decoding");
        StoreError::Decode { collection, source }
    })
}

/// Typed access to the four collections.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Wrap a document store.
    ///
    /// # Arguments
    ///
    /// * `store` - Any [`DocumentStore`] backend, shared across clones of the repository
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn find<T: DeserializeOwned>(
        &self,
        collection: Collection,
        attr: &str,
        value: &str,
    ) -> Result<Option<T>, StoreError> {
        let value = Value::String(value.to_string());
        match self.store.find_one(collection, attr, &value).await? {
            Some(doc) => decode(collection, doc).map(Some),
            None => Ok(None),
        }
    }

    async fn list_typed<T: DeserializeOwned>(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<T>, StoreError> {
        self.store
            .list(collection, filter)
            .await?
            .into_iter()
            .map(|doc| decode(collection, doc))
            .collect()
    }

    async fn create_typed<N: Serialize, T: DeserializeOwned>(
        &self,
        collection: Collection,
        record: &N,
    ) -> Result<T, StoreError> {
        let doc = self.store.create(collection, encode(collection, record)?).await?;
        decode(collection, doc)
    }

    async fn update_typed<P: Serialize, T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
        patch: &P,
    ) -> Result<T, StoreError> {
        let doc = self
            .store
            .update(collection, id, encode(collection, patch)?)
            .await?;
        decode(collection, doc)
    }

    /// Count the documents in `collection` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`StoreError`] if the listing fails.
    pub async fn count(&self, collection: Collection, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.store.list(collection, filter).await?.len())
    }

    // Sources

    /// All registered sources.
    pub async fn sources(&self) -> Result<Vec<Source>, StoreError> {
        self.list_typed(Collection::Sources, &Filter::All).await
    }

    /// Fetch one source by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no source has this id.
    pub async fn source(&self, id: &str) -> Result<Source, StoreError> {
        decode(Collection::Sources, self.store.get(Collection::Sources, id).await?)
    }

    /// Insert a new source and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] if the name or url is blank, or any backend error.
    pub async fn create_source(&self, source: &NewSource) -> Result<Source, StoreError> {
        self.create_typed(Collection::Sources, source).await
    }

    /// Stamp `last_crawl` on a source.
    ///
    /// # Arguments
    ///
    /// * `id` - The source to update
    /// * `at` - Time of the crawl start
    ///
    /// # Returns
    ///
    /// The updated source.
    pub async fn touch_source(&self, id: &str, at: DateTime<Utc>) -> Result<Source, StoreError> {
        let patch = SourcePatch {
            last_crawl: Some(at),
            ..Default::default()
        };
        self.update_typed(Collection::Sources, id, &patch).await
    }

    /// Read-modify-write append of an article id to a source.
    pub async fn append_source_article(
        &self,
        source_id: &str,
        article_id: &str,
    ) -> Result<Source, StoreError> {
        let mut source = self.source(source_id).await?;
        if !source.articles.iter().any(|a| a == article_id) {
            source.articles.push(article_id.to_string());
        }
        let patch = SourcePatch {
            articles: Some(source.articles),
            ..Default::default()
        };
        self.update_typed(Collection::Sources, source_id, &patch).await
    }

    // Sitemaps

    /// Look up a sitemap record by its exact url.
    pub async fn sitemap_by_url(&self, url: &str) -> Result<Option<Sitemap>, StoreError> {
        self.find(Collection::Sitemaps, "url", url).await
    }

    /// Insert a sitemap record. The url must not be registered yet.
    pub async fn create_sitemap(&self, sitemap: &NewSitemap) -> Result<Sitemap, StoreError> {
        debug!(url = %sitemap.url, "Creating sitemap record");
        self.create_typed(Collection::Sitemaps, sitemap).await
    }

    /// Apply a partial update to a sitemap.
    ///
    /// Fields left `None` in `patch` keep their stored value.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the id is unknown.
    pub async fn update_sitemap(
        &self,
        id: &str,
        patch: &SitemapPatch,
    ) -> Result<Sitemap, StoreError> {
        self.update_typed(Collection::Sitemaps, id, patch).await
    }

    /// Every sitemap discovered under `source_id`, verified or not.
    pub async fn sitemaps_for_source(&self, source_id: &str) -> Result<Vec<Sitemap>, StoreError> {
        self.list_typed(Collection::Sitemaps, &Filter::eq("source", source_id))
            .await
    }

    // Crawls

    /// Look up the crawl record for a page url.
    ///
    /// # Returns
    ///
    /// `None` if the page was never seen by any crawler.
    pub async fn crawl_by_url(&self, url: &str) -> Result<Option<Crawl>, StoreError> {
        self.find(Collection::Crawls, "url", url).await
    }

    /// Fetch one crawl record by id.
    pub async fn crawl(&self, id: &str) -> Result<Crawl, StoreError> {
        decode(Collection::Crawls, self.store.get(Collection::Crawls, id).await?)
    }

    /// Insert a crawl record for a newly discovered page.
    pub async fn create_crawl(&self, crawl: &NewCrawl) -> Result<Crawl, StoreError> {
        self.create_typed(Collection::Crawls, crawl).await
    }

    /// Apply a partial update to a crawl record.
    pub async fn update_crawl(&self, id: &str, patch: &CrawlPatch) -> Result<Crawl, StoreError> {
        self.update_typed(Collection::Crawls, id, patch).await
    }

    /// Crawl records matching `filter`.
    pub async fn crawls(&self, filter: &Filter) -> Result<Vec<Crawl>, StoreError> {
        self.list_typed(Collection::Crawls, filter).await
    }

    // Articles

    /// Fetch one article by id.
    pub async fn article(&self, id: &str) -> Result<Article, StoreError> {
        decode(Collection::Articles, self.store.get(Collection::Articles, id).await?)
    }

    /// Look up an article by the page url it was ingested from.
    pub async fn article_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        self.find(Collection::Articles, "url", url).await
    }

    /// Whether an article has already been stored for `url`.
    pub async fn article_exists(&self, url: &str) -> Result<bool, StoreError> {
        Ok(self.article_by_url(url).await?.is_some())
    }

    /// Insert an article and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] if a required field such as the url or title is blank.
    pub async fn create_article(&self, article: &NewArticle) -> Result<Article, StoreError> {
        self.create_typed(Collection::Articles, article).await
    }

    /// Apply a partial update to an article.
    ///
    /// Used by the validity gate and the rewrite engine to record their results.
    pub async fn update_article(
        &self,
        id: &str,
        patch: &ArticlePatch,
    ) -> Result<Article, StoreError> {
        self.update_typed(Collection::Articles, id, patch).await
    }

    /// Articles matching `filter`, in insertion order.
    ///
    /// The pipeline relies on this order to pick "the next" article.
    pub async fn articles(&self, filter: &Filter) -> Result<Vec<Article>, StoreError> {
        self.list_typed(Collection::Articles, filter).await
    }
}
