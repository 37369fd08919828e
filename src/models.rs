//! Records persisted in the document store and the crawler's progress snapshot.
//!
//! Four collections back the pipeline:
//! - [`Source`]: a configured news site, created by an administrator
//! - [`Sitemap`]: a sitemap URL discovered through robots.txt or a parent index
//! - [`Crawl`]: the memo that a leaf URL has been (or is being) considered
//! - [`Article`]: an ingested article, later validated and rewritten
//!
//! Every record type denies unknown fields so a stored document that drifted
//! from the expected shape fails loudly at the store boundary instead of
//! being half-copied onto a typed value. `New*` types are the creation
//! payloads (the store assigns `id`), `*Patch` types are partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured news site.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Site root; its origin is where robots.txt is looked up.
    pub url: String,
    #[serde(default)]
    pub last_crawl: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logo: String,
    /// Ids of articles ingested from this source, in ingestion order.
    #[serde(default)]
    pub articles: Vec<String>,
}

/// Insert form of [`Source`].
#[derive(Debug, Clone, Serialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub last_crawl: Option<DateTime<Utc>>,
    pub logo: String,
    pub articles: Vec<String>,
}

/// Partial update of a [`Source`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourcePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crawl: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles: Option<Vec<String>>,
}

/// A sitemap discovered for a source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Sitemap {
    pub id: String,
    pub url: String,
    pub source: String,
    /// A urlset round yielded at least one ingested article.
    pub news: bool,
    /// The XML was fetched, parsed and classified (index vs. urlset).
    pub verified: bool,
    #[serde(default)]
    pub last_crawl: Option<DateTime<Utc>>,
}

/// Insert form of [`Sitemap`].
#[derive(Debug, Clone, Serialize)]
pub struct NewSitemap {
    pub url: String,
    pub source: String,
    pub news: bool,
    pub verified: bool,
    pub last_crawl: Option<DateTime<Utc>>,
}

/// Partial update of a [`Sitemap`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SitemapPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crawl: Option<DateTime<Utc>>,
}

/// One distinct leaf URL seen in a urlset.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Crawl {
    pub id: String,
    pub source: String,
    /// Source name, denormalized for dashboards.
    pub name: String,
    pub url: String,
    pub sitemap: String,
    #[serde(default)]
    pub article: Option<String>,
    /// Terminal marker: fetched and resolved, success or rejection.
    #[serde(default)]
    pub verified: bool,
}

/// Insert form of [`Crawl`].
#[derive(Debug, Clone, Serialize)]
pub struct NewCrawl {
    pub source: String,
    pub name: String,
    pub url: String,
    pub sitemap: String,
    pub article: Option<String>,
    pub verified: bool,
}

/// Partial update of a [`Crawl`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// An ingested news article.
///
/// `url`, `source` and `crawl` never change after creation; every other
/// field may be overwritten by the validity gate or the rewrite engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
    /// Comma separated keyword list.
    #[serde(default)]
    pub keywords: Option<String>,
    /// Article body (HTML as extracted, plain paragraphs once rewritten).
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    pub source: String,
    pub crawl: String,
    pub url: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed: bool,
    /// `None` until the validity gate has produced a verdict.
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub category: Option<String>,
}

/// Insert form of [`Article`], as produced by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewArticle {
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
    pub keywords: Option<String>,
    pub content: String,
    pub excerpt: String,
    pub source: String,
    pub crawl: String,
    pub url: String,
    pub date: Option<DateTime<Utc>>,
    pub processed: bool,
    pub valid: Option<bool>,
    pub validated: bool,
    pub category: Option<String>,
}

/// Partial update of an [`Article`].
///
/// The gate writes `valid`/`validated`, the rewrite engine writes the text
/// fields and `processed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArticlePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
}

/// Lifecycle of one crawl attempt for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Idle,
    Crawling,
    Completed,
    Error,
}

impl CrawlStatus {
    /// Completed or failed.
    pub fn is_finished(self) -> bool {
        matches!(self, CrawlStatus::Completed | CrawlStatus::Error)
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlStatus::Idle => "idle",
            CrawlStatus::Crawling => "crawling",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot delivered through `on_update`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlProgress {
    pub source_id: String,
    pub status: CrawlStatus,
    /// Cumulative successful ingests in this invocation.
    pub progress: u32,
    /// Cumulative errors in this invocation.
    pub errors: u32,
    pub timestamp: DateTime<Utc>,
    /// Message of the error that produced this snapshot, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CrawlProgress {
    /// Zeroed snapshot for a crawler that has not started.
    pub fn idle(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: CrawlStatus::Idle,
            progress: 0,
            errors: 0,
            timestamp: Utc::now(),
            message: None,
        }
    }
}
