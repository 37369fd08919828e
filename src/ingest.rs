//! Ingest resolver: one page URL in, one persisted [`Article`] or a
//! rejection out.
//!
//! Resolution order:
//! 1. duplicate check (article URL, crawl already linked)
//! 2. structured-data verdict; no recent accepted record is `SchemaMissing`
//! 3. content extraction over the same HTML
//! 4. field merge, structured values first
//! 5. completeness check on title, content, authors and thumbnail
//! 6. persist the article, link it from its source and its crawl
//!
//! Rejections are returned, never retried. The caller still marks the
//! crawl verified so the URL is not attempted again.

use crate::error::IngestError;
use crate::extract::structured::{NewsVerdict, SchemaRecord, parse_structured};
use crate::extract::{ContentDraft, extract_content, is_blank};
use crate::fetch::PageFetcher;
use crate::models::{Article, CrawlPatch, NewArticle};
use crate::store::Repository;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use url::Url;

/// Article fields after merge, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedArticle {
    pub title: String,
    pub authors: String,
    pub thumbnail: String,
    pub keywords: Option<String>,
    pub content: String,
    pub excerpt: String,
    pub date: Option<DateTime<Utc>>,
}

impl MergedArticle {
    /// Essential fields still empty after the merge.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("title", &self.title),
            ("content", &self.content),
            ("authors", &self.authors),
            ("thumbnail", &self.thumbnail),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Merge the winning structured record with the page draft.
///
/// Structured values win. Fallback chains:
/// - thumbnail: `thumbnail`/`thumbnailUrl`, page `primaryImageOfPage`,
///   draft hero image, `image.contentUrl`/`image.url`/`associatedMedia.url`
/// - authors: structured `author`, draft byline
/// - keywords: structured only
/// - title: `headline`, draft title
/// - content: `articleBody` unless `"undefined"`, draft body
pub fn merge(record: &SchemaRecord, primary_image: Option<&str>, draft: ContentDraft) -> MergedArticle {
    let thumbnail = record
        .thumbnail()
        .or_else(|| primary_image.map(str::to_string))
        .or(draft.thumbnail)
        .or_else(|| record.media_image())
        .unwrap_or_default();

    let excerpt = if is_blank(&draft.excerpt) {
        record.description().unwrap_or_default()
    } else {
        draft.excerpt
    };

    MergedArticle {
        title: record.headline().unwrap_or(draft.title),
        authors: record.authors().unwrap_or(draft.authors),
        thumbnail,
        keywords: record.keywords(),
        content: record.article_body().unwrap_or(draft.content),
        excerpt,
        date: record.date_published().or(draft.date),
    }
}

/// Run every synchronous step over the page HTML.
fn analyze(
    url: &str,
    html: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<MergedArticle, IngestError> {
    let structured = parse_structured(html);
    let record = match structured.news_article(now, window) {
        NewsVerdict::Recent(record) => record,
        NewsVerdict::Stale { published } => {
            debug!(%url, ?published, "Structured record outside recency window");
            return Err(IngestError::SchemaMissing);
        }
        NewsVerdict::NotFound => {
            debug!(%url, records = structured.records.len(), "No accepted structured record");
            return Err(IngestError::SchemaMissing);
        }
    };

    let page_url = Url::parse(url).ok();
    let draft = extract_content(html, page_url.as_ref());
    let merged = merge(&record, structured.primary_image.as_deref(), draft);

    let missing = merged.missing_fields();
    if !missing.is_empty() {
        return Err(IngestError::IncompleteArticle { missing });
    }
    Ok(merged)
}

/// Result shape handed to API-style callers: the article, or
/// `{error: true, message}`.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested(Article),
    Rejected { message: String },
}

impl IngestOutcome {
    /// Fold rejections into [`IngestOutcome::Rejected`]; operational
    /// failures stay errors.
    pub fn from_result(result: Result<Article, IngestError>) -> Result<Self, IngestError> {
        match result {
            Ok(article) => Ok(IngestOutcome::Ingested(article)),
            Err(e) if e.is_rejection() => Ok(IngestOutcome::Rejected {
                message: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Rejections count as errors in crawl progress.
    pub fn is_error(&self) -> bool {
        matches!(self, IngestOutcome::Rejected { .. })
    }
}

/// Resolves page URLs into persisted articles.
#[derive(Clone)]
pub struct Ingestor {
    repo: Repository,
    fetcher: Arc<dyn PageFetcher>,
    recency_window: Duration,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("recency_window", &self.recency_window)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Create an ingestor.
    ///
    /// # Arguments
    ///
    /// * `repo` - Store for crawl and article records
    /// * `fetcher` - Used to download pages
    /// * `recency_window` - Maximum age of a page's `datePublished`
    pub fn new(repo: Repository, fetcher: Arc<dyn PageFetcher>, recency_window: Duration) -> Self {
        Self {
            repo,
            fetcher,
            recency_window,
        }
    }

    /// Fetch `url` and resolve it.
    ///
    /// The duplicate check runs before the fetch so known articles cost no
    /// network round-trip.
    #[instrument(level = "info", skip_all, fields(url = %url.trim()))]
    pub async fn ingest_url(
        &self,
        url: &str,
        source_id: &str,
        crawl_id: &str,
    ) -> Result<Article, IngestError> {
        let url = url.trim();
        self.ensure_new(url, crawl_id).await?;
        let html = self.fetcher.fetch_text(url).await?;
        self.resolve(url, &html, source_id, crawl_id).await
    }

    /// Resolve already-fetched HTML.
    pub async fn ingest_html(
        &self,
        url: &str,
        html: &str,
        source_id: &str,
        crawl_id: &str,
    ) -> Result<Article, IngestError> {
        let url = url.trim();
        self.ensure_new(url, crawl_id).await?;
        self.resolve(url, html, source_id, crawl_id).await
    }

    async fn ensure_new(&self, url: &str, crawl_id: &str) -> Result<(), IngestError> {
        if self.repo.article_exists(url).await? {
            return Err(IngestError::DuplicateArticle);
        }
        if self.repo.crawl(crawl_id).await?.article.is_some() {
            return Err(IngestError::DuplicateArticle);
        }
        Ok(())
    }

    async fn resolve(
        &self,
        url: &str,
        html: &str,
        source_id: &str,
        crawl_id: &str,
    ) -> Result<Article, IngestError> {
        let merged = analyze(url, html, Utc::now(), self.recency_window)?;

        let article = self
            .repo
            .create_article(&NewArticle {
                title: merged.title,
                authors: merged.authors,
                thumbnail: merged.thumbnail,
                keywords: merged.keywords,
                content: merged.content,
                excerpt: merged.excerpt,
                source: source_id.to_string(),
                crawl: crawl_id.to_string(),
                url: url.to_string(),
                date: merged.date,
                processed: false,
                valid: None,
                validated: false,
                category: None,
            })
            .await?;

        self.repo
            .append_source_article(source_id, &article.id)
            .await?;
        self.repo
            .update_crawl(
                crawl_id,
                &CrawlPatch {
                    article: Some(article.id.clone()),
                    verified: Some(true),
                },
            )
            .await?;

        info!(article = %article.id, title = %article.title, "Article ingested");
        Ok(article)
    }
}
