//! Per-source sitemap crawler.
//!
//! One [`SitemapCrawler`] drives one crawl attempt for one source through
//! `idle → crawling → {completed, error}`:
//!
//! 1. robots.txt at the source origin lists the root sitemaps
//! 2. each root is expanded depth-first, index children and urlset entries
//!    in document order
//! 3. sitemaps of this source still unverified in the store, and outside
//!    the re-ping interval, are swept afterwards
//!
//! Work inside one crawler is strictly sequential. Before every sitemap and
//! every urlset entry the crawler polls [`CrawlHooks::should_halt`] and the
//! per-invocation article limit; once either trips no further request is
//! issued for this source. A failing sitemap subtree is reported through
//! [`CrawlHooks::on_error`] and skipped, the rest of the run continues.
//!
//! Dedup is check-then-create against the store without locks. Two crawlers
//! on the same source would race, which is why the [`supervisor`] refuses
//! to start a second one.

pub mod supervisor;

use crate::error::{CrawlError, IngestError, StoreError};
use crate::fetch::{FetchOptions, PageFetcher};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::models::{
    Crawl, CrawlPatch, CrawlProgress, CrawlStatus, NewCrawl, NewSitemap, Sitemap, SitemapPatch,
    Source,
};
use crate::robots::discover_sitemaps;
use crate::sitemap::{SitemapDocument, UrlEntry, parse_sitemap};
use crate::store::Repository;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Knobs for one crawl attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOptions {
    /// Fetch retries after the first attempt, network-class failures only.
    pub retry_count: usize,
    pub retry_delay: StdDuration,
    /// Successful ingests after which the attempt stops.
    pub article_hard_limit: u32,
    pub user_agent: String,
    pub timeout: StdDuration,
    /// Minimum age of `last_crawl` before a sitemap is fetched again.
    pub reping_interval: chrono::Duration,
    /// Sitemap and page URLs containing this are skipped. Empty disables.
    pub skip_substring: String,
    /// How old a `datePublished` may be for a page to count as news.
    pub recency_window: chrono::Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: StdDuration::from_millis(200),
            article_hard_limit: 10,
            user_agent: "Mozilla/5.0".to_string(),
            timeout: StdDuration::from_secs(5),
            reping_interval: chrono::Duration::hours(1),
            skip_substring: "archive".to_string(),
            recency_window: chrono::Duration::days(5),
        }
    }
}

impl CrawlOptions {
    /// Fetch settings derived from these crawl options.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            ..FetchOptions::default()
        }
    }
}

/// Observer for one crawl attempt.
///
/// `should_halt` is polled, never awaited: an in-flight request always
/// completes before the crawler notices.
pub trait CrawlHooks: Send + Sync {
    fn on_update(&self, _progress: &CrawlProgress) {}
    fn on_error(&self, _error: &CrawlError) {}
    fn should_halt(&self) -> bool {
        false
    }
}

/// Hooks that observe nothing and never halt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CrawlHooks for NoHooks {}

/// Summary of a finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlReport {
    pub source_id: String,
    pub status: CrawlStatus,
    pub ingested: u32,
    pub errors: u32,
    /// Sitemap documents actually fetched.
    pub sitemaps_fetched: u32,
    pub halted: bool,
}

/// One crawl attempt over one source.
///
/// A crawler is consumed by [`SitemapCrawler::run`]. Pages already seen in
/// an earlier attempt are skipped through their crawl records.
pub struct SitemapCrawler {
    source: Source,
    repo: Repository,
    fetcher: Arc<dyn PageFetcher>,
    ingestor: Ingestor,
    options: CrawlOptions,
    hooks: Arc<dyn CrawlHooks>,
    progress: CrawlProgress,
    visited: HashSet<String>,
    sitemaps_fetched: u32,
}

impl std::fmt::Debug for SitemapCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitemapCrawler")
            .field("source", &self.source.id)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl SitemapCrawler {
    /// Create a crawler for `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - The source whose robots.txt and sitemaps are walked
    /// * `repo` - Store for sitemap, crawl and article records
    /// * `fetcher` - Used for robots.txt, sitemaps and pages alike
    /// * `options` - Limits, re-ping interval and recency window
    /// * `hooks` - Progress observer and halt flag
    pub fn new(
        source: Source,
        repo: Repository,
        fetcher: Arc<dyn PageFetcher>,
        options: CrawlOptions,
        hooks: Arc<dyn CrawlHooks>,
    ) -> Self {
        let ingestor = Ingestor::new(repo.clone(), fetcher.clone(), options.recency_window);
        let progress = CrawlProgress::idle(&source.id);
        Self {
            source,
            repo,
            fetcher,
            ingestor,
            options,
            hooks,
            progress,
            visited: HashSet::new(),
            sitemaps_fetched: 0,
        }
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> &CrawlProgress {
        &self.progress
    }

    /// Run the attempt to completion and stamp the source's `last_crawl`.
    #[instrument(level = "info", skip_all, fields(source = %self.source.name))]
    pub async fn run(mut self) -> CrawlReport {
        self.progress.status = CrawlStatus::Crawling;
        self.report();

        let status = match self.discover().await {
            Ok(()) => CrawlStatus::Completed,
            Err(e) => {
                self.fail(e);
                CrawlStatus::Error
            }
        };

        if let Err(e) = self.repo.touch_source(&self.source.id, Utc::now()).await {
            self.fail(e.into());
        }

        self.progress.status = status;
        self.report();
        info!(
            %status,
            ingested = self.progress.progress,
            errors = self.progress.errors,
            sitemaps = self.sitemaps_fetched,
            "Crawl finished"
        );

        CrawlReport {
            source_id: self.source.id.clone(),
            status,
            ingested: self.progress.progress,
            errors: self.progress.errors,
            sitemaps_fetched: self.sitemaps_fetched,
            halted: self.halted(),
        }
    }

    /// Walk the robots.txt roots, then sweep stored sitemaps.
    ///
    /// # Errors
    ///
    /// [`CrawlError::InvalidSource`] if the source URL does not parse, or a
    /// store error while listing sitemaps. Fetch failures along the way are
    /// reported through the hooks and do not end the attempt.
    async fn discover(&mut self) -> Result<(), CrawlError> {
        let site = Url::parse(&self.source.url).map_err(|e| CrawlError::InvalidSource {
            url: self.source.url.clone(),
            reason: e.to_string(),
        })?;
        if self.halted() {
            return Ok(());
        }

        match discover_sitemaps(self.fetcher.as_ref(), &site, &self.options.user_agent).await {
            Ok(roots) => {
                for root in roots {
                    if self.halted() {
                        break;
                    }
                    self.crawl_tree(root.to_string()).await;
                }
            }
            Err(e) => self.fail(e.into()),
        }

        let pending: Vec<String> = self
            .repo
            .sitemaps_for_source(&self.source.id)
            .await?
            .into_iter()
            .filter(|s| !s.verified && !self.recently_pinged(s))
            .map(|s| s.url)
            .collect();
        debug!(count = pending.len(), "Sweeping stored sitemaps");
        for url in pending {
            if self.halted() {
                break;
            }
            self.crawl_tree(url).await;
        }
        Ok(())
    }

    /// Depth-first expansion from one root. Children are pushed in reverse
    /// so they pop in document order.
    async fn crawl_tree(&mut self, root: String) {
        let mut stack = vec![root];
        while let Some(url) = stack.pop() {
            if self.halted() {
                debug!("Halt requested; leaving sitemap tree");
                return;
            }
            if !self.visited.insert(url.clone()) {
                continue;
            }
            match self.validate_sitemap(&url).await {
                Ok(children) => stack.extend(children.into_iter().rev()),
                Err(e) => self.fail(e),
            }
        }
    }

    /// Look up or create the sitemap record, then fetch and classify it.
    ///
    /// Returns the index children still to visit (empty for a urlset, a
    /// skipped or a halted sitemap). A sitemap whose `last_crawl` falls
    /// within the re-ping interval is not fetched, news or not.
    #[instrument(level = "info", skip(self))]
    pub async fn validate_sitemap(&mut self, url: &str) -> Result<Vec<String>, CrawlError> {
        let record = match self.repo.sitemap_by_url(url).await? {
            Some(record) => record,
            None => {
                self.repo
                    .create_sitemap(&NewSitemap {
                        url: url.to_string(),
                        source: self.source.id.clone(),
                        news: false,
                        verified: false,
                        last_crawl: None,
                    })
                    .await?
            }
        };

        if self.halted() {
            return Ok(Vec::new());
        }
        if self.recently_pinged(&record) {
            debug!(last_crawl = ?record.last_crawl, "Within re-ping interval; skipping");
            return Ok(Vec::new());
        }

        self.repo
            .update_sitemap(
                &record.id,
                &SitemapPatch {
                    last_crawl: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.progress.status = CrawlStatus::Crawling;
        self.report();

        let body = self.fetcher.fetch_text(url).await?;
        self.sitemaps_fetched += 1;
        let document = parse_sitemap(&body).map_err(|e| CrawlError::MalformedSitemap {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match document {
            SitemapDocument::Index(children) => {
                self.repo
                    .update_sitemap(
                        &record.id,
                        &SitemapPatch {
                            news: Some(false),
                            verified: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?;
                let total = children.len();
                let children: Vec<String> = children
                    .into_iter()
                    .filter(|child| !self.skipped(child) && !self.visited.contains(child))
                    .collect();
                info!(total, kept = children.len(), "Sitemap index expanded");
                Ok(children)
            }
            SitemapDocument::UrlSet(entries) => {
                self.crawl_urlset(&record, entries).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Ingest the entries of one urlset in document order.
    ///
    /// Marks the sitemap verified once the walk finishes, and as news if
    /// any entry was ingested.
    async fn crawl_urlset(
        &mut self,
        record: &Sitemap,
        entries: Vec<UrlEntry>,
    ) -> Result<(), CrawlError> {
        info!(entries = entries.len(), "Walking urlset");
        let mut has_news = false;

        for entry in entries {
            if self.halted() {
                // Left unverified so the sweep of a later run resumes here.
                info!("Halted inside urlset");
                return Ok(());
            }
            if self.skipped(&entry.loc) {
                continue;
            }
            let Some(crawl) = self.add_crawl_and_check(&entry.loc, &record.id).await? else {
                continue;
            };

            let result = self
                .ingestor
                .ingest_url(&crawl.url, &self.source.id, &crawl.id)
                .await;
            match IngestOutcome::from_result(result) {
                Ok(IngestOutcome::Ingested(article)) => {
                    has_news = true;
                    self.progress.progress += 1;
                    debug!(url = %crawl.url, article = %article.id, "Ingested");
                    self.report();
                }
                Ok(IngestOutcome::Rejected { message }) => {
                    debug!(url = %crawl.url, %message, "Page rejected");
                    self.repo
                        .update_crawl(
                            &crawl.id,
                            &CrawlPatch {
                                verified: Some(true),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Err(IngestError::Store(e)) => return Err(e.into()),
                Err(e) => self.fail(CrawlError::Ingest {
                    url: crawl.url.clone(),
                    source: e,
                }),
            }
        }

        self.repo
            .update_sitemap(
                &record.id,
                &SitemapPatch {
                    news: Some(record.news || has_news),
                    verified: Some(true),
                    last_crawl: Some(Utc::now()),
                },
            )
            .await?;
        Ok(())
    }

    /// The Crawl to drive for `url`, or `None` when there is nothing to do.
    ///
    /// `None` if a verified Crawl or an Article already exists for the URL.
    /// Otherwise the existing unverified Crawl, or a new one.
    pub async fn add_crawl_and_check(
        &self,
        url: &str,
        sitemap_id: &str,
    ) -> Result<Option<Crawl>, StoreError> {
        let url = url.trim();
        let existing = self.repo.crawl_by_url(url).await?;
        if existing.as_ref().is_some_and(|c| c.verified) {
            return Ok(None);
        }
        if self.repo.article_exists(url).await? {
            return Ok(None);
        }
        if let Some(crawl) = existing {
            return Ok(Some(crawl));
        }
        let crawl = self
            .repo
            .create_crawl(&NewCrawl {
                source: self.source.id.clone(),
                name: self.source.name.clone(),
                url: url.to_string(),
                sitemap: sitemap_id.to_string(),
                article: None,
                verified: false,
            })
            .await?;
        Ok(Some(crawl))
    }

    /// Hard limit reached or a halt was requested.
    fn halted(&self) -> bool {
        self.progress.progress >= self.options.article_hard_limit || self.hooks.should_halt()
    }

    fn skipped(&self, url: &str) -> bool {
        !self.options.skip_substring.is_empty() && url.contains(&self.options.skip_substring)
    }

    /// `last_crawl` is stamped before every fetch, so this also holds for a
    /// sitemap whose previous walk was cut short.
    fn recently_pinged(&self, record: &Sitemap) -> bool {
        record
            .last_crawl
            .is_some_and(|at| Utc::now() - at < self.options.reping_interval)
    }

    fn report(&mut self) {
        self.progress.timestamp = Utc::now();
        self.hooks.on_update(&self.progress);
    }

    /// Count an error and report it without ending the attempt.
    fn fail(&mut self, error: CrawlError) {
        warn!(error = %error, "Crawl error");
        self.progress.status = CrawlStatus::Error;
        self.progress.errors += 1;
        self.progress.message = Some(error.to_string());
        self.hooks.on_error(&error);
        self.report();
        self.progress.status = CrawlStatus::Crawling;
        self.progress.message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSource;
    use crate::store::{Collection, Filter};
    use crate::testing::{FakeWeb, NewsPage, memory_repo, seed_source};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SITE: &str = "https://example.com";

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<CrawlProgress>>,
        errors: Mutex<Vec<String>>,
        halt: AtomicBool,
    }

    impl CrawlHooks for Recorder {
        fn on_update(&self, progress: &CrawlProgress) {
            self.updates.lock().unwrap().push(progress.clone());
        }
        fn on_error(&self, error: &CrawlError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
        fn should_halt(&self) -> bool {
            self.halt.load(Ordering::SeqCst)
        }
    }

    fn robots(sitemaps: &[&str]) -> String {
        let mut body = "User-agent: *\nAllow: /\n".to_string();
        for s in sitemaps {
            body.push_str(&format!("Sitemap: {s}\n"));
        }
        body
    }

    fn index(children: &[&str]) -> String {
        let items: String = children
            .iter()
            .map(|c| format!("<sitemap><loc>{c}</loc></sitemap>"))
            .collect();
        format!(r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{items}</sitemapindex>"#)
    }

    fn urlset(urls: &[&str]) -> String {
        let items: String = urls
            .iter()
            .map(|u| format!("<url><loc>{u}</loc></url>"))
            .collect();
        format!(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{items}</urlset>"#)
    }

    fn crawler(
        repo: &Repository,
        source: Source,
        web: Arc<FakeWeb>,
        hooks: Arc<dyn CrawlHooks>,
    ) -> SitemapCrawler {
        SitemapCrawler::new(source, repo.clone(), web, CrawlOptions::default(), hooks)
    }

    #[tokio::test]
    async fn test_no_sitemaps_completes_without_crawls() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let web = Arc::new(FakeWeb::new().with_page("https://example.com/robots.txt", &robots(&[])));
        let hooks = Arc::new(Recorder::default());

        let report = crawler(&repo, source.clone(), web, hooks.clone()).run().await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.ingested, 0);
        assert_eq!(repo.count(Collection::Crawls, &Filter::All).await.unwrap(), 0);
        let last = hooks.updates.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, CrawlStatus::Completed);
        assert!(repo.source(&source.id).await.unwrap().last_crawl.is_some());
    }

    #[tokio::test]
    async fn test_archive_children_are_skipped() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&["https://example.com/sitemap.xml"]))
                .with_page(
                    "https://example.com/sitemap.xml",
                    &index(&["https://example.com/news.xml", "https://example.com/archive/2020.xml"]),
                )
                .with_page("https://example.com/news.xml", &urlset(&[])),
        );

        let report = crawler(&repo, source, web.clone(), Arc::new(NoHooks)).run().await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(web.hit_count("https://example.com/news.xml"), 1);
        assert_eq!(web.hit_count("https://example.com/archive/2020.xml"), 0);
        assert!(repo.sitemap_by_url("https://example.com/archive/2020.xml").await.unwrap().is_none());

        let index = repo.sitemap_by_url("https://example.com/sitemap.xml").await.unwrap().unwrap();
        assert!(index.verified && !index.news);
        let leaf = repo.sitemap_by_url("https://example.com/news.xml").await.unwrap().unwrap();
        assert!(leaf.verified);
    }

    #[tokio::test]
    async fn test_ingests_urlset_in_order_and_marks_news() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let a = "https://example.com/a";
        let b = "https://example.com/b";
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&["https://example.com/news.xml"]))
                .with_page("https://example.com/news.xml", &urlset(&[a, b]))
                .with_page(a, &NewsPage::recent("First story").html())
                .with_page(b, "<html><body><p>No structured data here at all, sorry.</p></body></html>"),
        );
        let hooks = Arc::new(Recorder::default());

        let report = crawler(&repo, source.clone(), web.clone(), hooks.clone()).run().await;

        assert_eq!(report.ingested, 1);
        assert_eq!(report.errors, 0);
        let pages: Vec<String> = web
            .hits()
            .into_iter()
            .filter(|u| u == a || u == b)
            .collect();
        assert_eq!(pages, vec![a.to_string(), b.to_string()]);

        let crawl_a = repo.crawl_by_url(a).await.unwrap().unwrap();
        let crawl_b = repo.crawl_by_url(b).await.unwrap().unwrap();
        assert!(crawl_a.verified && crawl_a.article.is_some());
        assert!(crawl_b.verified && crawl_b.article.is_none());

        let sitemap = repo.sitemap_by_url("https://example.com/news.xml").await.unwrap().unwrap();
        assert!(sitemap.news && sitemap.verified);
        assert_eq!(repo.source(&source.id).await.unwrap().articles.len(), 1);
        assert!(hooks.updates.lock().unwrap().iter().any(|p| p.progress == 1));
    }

    #[tokio::test]
    async fn test_verified_crawl_is_not_ingested_again() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let page = "https://example.com/seen";
        repo.create_crawl(&NewCrawl {
            source: source.id.clone(),
            name: source.name.clone(),
            url: page.to_string(),
            sitemap: "earlier".to_string(),
            article: None,
            verified: true,
        })
        .await
        .unwrap();
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&["https://example.com/news.xml"]))
                .with_page("https://example.com/news.xml", &urlset(&[page]))
                .with_page(page, &NewsPage::recent("Seen before").html()),
        );

        let report = crawler(&repo, source, web.clone(), Arc::new(NoHooks)).run().await;

        assert_eq!(report.ingested, 0);
        assert_eq!(web.hit_count(page), 0);
        assert_eq!(repo.count(Collection::Crawls, &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_crawl_and_check_never_duplicates() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let c = crawler(&repo, source, Arc::new(FakeWeb::new()), Arc::new(NoHooks));
        let url = "https://example.com/story";

        let first = c.add_crawl_and_check(url, "sm").await.unwrap().unwrap();
        let again = c.add_crawl_and_check(&format!(" {url}"), "sm").await.unwrap().unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(repo.count(Collection::Crawls, &Filter::eq("url", url)).await.unwrap(), 1);

        repo.update_crawl(
            &first.id,
            &CrawlPatch {
                verified: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(c.add_crawl_and_check(url, "sm").await.unwrap().is_none());
        assert_eq!(repo.count(Collection::Crawls, &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revalidation_within_reping_interval_skips_fetch() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let url = "https://example.com/pages.xml";
        let web = Arc::new(FakeWeb::new().with_page(url, &urlset(&[])));
        let mut c = crawler(&repo, source, web.clone(), Arc::new(NoHooks));

        c.validate_sitemap(url).await.unwrap();
        let record = repo.sitemap_by_url(url).await.unwrap().unwrap();
        assert!(record.verified && !record.news);

        c.validate_sitemap(url).await.unwrap();
        assert_eq!(web.hit_count(url), 1);
    }

    #[tokio::test]
    async fn test_news_sitemap_respects_reping_interval() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let url = "https://example.com/news.xml";
        let page = "https://example.com/2026/10/bakery";
        let web = Arc::new(
            FakeWeb::new()
                .with_page(url, &urlset(&[page]))
                .with_page(page, &NewsPage::recent("Local bakery wins award").html()),
        );
        let mut c = crawler(&repo, source, web.clone(), Arc::new(NoHooks));

        c.validate_sitemap(url).await.unwrap();
        let record = repo.sitemap_by_url(url).await.unwrap().unwrap();
        assert!(record.news && record.verified);

        c.validate_sitemap(url).await.unwrap();
        assert_eq!(web.hit_count(url), 1);

        repo.update_sitemap(
            &record.id,
            &SitemapPatch {
                last_crawl: Some(Utc::now() - chrono::Duration::hours(2)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        c.validate_sitemap(url).await.unwrap();
        assert_eq!(web.hit_count(url), 2);
        assert_eq!(web.hit_count(page), 1);
    }

    #[tokio::test]
    async fn test_gone_page_marks_crawl_verified() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let url = "https://example.com/news.xml";
        let gone = "https://example.com/removed";
        let web = Arc::new(
            FakeWeb::new()
                .with_page(url, &urlset(&[gone]))
                .with_status(gone, 404),
        );
        let mut c = crawler(&repo, source.clone(), web.clone(), Arc::new(NoHooks));

        c.validate_sitemap(url).await.unwrap();

        assert_eq!(c.progress().errors, 0);
        let crawl = repo.crawl_by_url(gone).await.unwrap().unwrap();
        assert!(crawl.verified && crawl.article.is_none());
        let fresh = crawler(&repo, source, web, Arc::new(NoHooks));
        assert!(fresh.add_crawl_and_check(gone, "sm").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_page_stays_pending() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let url = "https://example.com/news.xml";
        let flaky = "https://example.com/busy";
        let web = Arc::new(
            FakeWeb::new()
                .with_page(url, &urlset(&[flaky]))
                .with_status(flaky, 503),
        );
        let mut c = crawler(&repo, source, web, Arc::new(NoHooks));

        c.validate_sitemap(url).await.unwrap();

        assert_eq!(c.progress().errors, 1);
        let crawl = repo.crawl_by_url(flaky).await.unwrap().unwrap();
        assert!(!crawl.verified);
        assert!(c.add_crawl_and_check(flaky, "sm").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_waits_out_reping_interval() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let recent = "https://example.com/interrupted.xml";
        let stale = "https://example.com/stale.xml";
        for (url, last_crawl) in [
            (recent, Some(Utc::now() - chrono::Duration::minutes(10))),
            (stale, Some(Utc::now() - chrono::Duration::hours(3))),
        ] {
            repo.create_sitemap(&NewSitemap {
                url: url.into(),
                source: source.id.clone(),
                news: false,
                verified: false,
                last_crawl,
            })
            .await
            .unwrap();
        }
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&[]))
                .with_page(recent, &urlset(&[]))
                .with_page(stale, &urlset(&[])),
        );

        crawler(&repo, source, web.clone(), Arc::new(NoHooks)).run().await;

        assert_eq!(web.hit_count(recent), 0);
        assert_eq!(web.hit_count(stale), 1);
        assert!(!repo.sitemap_by_url(recent).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_malformed_sitemap_aborts_only_its_subtree() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let web = Arc::new(
            FakeWeb::new()
                .with_page(
                    "https://example.com/robots.txt",
                    &robots(&["https://example.com/broken.xml", "https://example.com/ok.xml"]),
                )
                .with_page("https://example.com/broken.xml", "<html>not a sitemap</html>")
                .with_page("https://example.com/ok.xml", &urlset(&[])),
        );
        let hooks = Arc::new(Recorder::default());

        let report = crawler(&repo, source, web.clone(), hooks.clone()).run().await;

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.errors, 1);
        assert_eq!(web.hit_count("https://example.com/ok.xml"), 1);
        let errors = hooks.errors.lock().unwrap();
        assert!(errors[0].contains("malformed sitemap https://example.com/broken.xml"));
        let broken = repo.sitemap_by_url("https://example.com/broken.xml").await.unwrap().unwrap();
        assert!(!broken.verified);
        assert!(
            hooks
                .updates
                .lock()
                .unwrap()
                .iter()
                .any(|p| p.status == CrawlStatus::Error && p.message.is_some())
        );
    }

    #[tokio::test]
    async fn test_hard_limit_stops_further_requests() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let urls: Vec<String> = (0..4).map(|i| format!("https://example.com/s{i}")).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let mut web = FakeWeb::new()
            .with_page("https://example.com/robots.txt", &robots(&["https://example.com/news.xml"]))
            .with_page("https://example.com/news.xml", &urlset(&refs));
        for (i, url) in urls.iter().enumerate() {
            web = web.with_page(url, &NewsPage::recent(&format!("Story {i}")).html());
        }
        let web = Arc::new(web);
        let options = CrawlOptions {
            article_hard_limit: 2,
            ..CrawlOptions::default()
        };

        let report = SitemapCrawler::new(source, repo.clone(), web.clone(), options, Arc::new(NoHooks))
            .run()
            .await;

        assert_eq!(report.ingested, 2);
        assert!(report.halted);
        assert_eq!(web.hit_count(&urls[2]), 0);
        assert_eq!(web.hit_count(&urls[3]), 0);
        let sitemap = repo.sitemap_by_url("https://example.com/news.xml").await.unwrap().unwrap();
        assert!(!sitemap.verified);
    }

    #[tokio::test]
    async fn test_halt_before_start_issues_no_sitemap_fetch() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&["https://example.com/news.xml"]))
                .with_page("https://example.com/news.xml", &urlset(&[])),
        );
        let hooks = Arc::new(Recorder::default());
        hooks.halt.store(true, Ordering::SeqCst);

        let report = crawler(&repo, source, web.clone(), hooks).run().await;

        assert!(report.halted);
        assert_eq!(report.sitemaps_fetched, 0);
        assert_eq!(web.hit_count("https://example.com/news.xml"), 0);
    }

    #[tokio::test]
    async fn test_invalid_source_url_ends_in_error() {
        let repo = memory_repo();
        let source = repo
            .create_source(&NewSource {
                name: "Broken".into(),
                url: "not a url".into(),
                last_crawl: None,
                logo: String::new(),
                articles: vec![],
            })
            .await
            .unwrap();
        let report = crawler(&repo, source, Arc::new(FakeWeb::new()), Arc::new(NoHooks))
            .run()
            .await;
        assert_eq!(report.status, CrawlStatus::Error);
        assert_eq!(report.errors, 1);
    }

    #[tokio::test]
    async fn test_sweep_resumes_unverified_sitemaps() {
        let repo = memory_repo();
        let source = seed_source(&repo, SITE).await;
        repo.create_sitemap(&NewSitemap {
            url: "https://example.com/left-over.xml".into(),
            source: source.id.clone(),
            news: false,
            verified: false,
            last_crawl: None,
        })
        .await
        .unwrap();
        let web = Arc::new(
            FakeWeb::new()
                .with_page("https://example.com/robots.txt", &robots(&[]))
                .with_page("https://example.com/left-over.xml", &urlset(&[])),
        );

        crawler(&repo, source, web.clone(), Arc::new(NoHooks)).run().await;

        assert_eq!(web.hit_count("https://example.com/left-over.xml"), 1);
        let record = repo.sitemap_by_url("https://example.com/left-over.xml").await.unwrap().unwrap();
        assert!(record.verified);
    }
}
