//! # Newswire
//!
//! Discovers news articles through the sitemaps a site lists in its
//! robots.txt, extracts them, keeps only pages carrying recent schema.org
//! NewsArticle data, gates them through an LLM and rewrites them into
//! publishable copy.
//!
//! ## Architecture
//!
//! The pipeline runs in stages over a shared document store:
//! 1. **Crawling**: [`crawler`] walks robots.txt and sitemaps per source and
//!    records every leaf URL as a Crawl
//! 2. **Ingesting**: [`ingest`] merges [`extract`] output into an Article
//! 3. **Gating**: [`gate`] asks the model whether the content is usable
//! 4. **Rewriting**: [`rewrite`] streams a constrained rewrite back
//!
//! [`pipeline`] drives stages 3 and 4 one article at a time.

pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod gate;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod rewrite;
pub mod robots;
pub mod sitemap;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory doubles for the network, the model and the store.

    use crate::error::{FetchError, LlmError};
    use crate::fetch::PageFetcher;
    use crate::llm::{ChatModel, ChatRequest, EventStream, StreamEvent};
    use crate::models::{Crawl, NewCrawl, NewSource, Source};
    use crate::store::Repository;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use futures::stream::{self, StreamExt};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Repository over a fresh in-memory store.
    pub fn memory_repo() -> Repository {
        Repository::new(Arc::new(MemoryStore::new()))
    }

    /// Insert a source named "Example News" at `url`.
    pub async fn seed_source(repo: &Repository, url: &str) -> Source {
        repo.create_source(&NewSource {
            name: "Example News".into(),
            url: url.into(),
            last_crawl: None,
            logo: String::new(),
            articles: vec![],
        })
        .await
        .unwrap()
    }

    /// Insert an unverified crawl record for `url`.
    pub async fn seed_crawl(repo: &Repository, source: &Source, url: &str) -> Crawl {
        repo.create_crawl(&NewCrawl {
            source: source.id.clone(),
            name: source.name.clone(),
            url: url.into(),
            sitemap: "seed-sitemap".into(),
            article: None,
            verified: false,
        })
        .await
        .unwrap()
    }

    enum Reply {
        Body(String),
        Status(u16),
    }

    /// A fixed set of URLs. Anything else answers 404. Statuses are
    /// classified the way the HTTP fetcher classifies them.
    #[derive(Default)]
    pub struct FakeWeb {
        pages: HashMap<String, Reply>,
        hits: Mutex<Vec<String>>,
    }

    impl FakeWeb {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), Reply::Body(body.to_string()));
            self
        }

        /// Answer `url` with `status`.
        pub fn with_status(mut self, url: &str, status: u16) -> Self {
            self.pages.insert(url.to_string(), Reply::Status(status));
            self
        }

        /// Requested URLs in request order.
        pub fn hits(&self) -> Vec<String> {
            self.hits.lock().unwrap().clone()
        }

        pub fn hit_count(&self, url: &str) -> usize {
            self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeWeb {
        async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
            self.hits.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(Reply::Body(body)) => Ok(body.clone()),
                Some(Reply::Status(status)) => Err(FetchError::from_status(url, *status)),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    /// A news page carrying a complete JSON-LD NewsArticle record.
    #[derive(Debug, Clone)]
    pub struct NewsPage {
        pub headline: String,
        pub page_title: String,
        pub published: DateTime<Utc>,
        pub author: Option<String>,
    }

    impl NewsPage {
        /// A page published six hours ago.
        pub fn recent(headline: &str) -> Self {
            Self {
                headline: headline.to_string(),
                page_title: "Draft title from the page | Example News".to_string(),
                published: Utc::now() - Duration::hours(6),
                author: Some("Ana Ruiz".to_string()),
            }
        }

        pub fn html(&self) -> String {
            let mut record = json!({
                "@context": "https://schema.org",
                "@type": "NewsArticle",
                "headline": self.headline,
                "datePublished": self.published.to_rfc3339(),
                "keywords": ["bakery", "awards"],
                "inLanguage": "en",
                "thumbnailUrl": "https://cdn.example.com/bakery.jpg",
            });
            if let Some(author) = &self.author {
                record["author"] = json!({ "@type": "Person", "name": author });
            }
            format!(
                r#"<html><head><title>{title}</title>
<script type="application/ld+json">{record}</script>
</head><body><article>
<p>The bakery on Main Street took first prize at the regional fair this weekend.</p>
<p>Judges praised the sourdough, which the owners have baked every morning for twenty years.</p>
<p>The prize money will go toward a second oven and an apprenticeship for a local student.</p>
</article></body></html>"#,
                title = self.page_title,
            )
        }
    }

    /// Replays queued replies; `complete` and `stream` share one queue.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a successful answer.
        pub fn reply(self, text: impl Into<String>) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.into()));
            self
        }

        /// Queue a failure.
        pub fn fail(self, error: LlmError) -> Self {
            self.replies.lock().unwrap().push_back(Err(error));
            self
        }

        /// Every request received, in order.
        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Http("script exhausted".into())))
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.next(request)
        }

        /// Splits the reply into small deltas followed by the end marker.
        async fn stream(&self, request: &ChatRequest) -> Result<EventStream, LlmError> {
            let text = self.next(request)?;
            let chars: Vec<char> = text.chars().collect();
            let mut events: Vec<Result<StreamEvent, LlmError>> = chars
                .chunks(7)
                .map(|chunk| Ok(StreamEvent::Delta(Some(chunk.iter().collect()))))
                .collect();
            events.push(Ok(StreamEvent::End));
            Ok(stream::iter(events).boxed())
        }
    }
}
