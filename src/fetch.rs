//! Outbound HTTP fetching with a fixed-delay retry decorator.
//!
//! The module mirrors the decorator layout used for the LLM client:
//! - [`PageFetcher`]: core trait, "give me the body of this URL"
//! - [`HttpFetcher`]: `reqwest` implementation with timeout and headers
//! - [`RetryFetch`]: wraps any [`PageFetcher`] and retries network-class failures
//!
//! Only [`FetchError::Network`] failures are retried: connection errors,
//! timeouts, body read errors, and 408/429/5xx answers. A 404 or a 403 is
//! final on the first attempt.

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Knobs for the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Retries after the first attempt.
    pub retry_count: usize,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            timeout: Duration::from_secs(5),
            headers: BTreeMap::new(),
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Fetches the text body of a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for Arc<T> {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch_text(url).await
    }
}

/// `reqwest` backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client with the configured user agent, timeout and headers.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] if a header name or value is invalid, or
    /// [`FetchError::Network`] if the client cannot be built.
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                FetchError::InvalidUrl {
                    url: String::new(),
                    reason: format!("bad header name {name}: {e}"),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidUrl {
                url: String::new(),
                reason: format!("bad header value for {name}: {e}"),
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::from_reqwest("", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(status, elapsed_ms = t0.elapsed().as_millis() as u64, "Non-success status");
            return Err(FetchError::from_status(url, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        debug!(bytes = body.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched");
        Ok(body)
    }
}

/// Retries a [`PageFetcher`] a bounded number of times with a fixed delay.
pub struct RetryFetch<T> {
    inner: T,
    retries: usize,
    delay: Duration,
}

impl<T: PageFetcher> RetryFetch<T> {
    /// Wrap `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher to retry
    /// * `retries` - Extra attempts after the first one
    /// * `delay` - Pause between attempts
    pub fn new(inner: T, retries: usize, delay: Duration) -> Self {
        Self {
            inner,
            retries,
            delay,
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .finish()
    }
}

#[async_trait]
impl<T: PageFetcher> PageFetcher for RetryFetch<T> {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.inner.fetch_text(url).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.retries {
                        error!(%url, attempt, max = self.retries, error = %e, "Max retries exceeded");
                        return Err(e);
                    }
                    warn!(%url, attempt, max = self.retries, delay = ?self.delay, error = %e, "Retrying request");
                    sleep(self.delay).await;
                }
            }
        }
    }
}

/// The production fetcher: HTTP client wrapped in the retry policy.
pub fn http_fetcher(options: &FetchOptions) -> Result<RetryFetch<HttpFetcher>, FetchError> {
    Ok(RetryFetch::new(
        HttpFetcher::new(options)?,
        options.retry_count,
        options.retry_delay,
    ))
}
