//! Error taxonomy shared across the crawl and rewrite pipeline.
//!
//! Each stage owns a small `thiserror` enum. Extraction and classification
//! failures are values the caller inspects (see [`IngestError::is_rejection`]),
//! while transport and persistence failures are the ones that end up in the
//! crawler's `on_error` hook.

use crate::store::Collection;
use thiserror::Error;

/// Outbound HTTP failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect/timeout/body failures and throttling or server-side statuses.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Non-retryable HTTP status (404, 403, ...).
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    /// Only network-class failures of idempotent GETs are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and 5xx are transient and become [`FetchError::Network`];
    /// anything else is a final [`FetchError::Status`].
    pub fn from_status(url: &str, status: u16) -> Self {
        if status == 408 || status == 429 || status >= 500 {
            FetchError::Network {
                url: url.to_string(),
                message: format!("HTTP {status}"),
            }
        } else {
            FetchError::Status {
                url: url.to_string(),
                status,
            }
        }
    }

    /// Transport failures are always network-class.
    pub(crate) fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Document store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: String },

    /// Store-side schema rejection; the write is abandoned.
    #[error("{collection} record rejected: {reason}")]
    Validation {
        collection: Collection,
        reason: String,
    },

    /// A stored document did not decode into its typed record.
    #[error("{collection} record could not be decoded: {source}")]
    Decode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a page did not become an Article.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("The article already exists in the database")]
    DuplicateArticle,

    #[error("No accepted and recent NewsArticle structured data was found on the page")]
    SchemaMissing,

    #[error("Essential article fields are missing after merge: {}", .missing.join(", "))]
    IncompleteArticle { missing: Vec<&'static str> },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Rejections are terminal for the URL: the Crawl is marked verified
    /// and never retried.
    ///
    /// A page that answers a final HTTP status (404, 410, 403) or has an
    /// unusable URL is a rejection too. Only network-class fetch failures
    /// and store failures are operational.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IngestError::DuplicateArticle
                | IngestError::SchemaMissing
                | IngestError::IncompleteArticle { .. }
                | IngestError::Fetch(FetchError::Status { .. } | FetchError::InvalidUrl { .. })
        )
    }
}

/// Language model failure.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Http(String),

    #[error("LLM API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Stream read, JSON parse, or output-contract failure.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),
}

impl LlmError {
    /// Transport errors, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::MalformedModelOutput(_) => false,
        }
    }
}

/// Failure of a pipeline stage (Validity Gate or Rewrite Engine).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure surfaced by the sitemap crawler.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sitemap XML absent or unparseable; aborts that subtree only.
    #[error("malformed sitemap {url}: {reason}")]
    MalformedSitemap { url: String, reason: String },

    /// A page fetch failed with a network-class error while resolving a
    /// urlset entry; the Crawl stays unverified and is picked up again on a
    /// later run.
    #[error("ingest of {url} failed: {source}")]
    Ingest {
        url: String,
        #[source]
        source: IngestError,
    },

    #[error("invalid source URL {url}: {reason}")]
    InvalidSource { url: String, reason: String },

    #[error("source {0} already has an active crawler")]
    AlreadyRunning(String),

    #[error("crawler task for source {source_id} ended abnormally: {reason}")]
    Aborted { source_id: String, reason: String },
}

/// Configuration file failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A numeric setting that cannot be turned into a duration.
    #[error("config value {field} = {value} is out of range")]
    OutOfRange { field: &'static str, value: i64 },
}
