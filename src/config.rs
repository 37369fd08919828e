//! YAML configuration.
//!
//! Every key is optional; a missing file means all defaults. Command-line
//! flags are applied on top by the binary.
//!
//! ```yaml
//! store_dir: ./data
//! crawler:
//!   article_hard_limit: 10
//!   skip_substring: archive
//! extraction:
//!   recency_days: 5
//! llm:
//!   base_url: http://127.0.0.1:1234/v1
//!   processor_model: qwen/qwen3-4b
//! ```

use crate::crawler::CrawlOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use chrono::TimeDelta;
use std::time::Duration;
use tracing::{debug, info};

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "newswire.yaml";

/// Top-level configuration, read from YAML.
///
/// Every section is optional. Missing keys take the defaults below, unknown
/// keys are an error.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Directory of the JSON-file document store.
    pub store_dir: String,
    pub crawler: CrawlerConfig,
    pub extraction: ExtractionConfig,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: "./data".to_string(),
            crawler: CrawlerConfig::default(),
            extraction: ExtractionConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// Crawler and page fetch settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlerConfig {
    /// Extra attempts after a network-class fetch failure.
    pub retry_count: usize,
    pub retry_delay_ms: u64,
    pub article_hard_limit: u32,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Seconds before an already-walked sitemap is fetched again.
    pub reping_interval_secs: i64,
    /// Sitemap URLs containing this substring are never walked.
    pub skip_substring: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 200,
            article_hard_limit: 10,
            user_agent: "Mozilla/5.0".to_string(),
            timeout_secs: 5,
            reping_interval_secs: 3600,
            skip_substring: "archive".to_string(),
        }
    }
}

/// Page extraction settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Maximum age of `datePublished` for a page to count as news.
    pub recency_days: i64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { recency_days: 5 }
    }
}

/// Settings for the OpenAI-compatible chat backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub base_url: String,
    /// Sent as a bearer token; local servers usually need none.
    pub api_key: Option<String>,
    pub validator_model: String,
    pub processor_model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    /// Attempts on transport errors, 429 and 5xx answers.
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Reject rewrites that break the word/paragraph/category contract.
    pub enforce_rewrite_constraints: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:1234/v1".to_string(),
            api_key: None,
            validator_model: "qwen/qwen3-4b".to_string(),
            processor_model: "qwen/qwen3-4b".to_string(),
            temperature: 0.1,
            timeout_secs: 300,
            max_retries: 5,
            retry_base_delay_ms: 1000,
            enforce_rewrite_constraints: true,
        }
    }
}

impl AppConfig {
    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] when `None`.
    ///
    /// An explicitly named file must exist; the default one may be absent.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (DEFAULT_CONFIG_FILE, false),
        };
        if !required && !Path::new(path).exists() {
            debug!(path, "No config file; using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.crawl_options()?;
        info!(path, "Loaded configuration");
        Ok(config)
    }

    /// Parse a YAML document. Blank input is the default configuration.
    ///
    /// # Errors
    ///
    /// Unknown keys and mistyped values are rejected by `serde_yaml`.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Build the crawler's options from the `crawler` and `extraction`
    /// sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] when `reping_interval_secs` or
    /// `recency_days` is negative or too large for a [`TimeDelta`].
    pub fn crawl_options(&self) -> Result<CrawlOptions, ConfigError> {
        let c = &self.crawler;
        let reping_interval = duration(
            "crawler.reping_interval_secs",
            c.reping_interval_secs,
            TimeDelta::try_seconds,
        )?;
        let recency_window = duration(
            "extraction.recency_days",
            self.extraction.recency_days,
            TimeDelta::try_days,
        )?;

        Ok(CrawlOptions {
            retry_count: c.retry_count,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            article_hard_limit: c.article_hard_limit,
            user_agent: c.user_agent.clone(),
            timeout: Duration::from_secs(c.timeout_secs),
            reping_interval,
            skip_substring: c.skip_substring.clone(),
            recency_window,
        })
    }
}

/// Negative values and values chrono cannot represent are rejected.
fn duration(
    field: &'static str,
    value: i64,
    make: fn(i64) -> Option<TimeDelta>,
) -> Result<TimeDelta, ConfigError> {
    make(value)
        .filter(|_| value >= 0)
        .ok_or(ConfigError::OutOfRange { field, value })
}
