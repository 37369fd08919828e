//! Exponential backoff for [`ChatModel`] calls.
//!
//! The delay between attempts follows:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//! Only [`LlmError::is_retryable`] failures are retried. For streamed
//! completions only opening the stream is retried; once deltas flow, a
//! read failure belongs to the caller.

use super::{ChatModel, ChatRequest, EventStream};
use crate::error::LlmError;
use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Wrapper that adds exponential backoff retry logic to any [`ChatModel`].
pub struct RetryModel<T> {
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T: ChatModel> RetryModel<T> {
    /// # Arguments
    ///
    /// * `inner` - The underlying model client to wrap
    /// * `max_retries` - Maximum number of retry attempts (5 recommended)
    /// * `base_delay` - Initial delay between retries (1 second recommended)
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }

    async fn with_retries<R, F, Fut>(&self, op: &str, mut call: F) -> Result<R, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, LlmError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match call().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() {
                        warn!(op, error = %e, "Non-retryable model failure");
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            op,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "Model call exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        op,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "Model call failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryModel")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T: ChatModel> ChatModel for RetryModel<T> {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.with_retries("complete", || self.inner.complete(request))
            .await
    }

    #[instrument(level = "info", skip_all)]
    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, LlmError> {
        self.with_retries("stream", || self.inner.stream(request)).await
    }
}
