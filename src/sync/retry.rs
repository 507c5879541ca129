//! Exponential backoff for provider fetches
//!
//! Transient failures (timeouts, refused connections, 5xx, 429) are retried
//! with exponentially growing, optionally jittered delays. A 429 with a
//! Retry-After hint waits for the hinted time instead, capped at the
//! configured maximum.

use crate::config::RetryConfig;
use crate::error::{FetchError, RetryableError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors that may carry an upstream-provided delay before the next attempt
pub trait RetryHint {
    /// Delay requested by the upstream, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryHint for FetchError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Retry manager with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Create a new RetryManager with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an async operation, retrying retryable errors
    ///
    /// Runs at most `max_retries + 1` times and returns the last error once
    /// attempts are exhausted.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + RetryHint + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.config.max_retries => {
                    warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "Max retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let backoff = match err.retry_after() {
                        Some(hint) => hint.min(self.max_backoff()),
                        None => self.calculate_backoff(attempt),
                    };
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff for a given attempt number
    ///
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff_ms`; with
    /// jitter the result is scaled into 50-100% of that value.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_backoff_ms as f64);

        let delay = if self.config.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay / 1000.0)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.config.max_backoff_ms)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
