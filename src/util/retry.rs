//! Bounded retry with optional exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::OAuthError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt. Zero retries immediately.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(2)
    }
}

impl RetryPolicy {
    /// `max_attempts` immediate attempts.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// One attempt plus `retries` more.
    pub fn with_retries(retries: u32) -> Self {
        Self::attempts(retries.saturating_add(1))
    }

    /// Exponential backoff doubling from `initial` up to `max`.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.multiplier = 2.0;
        self
    }

    /// Run `operation` until it succeeds or attempts run out; the last
    /// error is returned.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, OAuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OAuthError>>,
    {
        self.execute_if(|_| true, operation).await
    }

    /// Like [`RetryPolicy::execute`], but an error rejected by `retryable`
    /// is returned at once.
    pub async fn execute_if<P, F, Fut, T>(
        &self,
        retryable: P,
        mut operation: F,
    ) -> Result<T, OAuthError>
    where
        P: Fn(&OAuthError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OAuthError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts || !retryable(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                        backoff = Duration::from_secs_f64(
                            (backoff.as_secs_f64() * self.multiplier)
                                .min(self.max_backoff.as_secs_f64()),
                        );
                    }
                }
            }
        }
    }
}
