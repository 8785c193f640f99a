//! Interval polling bounded by wall-clock time.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{OAuthError, Result};

/// What a single poll attempt decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision<T> {
    /// Done; stop polling with this value.
    Ready(T),
    /// Not yet; poll again after the current interval.
    Pending,
    /// Not yet; grow the interval by the policy's step first.
    SlowDown,
}

/// Polling schedule.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Added to the interval on every [`PollDecision::SlowDown`].
    pub slow_down_step: Duration,
    /// Polling fails once more than this has elapsed since `started`.
    pub max_elapsed: Duration,
}

impl PollPolicy {
    /// Sleep, run `guard`, enforce the deadline, then run `attempt`;
    /// repeat until `attempt` returns [`PollDecision::Ready`] or anything
    /// fails.
    pub async fn run<T, G, F, Fut>(&self, started: Instant, mut guard: G, mut attempt: F) -> Result<T>
    where
        G: FnMut() -> Result<()>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollDecision<T>>>,
    {
        let mut interval = self.interval;
        loop {
            tokio::time::sleep(interval).await;
            guard()?;

            let elapsed = started.elapsed();
            if elapsed > self.max_elapsed {
                return Err(OAuthError::PollingTooLong {
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            match attempt().await? {
                PollDecision::Ready(value) => return Ok(value),
                PollDecision::Pending => {
                    tracing::debug!(interval_secs = interval.as_secs(), "poll pending");
                }
                PollDecision::SlowDown => {
                    interval += self.slow_down_step;
                    tracing::debug!(interval_secs = interval.as_secs(), "poll slowed down");
                }
            }
        }
    }
}
