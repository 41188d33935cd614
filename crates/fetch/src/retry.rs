use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::FetchError;

/// Bounded retries with exponential backoff: the wait after attempt `n`
/// is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(val) => {
                    if attempt > 1 {
                        info!(what, attempt, max_attempts, "succeeded after retries");
                    }
                    return Ok(val);
                }
                Err(err) if !err.is_retryable() || attempt >= max_attempts => return Err(err),
                Err(err) => {
                    let backoff = self.delay_after(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
