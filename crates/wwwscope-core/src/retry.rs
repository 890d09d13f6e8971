//! Exponential backoff for transient failures.
//!
//! Delay schedule: `min(base_delay * exponential_base^attempt, max_delay)`,
//! where `attempt` counts from zero for the first retry.

use std::future::Future;
use std::time::Duration;

use crate::error::ArchiveError;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    /// 3 attempts, 2 s then 4 s, capped at 30 s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            // Odd powers of a negative base go below zero.
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Run `operation`, retrying errors for which
    /// [`ArchiveError::is_retryable`] holds.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
    {
        self.run_if(ArchiveError::is_retryable, operation).await
    }

    /// Run `operation`, retrying errors accepted by `retryable`.
    ///
    /// Non-retryable errors are returned unchanged and immediately. When the
    /// attempts run out the last error is wrapped in
    /// [`ArchiveError::RetriesExhausted`].
    pub async fn run_if<T, F, Fut, P>(
        &self,
        retryable: P,
        mut operation: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchiveError>>,
        P: Fn(&ArchiveError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(e),
                Err(e) => {
                    if attempt + 1 >= attempts {
                        tracing::warn!(attempts, error = %e, "All attempts failed");
                        return Err(ArchiveError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tracing::info!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
