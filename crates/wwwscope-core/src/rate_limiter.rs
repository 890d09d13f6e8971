//! Per-service token-bucket admission control.
//!
//! Archive services ban aggressive clients quickly, so every outbound call
//! takes a token from the bucket of the service it targets. Buckets refill
//! continuously at a per-service rate up to a burst capacity.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use wwwscope_core::rate_limiter::{BucketLimit, RateLimitConfig, RateLimiter};
//!
//! # async fn run() {
//! let config = RateLimitConfig::default()
//!     .with_limit("wayback_machine", BucketLimit::new(0.2, 2.0));
//! let limiter = RateLimiter::new(config);
//!
//! if limiter.acquire("wayback_machine", 1.0, Some(Duration::from_secs(30))).await {
//!     // make the request
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ArchiveError;

/// Longest single sleep while waiting for tokens.
const MAX_WAIT_STEP: Duration = Duration::from_secs(1);
const MIN_WAIT_STEP: Duration = Duration::from_millis(1);

/// Refill rate and burst size of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimit {
    /// Tokens added per second.
    pub rate_per_sec: f64,
    /// Maximum tokens held (burst size).
    pub capacity: f64,
}

impl BucketLimit {
    pub const fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
        }
    }
}

/// Static table of per-service limits with a fallback for unknown keys.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    limits: HashMap<String, BucketLimit>,
    default: BucketLimit,
}

impl RateLimitConfig {
    /// Empty table; every key gets `default`.
    pub fn uniform(default: BucketLimit) -> Self {
        Self {
            limits: HashMap::new(),
            default,
        }
    }

    pub fn with_limit(mut self, service: impl Into<String>, limit: BucketLimit) -> Self {
        self.limits.insert(service.into(), limit);
        self
    }

    pub fn with_default(mut self, limit: BucketLimit) -> Self {
        self.default = limit;
        self
    }

    pub fn limit_for(&self, service: &str) -> BucketLimit {
        self.limits.get(service).copied().unwrap_or(self.default)
    }
}

impl Default for RateLimitConfig {
    /// Conservative limits: one Wayback request per 5 s, one Archive.today
    /// request per 10 s, one Memento request per 2 s.
    fn default() -> Self {
        Self::uniform(BucketLimit::new(0.33, 2.0))
            .with_limit("wayback_machine", BucketLimit::new(0.2, 2.0))
            .with_limit("archive_today", BucketLimit::new(0.1, 1.0))
            .with_limit("memento", BucketLimit::new(0.5, 3.0))
            .with_limit("internet_archive", BucketLimit::new(0.2, 1.0))
    }
}

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateBucket {
    fn full(limit: BucketLimit, now: Instant) -> Self {
        Self {
            tokens: limit.capacity,
            capacity: limit.capacity,
            refill_rate: limit.rate_per_sec,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then debit `wanted` tokens. On shortfall returns how long to
    /// sleep before checking again.
    fn try_take(&mut self, wanted: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= wanted {
            self.tokens -= wanted;
            return Ok(());
        }
        let step = if self.refill_rate > 0.0 {
            ((wanted - self.tokens) / self.refill_rate).min(MAX_WAIT_STEP.as_secs_f64())
        } else {
            MAX_WAIT_STEP.as_secs_f64()
        };
        Err(Duration::from_secs_f64(step).max(MIN_WAIT_STEP))
    }
}

/// Process-wide token buckets, one per service key, created lazily.
///
/// Cheap to clone; clones share the same buckets. Each bucket has its own
/// lock held only for refill+debit, so callers of different services never
/// wait on each other and nobody sleeps while holding a lock.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<Mutex<HashMap<String, Arc<Mutex<RateBucket>>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bucket(&self, service: &str) -> Arc<Mutex<RateBucket>> {
        let mut buckets = lock(&self.buckets);
        buckets
            .entry(service.to_string())
            .or_insert_with(|| {
                let limit = self.config.limit_for(service);
                Arc::new(Mutex::new(RateBucket::full(limit, Instant::now())))
            })
            .clone()
    }

    /// Take `tokens` from the bucket of `service`, waiting if necessary.
    ///
    /// Returns `false` once `timeout` has elapsed without enough tokens, or
    /// immediately when `tokens` exceeds the bucket capacity. `None` waits
    /// as long as it takes.
    pub async fn acquire(&self, service: &str, tokens: f64, timeout: Option<Duration>) -> bool {
        let bucket = self.bucket(service);
        let start = Instant::now();

        loop {
            let wait = {
                let mut b = lock(&bucket);
                if tokens > b.capacity {
                    tracing::warn!(
                        %service,
                        tokens,
                        capacity = b.capacity,
                        "Requested more tokens than the bucket can ever hold"
                    );
                    return false;
                }
                match b.try_take(tokens, Instant::now()) {
                    Ok(()) => return true,
                    Err(wait) => wait,
                }
            };

            let wait = match timeout {
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        tracing::debug!(%service, waited_ms = %elapsed.as_millis(), "Rate limit wait timed out");
                        return false;
                    }
                    wait.min(limit - elapsed)
                }
                None => wait,
            };

            tracing::debug!(%service, sleep_ms = %wait.as_millis(), "Waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token or fail with [`ArchiveError::RateLimitTimeout`].
    pub async fn acquire_or_err(
        &self,
        service: &str,
        timeout: Duration,
    ) -> Result<(), ArchiveError> {
        if self.acquire(service, 1.0, Some(timeout)).await {
            Ok(())
        } else {
            Err(ArchiveError::RateLimitTimeout {
                service: service.to_string(),
                waited_secs: timeout.as_secs(),
            })
        }
    }

    /// Refill a bucket to capacity (manual recovery).
    pub fn reset(&self, service: &str) {
        let existing = lock(&self.buckets).get(service).cloned();
        if let Some(bucket) = existing {
            let mut b = lock(&bucket);
            b.tokens = b.capacity;
            b.last_refill = Instant::now();
            tracing::info!(%service, "Rate limit bucket reset");
        }
    }

    /// Tokens currently available for `service`, after refill. `None` if the
    /// bucket has not been created yet.
    pub fn available(&self, service: &str) -> Option<f64> {
        let bucket = lock(&self.buckets).get(service).cloned()?;
        let mut b = lock(&bucket);
        b.refill(Instant::now());
        Some(b.tokens)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Acquire a std mutex, recovering from poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned rate limiter mutex");
        poisoned.into_inner()
    })
}
