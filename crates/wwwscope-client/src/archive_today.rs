//! Archive.today adapter with mirror failover.
//!
//! Each invocation walks a (shuffled) list of mirrors. Within a mirror the
//! configured [`PageSubmitter`] is tried a few times with exponential
//! backoff; a CAPTCHA or a 429 abandons that mirror for the next one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wwwscope_core::{
    ArchiveError, ArchiveResult, PageOutcome, PageSubmitter, RateLimiter, RetryPolicy,
    ServiceAdapter, ServiceName,
};

const SERVICE: ServiceName = ServiceName::ArchiveToday;

/// Known Archive.today mirrors.
pub const DEFAULT_MIRRORS: [&str; 4] = [
    "https://archive.today",
    "https://archive.ph",
    "https://archive.is",
    "https://archive.fo",
];

const CAPTCHA_MARKERS: [&str; 3] = ["captcha", "challenge-form", "cf-chl"];

/// Best-effort CAPTCHA detection on a response body.
pub fn looks_like_captcha(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CAPTCHA_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Mirrors and timing for [`ArchiveTodayAdapter`].
#[derive(Debug, Clone)]
pub struct ArchiveTodayConfig {
    pub mirrors: Vec<String>,
    /// Randomise mirror order per invocation to spread load.
    pub shuffle_mirrors: bool,
    /// Attempts per mirror and backoff between them (2 s, 4 s, …).
    pub retry: RetryPolicy,
    /// Pause before moving on to the next mirror.
    pub mirror_pause: Duration,
    pub rate_limit_timeout: Duration,
}

impl Default for ArchiveTodayConfig {
    fn default() -> Self {
        Self {
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            shuffle_mirrors: true,
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
            mirror_pause: Duration::from_secs(2),
            rate_limit_timeout: Duration::from_secs(30),
        }
    }
}

impl ArchiveTodayConfig {
    pub fn with_mirrors<I, S>(mut self, mirrors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mirrors = mirrors
            .into_iter()
            .map(|m| m.into().trim_end_matches('/').to_string())
            .collect();
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle_mirrors = shuffle;
        self
    }

    pub fn with_attempts_per_mirror(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry = RetryPolicy::new(attempts, base_delay);
        self
    }

    pub fn with_mirror_pause(mut self, pause: Duration) -> Self {
        self.mirror_pause = pause;
        self
    }

    pub fn with_rate_limit_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit_timeout = timeout;
        self
    }
}

/// Adapter for Archive.today and its mirrors.
#[derive(Clone)]
pub struct ArchiveTodayAdapter {
    submitter: Arc<dyn PageSubmitter>,
    limiter: RateLimiter,
    config: ArchiveTodayConfig,
}

impl ArchiveTodayAdapter {
    pub fn new(
        submitter: Arc<dyn PageSubmitter>,
        limiter: RateLimiter,
        config: ArchiveTodayConfig,
    ) -> Self {
        Self {
            submitter,
            limiter,
            config,
        }
    }

    /// Mirror order for one invocation.
    pub fn mirror_order(&self) -> Vec<String> {
        let mut mirrors = self.config.mirrors.clone();
        if self.config.shuffle_mirrors {
            shuffle(&mut mirrors);
        }
        mirrors
    }
}

#[async_trait]
impl ServiceAdapter for ArchiveTodayAdapter {
    fn service(&self) -> ServiceName {
        SERVICE
    }

    async fn submit(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        let mirrors = self.mirror_order();
        let attempts = self.config.retry.max_attempts.max(1);
        let mut log = Vec::new();

        for (idx, mirror) in mirrors.iter().enumerate() {
            tracing::info!(
                service = %SERVICE,
                submitter = self.submitter.name(),
                %mirror,
                mirror_index = idx + 1,
                mirrors = mirrors.len(),
                "Trying mirror"
            );

            for attempt in 0..attempts {
                if let Err(e) = self
                    .limiter
                    .acquire_or_err(SERVICE.as_str(), self.config.rate_limit_timeout)
                    .await
                {
                    return Ok(ArchiveResult::from_error(&e));
                }

                match self.submitter.submit_form(mirror, url).await {
                    Ok(PageOutcome::Archived(archived)) => {
                        tracing::info!(service = %SERVICE, %mirror, %archived, "Archived");
                        return Ok(ArchiveResult::success(format!(
                            "Successfully archived at Archive.today via {mirror}"
                        ))
                        .with_url(archived.clone())
                        .with_details(json!({
                            "archived_url": archived,
                            "mirror": mirror,
                            "submitter": self.submitter.name(),
                        })));
                    }
                    Ok(PageOutcome::Captcha) => {
                        tracing::warn!(service = %SERVICE, %mirror, "CAPTCHA detected");
                        log.push(format!("{mirror}: CAPTCHA"));
                        break;
                    }
                    Err(e) if e.is_rate_limit() => {
                        tracing::warn!(service = %SERVICE, %mirror, error = %e, "Mirror rate limited");
                        log.push(format!("{mirror}: rate limited"));
                        break;
                    }
                    Ok(PageOutcome::Unconfirmed) => {
                        tracing::info!(
                            service = %SERVICE,
                            %mirror,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            "Submitted but no snapshot found"
                        );
                        log.push(format!("{mirror}: unconfirmed"));
                    }
                    Err(e) => {
                        tracing::warn!(
                            service = %SERVICE,
                            %mirror,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            error = %e,
                            "Attempt failed"
                        );
                        log.push(format!("{mirror}: {e}"));
                    }
                }

                if attempt + 1 < attempts {
                    tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                }
            }

            if idx + 1 < mirrors.len() {
                tokio::time::sleep(self.config.mirror_pause).await;
            }
        }

        Ok(ArchiveResult::failure(
            "Archive.today archiving failed on all mirrors (CAPTCHA protection, high load, or a blocked URL)",
        )
        .with_details(json!({ "attempts": log }))
        .with_guidance(format!(
            "Visit https://archive.today directly, submit {url} manually and complete any CAPTCHA."
        )))
    }

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        wwwscope_core::links::link_result(SERVICE, url).ok_or_else(|| {
            ArchiveError::Config(format!("no retrieval link template for {SERVICE}"))
        })
    }
}

/// Fisher-Yates over a clock-seeded xorshift64; spreads load, not crypto.
fn shuffle<T>(items: &mut [T]) {
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
        | 1;
    for i in (1..items.len()).rev() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let j = (x % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}
