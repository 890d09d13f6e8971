//! Wayback Machine adapter: check for an existing snapshot, submit to
//! Save Page Now, then poll until the capture shows up.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use wwwscope_core::{
    ArchiveError, ArchiveResult, RateLimiter, RetryPolicy, ServiceAdapter, ServiceName,
    retrieval_link,
};

use crate::http::{classify, retry_after, snippet, status_error};
use crate::session::SessionPool;

const SERVICE: ServiceName = ServiceName::WaybackMachine;

/// Endpoints and timing for [`WaybackAdapter`].
#[derive(Debug, Clone)]
pub struct WaybackConfig {
    pub availability_url: String,
    pub save_url: String,
    /// Delays between verification polls.
    pub poll_schedule: Vec<Duration>,
    pub max_poll_attempts: usize,
    /// Budget for a whole submission, counted from the first request. Keep
    /// it below the dispatcher's service timeout so `Pending` can be reported.
    pub max_wait: Duration,
    /// Upper bound on one availability lookup, retries included.
    pub check_timeout: Duration,
    pub rate_limit_timeout: Duration,
    /// Applied to availability lookups only; the save POST is never retried.
    pub retry: RetryPolicy,
}

impl Default for WaybackConfig {
    fn default() -> Self {
        Self {
            availability_url: "https://archive.org/wayback/available".to_string(),
            save_url: "https://web.archive.org/save/".to_string(),
            poll_schedule: [5, 10, 15, 20, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_poll_attempts: 5,
            max_wait: Duration::from_secs(80),
            check_timeout: Duration::from_secs(10),
            rate_limit_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(2, Duration::from_secs(2)),
        }
    }
}

impl WaybackConfig {
    pub fn with_endpoints(
        mut self,
        availability_url: impl Into<String>,
        save_url: impl Into<String>,
    ) -> Self {
        self.availability_url = availability_url.into();
        self.save_url = save_url.into();
        self
    }

    pub fn with_poll_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.max_poll_attempts = schedule.len();
        self.poll_schedule = schedule;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn with_rate_limit_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    archived_snapshots: ArchivedSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivedSnapshots {
    closest: Option<Snapshot>,
}

#[derive(Debug, Clone, Deserialize)]
struct Snapshot {
    #[serde(default)]
    available: bool,
    url: String,
    #[serde(default)]
    timestamp: String,
}

/// Adapter for the Internet Archive's Wayback Machine.
#[derive(Clone)]
pub struct WaybackAdapter {
    sessions: SessionPool,
    limiter: RateLimiter,
    config: WaybackConfig,
}

impl WaybackAdapter {
    pub fn new(sessions: SessionPool, limiter: RateLimiter, config: WaybackConfig) -> Self {
        Self {
            sessions,
            limiter,
            config,
        }
    }

    /// Closest available snapshot, if any.
    async fn check_existing(&self, url: &str) -> Result<Option<Snapshot>, ArchiveError> {
        let client = self.sessions.get(SERVICE)?;
        let timeout_secs = self.sessions.timeout().as_secs();
        let client = &client;
        let endpoint = self.config.availability_url.as_str();
        let limiter = &self.limiter;
        let wait = self.config.rate_limit_timeout;

        self.config
            .retry
            .run(move || async move {
                limiter.acquire_or_err(SERVICE.as_str(), wait).await?;
                let response = client
                    .get(endpoint)
                    .query(&[("url", url)])
                    .send()
                    .await
                    .map_err(|e| classify(&e, timeout_secs))?;
                if !response.status().is_success() {
                    return Err(status_error(&response));
                }
                let body: AvailabilityResponse = response.json().await.map_err(|e| {
                    ArchiveError::Generic(format!("Unreadable availability response: {e}"))
                })?;
                Ok(body.archived_snapshots.closest.filter(|s| s.available))
            })
            .await
    }

    async fn save(&self, url: &str) -> Result<Option<ArchiveResult>, ArchiveError> {
        self.limiter
            .acquire_or_err(SERVICE.as_str(), self.config.rate_limit_timeout)
            .await?;

        let client = self.sessions.get(SERVICE)?;
        let response = client
            .post(&self.config.save_url)
            .form(&[("url", url)])
            .send()
            .await
            .map_err(|e| classify(&e, self.sessions.timeout().as_secs()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let wait = retry_after(response.headers()).unwrap_or(60);
            tracing::warn!(service = %SERVICE, retry_after = %wait, "Save request rate limited");
            return Ok(Some(
                ArchiveResult::failure(format!(
                    "Wayback Machine rate limit exceeded; it asks for a wait of {wait} seconds"
                ))
                .with_details(json!({ "retry_after_secs": wait }))
                .with_guidance(format!("Wait {wait} seconds, then try again.")),
            ));
        }
        if !status.is_success() {
            let err = status_error(&response);
            let body = response.text().await.unwrap_or_default();
            return Ok(Some(
                ArchiveResult::failure(format!(
                    "Wayback Machine submission failed with HTTP {}: {}",
                    status.as_u16(),
                    snippet(&body, 200)
                ))
                .with_guidance(err.guidance()),
            ));
        }
        Ok(None)
    }

    /// Availability lookup bounded by `check_timeout`.
    async fn bounded_check(&self, url: &str) -> Result<Option<Snapshot>, ArchiveError> {
        let limit = self.config.check_timeout;
        tokio::time::timeout(limit, self.check_existing(url))
            .await
            .unwrap_or_else(|_| Err(ArchiveError::NetworkTimeout(limit.as_secs())))
    }

    /// Poll availability until a snapshot shows up or the submission budget
    /// that began at `started` runs out. Each sleep is shortened so the
    /// following lookup still fits in the budget.
    async fn poll(&self, url: &str, started: Instant) -> ArchiveResult {
        let attempts = self.config.max_poll_attempts.min(self.config.poll_schedule.len());

        for (idx, delay) in self.config.poll_schedule.iter().take(attempts).enumerate() {
            let remaining = self.config.max_wait.saturating_sub(started.elapsed());
            if remaining <= self.config.check_timeout {
                tracing::debug!(service = %SERVICE, attempt = idx + 1, "Verification budget spent");
                break;
            }
            tokio::time::sleep((*delay).min(remaining - self.config.check_timeout)).await;

            match self.bounded_check(url).await {
                Ok(Some(snapshot)) => {
                    let elapsed = started.elapsed().as_secs();
                    return ArchiveResult::success(format!(
                        "Newly archived by the Wayback Machine, verified after {elapsed} seconds"
                    ))
                    .with_url(snapshot.url.clone())
                    .with_details(json!({
                        "snapshot": snapshot.url,
                        "timestamp": snapshot.timestamp,
                        "verified_after_secs": elapsed,
                        "listing": retrieval_link(SERVICE, url),
                    }));
                }
                Ok(None) => tracing::info!(
                    service = %SERVICE,
                    attempt = idx + 1,
                    max_attempts = attempts,
                    elapsed_secs = %started.elapsed().as_secs(),
                    "Snapshot not yet available"
                ),
                Err(e) => tracing::warn!(
                    service = %SERVICE,
                    attempt = idx + 1,
                    error = %e,
                    "Verification attempt failed"
                ),
            }
        }

        let listing = retrieval_link(SERVICE, url).unwrap_or_default();
        ArchiveResult::pending(format!(
            "Submission accepted but not confirmed after {}s; the capture may still be processing",
            started.elapsed().as_secs()
        ))
        .with_url(listing.clone())
        .with_guidance(format!(
            "Large pages can take several minutes. Check back later at {listing}"
        ))
    }
}

#[async_trait]
impl ServiceAdapter for WaybackAdapter {
    fn service(&self) -> ServiceName {
        SERVICE
    }

    async fn submit(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        let started = Instant::now();
        match self.bounded_check(url).await {
            Ok(Some(snapshot)) => {
                tracing::info!(service = %SERVICE, %url, timestamp = %snapshot.timestamp, "Already archived");
                return Ok(ArchiveResult::success(format!(
                    "URL already archived (snapshot: {})",
                    snapshot.timestamp
                ))
                .with_url(snapshot.url.clone())
                .with_details(json!({
                    "snapshot": snapshot.url,
                    "timestamp": snapshot.timestamp,
                    "listing": retrieval_link(SERVICE, url),
                })));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(service = %SERVICE, error = %e, "Could not check existing snapshots");
            }
        }

        tracing::info!(service = %SERVICE, %url, "Submitting for capture");
        match self.save(url).await {
            Ok(Some(terminal)) => return Ok(terminal),
            Ok(None) => {}
            Err(e) => return Ok(ArchiveResult::from_error(&e)),
        }

        Ok(self.poll(url, started).await)
    }

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        wwwscope_core::links::link_result(SERVICE, url).ok_or_else(|| {
            ArchiveError::Config(format!("no retrieval link template for {SERVICE}"))
        })
    }
}
