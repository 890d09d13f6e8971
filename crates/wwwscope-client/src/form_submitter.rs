use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::REFERER;
use wwwscope_core::{ArchiveError, PageOutcome, PageSubmitter, RateLimiter, ServiceName};

use crate::archive_today::looks_like_captcha;
use crate::http::{classify, status_error};
use crate::session::SessionPool;

/// Submits through a plain `POST {mirror}/submit/` on the pooled
/// Archive.today session (browser headers, cookie jar).
///
/// The caller pays the rate-limit token for the POST; the follow-up lookup
/// takes its own.
#[derive(Clone)]
pub struct HttpFormSubmitter {
    sessions: SessionPool,
    limiter: RateLimiter,
    lookup_delay: Duration,
    rate_limit_timeout: Duration,
}

impl HttpFormSubmitter {
    pub fn new(sessions: SessionPool, limiter: RateLimiter) -> Self {
        Self {
            sessions,
            limiter,
            lookup_delay: Duration::from_secs(3),
            rate_limit_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_rate_limit_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limit_timeout = timeout;
        self
    }

    /// Wait before looking up a submission that did not redirect.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    async fn lookup(&self, mirror: &str, target: &str) -> Result<Option<String>, ArchiveError> {
        tokio::time::sleep(self.lookup_delay).await;
        self.limiter
            .acquire_or_err(ServiceName::ArchiveToday.as_str(), self.rate_limit_timeout)
            .await?;
        let client = self.sessions.get(ServiceName::ArchiveToday)?;
        let response = match client
            .get(format!("{mirror}/{target}"))
            .header(REFERER, mirror)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(%mirror, error = %e, "Snapshot lookup failed");
                return Ok(None);
            }
        };
        let final_url = response.url().as_str();
        Ok((response.status().is_success() && is_snapshot_url(final_url))
            .then(|| final_url.to_string()))
    }
}

fn is_snapshot_url(url: &str) -> bool {
    url.contains("/archive/")
}

#[async_trait]
impl PageSubmitter for HttpFormSubmitter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit_form(&self, mirror: &str, target: &str) -> Result<PageOutcome, ArchiveError> {
        let client = self.sessions.get(ServiceName::ArchiveToday)?;
        let submit_url = format!("{mirror}/submit/");

        let response = client
            .post(&submit_url)
            .header(REFERER, mirror)
            .form(&[("url", target)])
            .send()
            .await
            .map_err(|e| classify(&e, self.sessions.timeout().as_secs()))?;

        if !response.status().is_success() {
            return Err(status_error(&response));
        }

        let final_url = response.url().to_string();
        if final_url != submit_url && is_snapshot_url(&final_url) {
            return Ok(PageOutcome::Archived(final_url));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify(&e, self.sessions.timeout().as_secs()))?;
        if looks_like_captcha(&body) {
            return Ok(PageOutcome::Captcha);
        }

        tracing::info!(%mirror, "Submitted without redirect, looking up snapshot");
        Ok(match self.lookup(mirror, target).await? {
            Some(url) => PageOutcome::Archived(url),
            None => PageOutcome::Unconfirmed,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use wwwscope_core::{BucketLimit, RateLimitConfig};

    use super::*;

    fn limiter(capacity: f64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::uniform(BucketLimit::new(0.001, capacity)))
    }

    fn submitter() -> HttpFormSubmitter {
        HttpFormSubmitter::new(SessionPool::default(), limiter(100.0))
            .with_lookup_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn redirect_into_archive_is_success() {
        let server = MockServer::start().await;
        let mirror = server.uri();
        Mock::given(method("POST"))
            .and(path("/submit/"))
            .and(header("referer", mirror.as_str()))
            .and(body_string_contains("url=https%3A%2F%2Fexample.com"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/archive/abc123"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/archive/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("snapshot"))
            .mount(&server)
            .await;

        let outcome = submitter()
            .submit_form(&mirror, "https://example.com")
            .await
            .unwrap();

        assert_eq!(outcome, PageOutcome::Archived(format!("{mirror}/archive/abc123")));
    }

    #[tokio::test]
    async fn captcha_page_is_detected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<form><div class=\"h-captcha\"></div></form>"),
            )
            .mount(&server)
            .await;

        let outcome = submitter()
            .submit_form(&server.uri(), "https://example.com")
            .await
            .unwrap();
        assert_eq!(outcome, PageOutcome::Captcha);
    }

    #[tokio::test]
    async fn accepted_submission_is_looked_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/https?:"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/archive/found"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/archive/found"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = submitter()
            .submit_form(&server.uri(), "https://example.com")
            .await
            .unwrap();
        assert_eq!(outcome, PageOutcome::Archived(format!("{}/archive/found", server.uri())));
    }

    #[tokio::test]
    async fn missing_snapshot_is_unconfirmed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = submitter()
            .submit_form(&server.uri(), "https://example.com")
            .await
            .unwrap();
        assert_eq!(outcome, PageOutcome::Unconfirmed);
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = submitter()
            .submit_form(&server.uri(), "https://example.com")
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn lookup_waits_for_a_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(0)
            .mount(&server)
            .await;

        // The only token is already spent, so the lookup may not go out.
        let limiter = limiter(1.0);
        assert!(limiter.acquire("archive_today", 1.0, None).await);
        let err = HttpFormSubmitter::new(SessionPool::default(), limiter)
            .with_lookup_delay(Duration::ZERO)
            .with_rate_limit_timeout(Duration::from_millis(50))
            .submit_form(&server.uri(), "https://example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::RateLimitTimeout { .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
