//! Memento TimeTravel aggregator lookups.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use wwwscope_core::{
    ArchiveError, ArchiveResult, RateLimiter, RetryPolicy, ServiceAdapter, ServiceName,
};

use crate::http::{classify, status_error};
use crate::session::SessionPool;

const SERVICE: ServiceName = ServiceName::Memento;

#[derive(Debug, Clone)]
pub struct MementoConfig {
    /// Prefix the target URL is appended to.
    pub api_url: String,
    pub rate_limit_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for MementoConfig {
    fn default() -> Self {
        Self {
            api_url: "http://timetravel.mementoweb.org/api/json/".to_string(),
            rate_limit_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(2, Duration::from_secs(2)),
        }
    }
}

impl MementoConfig {
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Retrieval-only adapter over the Memento JSON API.
#[derive(Clone)]
pub struct MementoAdapter {
    sessions: SessionPool,
    limiter: RateLimiter,
    config: MementoConfig,
}

impl MementoAdapter {
    pub fn new(sessions: SessionPool, limiter: RateLimiter, config: MementoConfig) -> Self {
        Self {
            sessions,
            limiter,
            config,
        }
    }

    /// Raw aggregator payload; `None` when the aggregator knows no mementos.
    async fn fetch(&self, url: &str) -> Result<Option<Value>, ArchiveError> {
        let client = self.sessions.get(SERVICE)?;
        let client = &client;
        let endpoint = format!("{}{url}", self.config.api_url);
        let endpoint = endpoint.as_str();
        let timeout_secs = self.sessions.timeout().as_secs();
        let limiter = &self.limiter;
        let wait = self.config.rate_limit_timeout;

        self.config
            .retry
            .run(move || async move {
                limiter.acquire_or_err(SERVICE.as_str(), wait).await?;
                let response = client
                    .get(endpoint)
                    .send()
                    .await
                    .map_err(|e| classify(&e, timeout_secs))?;
                if response.status().as_u16() == 404 {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(status_error(&response));
                }
                let data: Value = response
                    .json()
                    .await
                    .map_err(|e| ArchiveError::Generic(format!("Unreadable Memento response: {e}")))?;
                Ok(Some(data))
            })
            .await
    }
}

fn memento_count(data: &Value) -> usize {
    data.pointer("/mementos/list")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

fn guidance_for(err: &ArchiveError) -> String {
    match err.root() {
        ArchiveError::NetworkTimeout(_) => "The Memento aggregator is not responding; it can be slow. \
             Try the Wayback Machine, Archive.today or the TimeTravel listing instead."
            .to_string(),
        ArchiveError::ConnectionFailure(_) => "timetravel.mementoweb.org is unreachable \
             (maintenance, network trouble or overload). Use the Wayback Machine or Archive.today instead."
            .to_string(),
        other => other.guidance(),
    }
}

#[async_trait]
impl ServiceAdapter for MementoAdapter {
    fn service(&self) -> ServiceName {
        SERVICE
    }

    async fn submit(&self, _url: &str) -> Result<ArchiveResult, ArchiveError> {
        Ok(ArchiveResult::failure("Memento is an aggregator and does not accept submissions")
            .with_guidance("Submit to the Wayback Machine or Archive.today instead."))
    }

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        match self.fetch(url).await {
            Ok(Some(data)) if memento_count(&data) > 0 => {
                let count = memento_count(&data);
                tracing::info!(service = %SERVICE, %url, %count, "Mementos found");
                let latest = data
                    .pointer("/mementos/last/uri")
                    .and_then(|v| v.as_array().and_then(|a| a.first()).or(Some(v)))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let result = ArchiveResult::success(format!("Found {count} archived versions"))
                    .with_details(data);
                Ok(match latest {
                    Some(latest) => result.with_url(latest),
                    None => result,
                })
            }
            Ok(_) => {
                let err = ArchiveError::EmptyResult("No archived versions found in Memento".into());
                Ok(ArchiveResult::from_error(&err).with_details(json!({ "count": 0 })))
            }
            Err(e) => {
                tracing::warn!(service = %SERVICE, %url, error = %e, "Memento lookup failed");
                let root = e.root();
                Ok(ArchiveResult::failure(format!("Memento lookup failed: {root}"))
                    .with_guidance(guidance_for(&e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wwwscope_core::{ArchiveStatus, BucketLimit, RateLimitConfig};

    use super::*;

    fn adapter(api_url: String) -> MementoAdapter {
        adapter_with(SessionPool::default(), api_url)
    }

    fn adapter_with(sessions: SessionPool, api_url: String) -> MementoAdapter {
        let limiter = RateLimiter::new(RateLimitConfig::uniform(BucketLimit::new(1000.0, 100.0)));
        let config = MementoConfig::default()
            .with_api_url(api_url)
            .with_retry(RetryPolicy::none());
        MementoAdapter::new(sessions, limiter, config)
    }

    fn payload(n: usize) -> Value {
        let list: Vec<Value> = (0..n)
            .map(|i| json!({ "datetime": format!("2020-01-0{}T00:00:00Z", i + 1), "uri": [format!("http://archive.example/{i}")] }))
            .collect();
        json!({
            "original_uri": "https://example.com",
            "mementos": {
                "last": { "datetime": "2020-01-02T00:00:00Z", "uri": ["http://archive.example/1"] },
                "list": list
            }
        })
    }

    #[tokio::test]
    async fn reports_memento_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/api/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload(2)))
            .expect(1)
            .mount(&server)
            .await;

        let result = adapter(format!("{}/api/json/", server.uri()))
            .retrieve("https://example.com")
            .await
            .unwrap();

        assert_eq!(result.status, ArchiveStatus::Success);
        assert!(result.message.contains('2'));
        assert_eq!(result.message, "Found 2 archived versions");
        assert_eq!(result.url.as_deref(), Some("http://archive.example/1"));
        assert!(result.details.is_some());
    }

    #[tokio::test]
    async fn empty_list_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "mementos": { "list": [] } })))
            .mount(&server)
            .await;

        let result = adapter(format!("{}/api/json/", server.uri()))
            .retrieve("https://example.com")
            .await
            .unwrap();
        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.message.contains("No archived versions"));
    }

    #[tokio::test]
    async fn not_found_is_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = adapter(format!("{}/api/json/", server.uri()))
            .retrieve("https://example.com")
            .await
            .unwrap();
        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.message.contains("No archived versions"));
    }

    #[tokio::test]
    async fn unreachable_aggregator_has_connection_guidance() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = adapter(format!("http://{addr}/api/json/"))
            .retrieve("https://example.com")
            .await
            .unwrap();

        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.message.contains("Connection failed"));
        assert!(result.guidance.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn slow_aggregator_has_timeout_guidance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(payload(1))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let sessions = SessionPool::default().with_timeout(Duration::from_millis(50));
        let result = adapter_with(sessions, format!("{}/api/json/", server.uri()))
            .retrieve("https://example.com")
            .await
            .unwrap();

        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.guidance.unwrap().contains("not responding"));
    }

    #[tokio::test]
    async fn submit_is_unsupported() {
        let result = adapter("http://unused/".into())
            .submit("https://example.com")
            .await
            .unwrap();
        assert_eq!(result.status, ArchiveStatus::Failure);
    }
}
