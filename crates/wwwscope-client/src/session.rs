use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use wwwscope_core::{ArchiveError, ServiceName};

use crate::config::DEFAULT_USER_AGENT;

/// Browser identity presented to services that turn away scripted clients.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0 Safari/537.36";

/// Per-service pool of `reqwest` clients.
///
/// One client is built lazily per [`ServiceName`] and reused for every call
/// to that service, so connections and cookies persist between requests.
/// Cloning the pool shares the underlying clients.
#[derive(Clone)]
pub struct SessionPool {
    user_agent: String,
    timeout: Duration,
    clients: Arc<Mutex<HashMap<ServiceName, Client>>>,
}

impl SessionPool {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout: Duration::from_secs(30),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Per-request timeout applied by every client in the pool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Client for `service`, built on first use.
    pub fn get(&self, service: ServiceName) -> Result<Client, ArchiveError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&service) {
            return Ok(client.clone());
        }
        let client = self.build(service)?;
        tracing::debug!(%service, "Created HTTP session");
        clients.insert(service, client.clone());
        Ok(client)
    }

    /// Drop every pooled client. In-flight requests holding a clone finish
    /// normally; the next `get` builds a fresh session.
    pub fn close_all(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = clients.len();
        clients.clear();
        tracing::debug!(%closed, "Closed HTTP sessions");
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, service: ServiceName) -> Result<Client, ArchiveError> {
        let builder = Client::builder().timeout(self.timeout);
        let builder = match service {
            ServiceName::ArchiveToday | ServiceName::ArchiveIs => builder
                .user_agent(BROWSER_USER_AGENT)
                .default_headers(browser_headers())
                .cookie_store(true),
            _ => {
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
                builder.user_agent(&self.user_agent).default_headers(headers)
            }
        };
        builder
            .build()
            .map_err(|e| ArchiveError::Config(format!("Failed to build HTTP client for {service}: {e}")))
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers
}
