//! Mapping of transport failures and HTTP statuses onto [`ArchiveError`].

use std::error::Error as StdError;

use reqwest::Response;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use wwwscope_core::ArchiveError;

/// Classify a `reqwest` failure into the error kinds adapters report.
pub fn classify(err: &reqwest::Error, timeout_secs: u64) -> ArchiveError {
    let chain = error_chain(err);
    if err.is_timeout() {
        ArchiveError::NetworkTimeout(timeout_secs)
    } else if looks_like_tls(&chain) {
        ArchiveError::TlsError(chain)
    } else if err.is_connect() {
        ArchiveError::ConnectionFailure(chain)
    } else if let Some(status) = err.status() {
        ArchiveError::HttpStatus {
            code: status.as_u16(),
            retry_after: None,
        }
    } else {
        ArchiveError::Generic(chain)
    }
}

/// Error for a non-success response, keeping any `Retry-After` hint.
pub fn status_error(response: &Response) -> ArchiveError {
    ArchiveError::HttpStatus {
        code: response.status().as_u16(),
        retry_after: retry_after(response.headers()),
    }
}

/// `Retry-After` in seconds. HTTP-date values are not interpreted.
pub fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Display of `err` and all of its sources, joined by `": "`.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn looks_like_tls(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    [
        "certificate",
        "tls",
        "ssl",
        "handshake",
        "corrupt message",
        "wrong version number",
    ]
    .iter()
    .any(|marker| lower.contains(marker))
}

/// First `max` characters of a response body, for error messages.
pub fn snippet(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::HeaderValue;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 120 "));
        assert_eq!(retry_after(&headers), Some(120));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_tls_markers() {
        assert!(looks_like_tls("invalid peer certificate: UnknownIssuer"));
        assert!(looks_like_tls("SSL routines::wrong version number"));
        assert!(looks_like_tls("received corrupt message of type InvalidContentType"));
        assert!(!looks_like_tls("connection refused"));
    }

    #[test]
    fn test_snippet_is_char_safe() {
        assert_eq!(snippet("héllo", 2), "hé");
        assert_eq!(snippet("ok", 200), "ok");
    }

    #[tokio::test]
    async fn refused_connection_is_connection_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap_err();
        let classified = classify(&err, 5);
        assert!(matches!(classified, ArchiveError::ConnectionFailure(_)), "{classified:?}");
        assert!(classified.is_retryable());
    }

    #[tokio::test]
    async fn https_to_plain_listener_is_tls_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = server.uri().replacen("http://", "https://", 1);
        let err = reqwest::Client::new().get(url).send().await.unwrap_err();
        let classified = classify(&err, 5);
        assert!(matches!(classified, ArchiveError::TlsError(_)), "{classified:?}");
    }

    #[tokio::test]
    async fn slow_response_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap()
            .get(server.uri())
            .send()
            .await
            .unwrap_err();
        assert!(matches!(classify(&err, 1), ArchiveError::NetworkTimeout(1)));
    }

    #[tokio::test]
    async fn status_error_keeps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let resp = reqwest::get(server.uri()).await.unwrap();
        let err = status_error(&resp);
        assert!(matches!(
            err,
            ArchiveError::HttpStatus {
                code: 429,
                retry_after: Some(30)
            }
        ));
        assert!(err.is_rate_limit());
    }
}
