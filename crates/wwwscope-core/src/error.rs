use thiserror::Error;

/// Error types shared by every WWWScope component.
///
/// Adapters classify network-layer failures into one of these kinds so the
/// caller can render differentiated guidance for each.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The per-service rate limiter could not hand out a token in time.
    #[error("Rate limit timeout for {service} after {waited_secs} seconds")]
    RateLimitTimeout { service: String, waited_secs: u64 },

    /// Remote service answered with a non-success status.
    #[error("HTTP {code}{}", .retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    HttpStatus {
        code: u16,
        retry_after: Option<u64>,
    },

    /// Response carried CAPTCHA markers.
    #[error("CAPTCHA challenge detected on {0}")]
    CaptchaDetected(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    NetworkTimeout(u64),

    /// Could not reach the remote host.
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    /// TLS handshake or certificate failure.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Service answered but had nothing for this URL.
    #[error("No results: {0}")]
    EmptyResult(String),

    /// Submission was accepted but the snapshot could not be confirmed.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Every retry attempt failed; carries the last error.
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ArchiveError>,
    },

    /// Target URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Headless browser could not be launched or driven.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl ArchiveError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveError::NetworkTimeout(_) | ArchiveError::ConnectionFailure(_) => true,
            ArchiveError::HttpStatus { code, .. } => *code >= 500 || *code == 408,
            _ => false,
        }
    }

    /// True for any flavour of "slow down" signal from upstream.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ArchiveError::RateLimitTimeout { .. } | ArchiveError::HttpStatus { code: 429, .. }
        )
    }

    /// The underlying error, looking through [`ArchiveError::RetriesExhausted`].
    pub fn root(&self) -> &ArchiveError {
        match self {
            ArchiveError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Actionable advice shown next to a failed result.
    pub fn guidance(&self) -> String {
        match self {
            ArchiveError::RateLimitTimeout { service, .. } => {
                format!("Too many requests queued for {service}; wait a minute and try again.")
            }
            ArchiveError::HttpStatus {
                code: 429,
                retry_after,
            } => format!(
                "The service is rate limiting us; wait {} seconds and try again.",
                retry_after.unwrap_or(60)
            ),
            ArchiveError::HttpStatus { code, .. } if *code >= 500 => {
                "The service is having trouble; try again in a few minutes.".to_string()
            }
            ArchiveError::HttpStatus { .. } => {
                "The service rejected the request; check that the URL is public and reachable."
                    .to_string()
            }
            ArchiveError::CaptchaDetected(_) => {
                "Open the service in a browser, complete the CAPTCHA manually, then retry."
                    .to_string()
            }
            ArchiveError::NetworkTimeout(_) => {
                "The service is not responding; try an alternate service such as the Wayback Machine."
                    .to_string()
            }
            ArchiveError::ConnectionFailure(_) => {
                "The service is unreachable (maintenance or network trouble); use another archive service."
                    .to_string()
            }
            ArchiveError::TlsError(_) => {
                "Secure connection failed; verify the service manually in a browser.".to_string()
            }
            ArchiveError::EmptyResult(_) => {
                "Nothing archived yet; submit the URL to the Wayback Machine or Archive.today first."
                    .to_string()
            }
            ArchiveError::VerificationFailed(_) => {
                "The archive may still be processing; check back in a few minutes.".to_string()
            }
            ArchiveError::RetriesExhausted { last, .. } => last.guidance(),
            ArchiveError::InvalidUrl(_) => {
                "Provide a full http:// or https:// URL.".to_string()
            }
            ArchiveError::Config(_) => "Check the WWWSCOPE_* environment variables.".to_string(),
            ArchiveError::Browser(_) => {
                "Install Chromium or set CHROME_BIN, or use the plain HTTP submitter.".to_string()
            }
            ArchiveError::Io(_) => "Check the file path and permissions.".to_string(),
            ArchiveError::Serialization(_) => {
                "The service returned an unexpected response; try again later.".to_string()
            }
            ArchiveError::Generic(_) => "Try again or use an alternate service.".to_string(),
        }
    }
}
