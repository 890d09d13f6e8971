//! Internet Archive upload over the IA S3-compatible API.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Client};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use wwwscope_core::{
    ArchiveError, ArchiveUploader, RateLimiter, RetryPolicy, UploadMetadata, UploadReceipt,
};

use crate::config::IaCredentials;
use crate::http::{classify, status_error};

/// Rate-limit bucket for uploads.
pub const RATE_KEY: &str = "internet_archive";

const CC0: &str = "https://creativecommons.org/publicdomain/zero/1.0/";

/// Metadata used for WARC captures when the caller supplies none.
pub fn warc_metadata(path: &Path) -> UploadMetadata {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    UploadMetadata {
        title: format!("WWWScope Archive - {stem}"),
        description: format!("Web archive created by WWWScope archiver. Original file: {name}"),
        collection: "opensource".to_string(),
        creator: "WWWScope Archiver".to_string(),
        subjects: vec![
            "web archiving".to_string(),
            "WARC".to_string(),
            "preservation".to_string(),
        ],
        license_url: Some(CC0.to_string()),
    }
}

/// [`ArchiveUploader`] that PUTs files into a new Internet Archive item and
/// then checks the item's metadata for the file.
#[derive(Clone)]
pub struct IaUploader {
    client: Client,
    credentials: Option<IaCredentials>,
    limiter: RateLimiter,
    endpoint: String,
    metadata_endpoint: String,
    /// Wait between the PUT and the metadata check.
    verify_delay: Duration,
    retry: RetryPolicy,
    rate_limit_timeout: Duration,
    timeout: Duration,
}

impl IaUploader {
    pub fn new(
        credentials: Option<IaCredentials>,
        limiter: RateLimiter,
        user_agent: &str,
    ) -> Result<Self, ArchiveError> {
        let timeout = Duration::from_secs(300);
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ArchiveError::Config(format!("Failed to build upload client: {e}")))?;
        Ok(Self {
            client,
            credentials,
            limiter,
            endpoint: "https://s3.us.archive.org".to_string(),
            metadata_endpoint: "https://archive.org/metadata".to_string(),
            verify_delay: Duration::from_secs(5),
            // 5 s, 10 s between the three attempts
            retry: RetryPolicy::new(3, Duration::from_secs(5)),
            rate_limit_timeout: Duration::from_secs(60),
            timeout,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn headers(
        &self,
        credentials: &IaCredentials,
        metadata: &UploadMetadata,
        sha256: &str,
    ) -> Result<HeaderMap, ArchiveError> {
        let mut headers = HeaderMap::new();
        let auth = format!("LOW {}:{}", credentials.access_key, credentials.secret_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| ArchiveError::Config("IA credentials contain invalid characters".into()))?,
        );
        headers.insert("x-amz-auto-make-bucket", HeaderValue::from_static("1"));
        headers.insert("x-archive-queue-derive", HeaderValue::from_static("1"));

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut fields: Vec<(String, &str)> = vec![
            ("x-archive-meta-mediatype".into(), "web"),
            ("x-archive-meta-title".into(), metadata.title.as_str()),
            ("x-archive-meta-collection".into(), metadata.collection.as_str()),
            ("x-archive-meta-description".into(), metadata.description.as_str()),
            ("x-archive-meta-creator".into(), metadata.creator.as_str()),
            ("x-archive-meta-date".into(), date.as_str()),
            ("x-archive-meta-sha256".into(), sha256),
        ];
        if let Some(license) = &metadata.license_url {
            fields.push(("x-archive-meta-licenseurl".into(), license.as_str()));
        }
        for (idx, subject) in metadata.subjects.iter().enumerate() {
            fields.push((format!("x-archive-meta{:02}-subject", idx + 1), subject.as_str()));
        }

        for (name, value) in fields {
            if value.is_empty() {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ArchiveError::Generic(format!("Bad metadata header {name}: {e}")))?;
            let value = HeaderValue::from_str(&meta_value(value))
                .map_err(|e| ArchiveError::Generic(format!("Bad metadata value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Check that `identifier` exists and lists `file_name` with `size` bytes.
    async fn verify(&self, identifier: &str, file_name: &str, size: u64) -> Result<(), ArchiveError> {
        let client = &self.client;
        let limiter = &self.limiter;
        let wait = self.rate_limit_timeout;
        let timeout_secs = self.timeout.as_secs();
        let url = format!("{}/{identifier}", self.metadata_endpoint);
        let url = url.as_str();

        let item: ItemMetadata = self
            .retry
            .run(move || async move {
                limiter.acquire_or_err(RATE_KEY, wait).await?;
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| classify(&e, timeout_secs))?;
                if !response.status().is_success() {
                    return Err(status_error(&response));
                }
                response.json().await.map_err(|e| {
                    ArchiveError::VerificationFailed(format!("Unreadable item metadata: {e}"))
                })
            })
            .await?;

        let files = item.files.ok_or_else(|| {
            ArchiveError::VerificationFailed(format!("Item {identifier} does not exist"))
        })?;
        let remote = files.iter().find(|f| f.name == file_name).ok_or_else(|| {
            ArchiveError::VerificationFailed(format!("{file_name} is not listed in {identifier}"))
        })?;
        match remote.size.as_deref() {
            Some(remote_size) if remote_size == size.to_string() => Ok(()),
            other => Err(ArchiveError::VerificationFailed(format!(
                "Size mismatch for {file_name}: local={size}, remote={}",
                other.unwrap_or("unknown")
            ))),
        }
    }
}

/// Subset of `archive.org/metadata/{identifier}`; a missing item is `{}`.
#[derive(Debug, Deserialize)]
struct ItemMetadata {
    files: Option<Vec<ItemFile>>,
}

#[derive(Debug, Deserialize)]
struct ItemFile {
    name: String,
    size: Option<String>,
}

/// SHA-256 hex digest and length of a file, read in chunks.
async fn file_digest(path: &Path) -> Result<(String, u64), ArchiveError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut len = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        len += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), len))
}

/// Header-safe metadata value; non-ASCII text uses IA's `uri(...)` form.
fn meta_value(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        value.to_string()
    } else {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        format!("uri({})", encoded.replace('+', "%20"))
    }
}

impl ArchiveUploader for IaUploader {
    async fn upload_file(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, ArchiveError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ArchiveError::Config(
                "Internet Archive credentials not configured (IA_ACCESS_KEY / IA_SECRET_KEY)".into(),
            )
        })?;

        let (sha256, size) = file_digest(path).await?;
        let identifier = format!(
            "wwwscope_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &sha256[..8]
        );
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiveError::Generic(format!("{} has no file name", path.display())))?;
        let put_url = format!("{}/{identifier}/{file_name}", self.endpoint);
        let headers = self.headers(credentials, metadata, &sha256)?;

        tracing::info!(%identifier, file = %file_name, size_bytes = size, "Uploading to Internet Archive");

        let client = &self.client;
        let limiter = &self.limiter;
        let wait = self.rate_limit_timeout;
        let timeout_secs = self.timeout.as_secs();
        let (put_url, headers) = (&put_url, &headers);

        self.retry
            .run(move || async move {
                limiter.acquire_or_err(RATE_KEY, wait).await?;
                // Streamed from disk; every attempt reopens the file.
                let file = tokio::fs::File::open(path).await?;
                let response = client
                    .put(put_url)
                    .headers(headers.clone())
                    .header(CONTENT_LENGTH, size)
                    .body(Body::wrap_stream(ReaderStream::new(file)))
                    .send()
                    .await
                    .map_err(|e| classify(&e, timeout_secs))?;
                if !response.status().is_success() {
                    return Err(status_error(&response));
                }
                Ok(())
            })
            .await?;

        tokio::time::sleep(self.verify_delay).await;
        self.verify(&identifier, &file_name, size).await?;

        tracing::info!(%identifier, "Upload verified");
        Ok(UploadReceipt {
            url: Some(format!("https://archive.org/details/{identifier}")),
            identifier,
            success: true,
        })
    }
}
