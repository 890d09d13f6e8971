use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArchiveError;
use crate::util::normalize_url;

/// Archiving services known to WWWScope.
///
/// The first three talk to a real API; the rest are retrieval-only and
/// resolve to a search/listing link without any network traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    WaybackMachine,
    ArchiveToday,
    Memento,
    ArchiveIs,
    GoogleCache,
    WebCite,
    Megalodon,
    TimeTravel,
    PermaCc,
}

impl ServiceName {
    pub const ALL: [ServiceName; 9] = [
        ServiceName::WaybackMachine,
        ServiceName::ArchiveToday,
        ServiceName::Memento,
        ServiceName::ArchiveIs,
        ServiceName::GoogleCache,
        ServiceName::WebCite,
        ServiceName::Megalodon,
        ServiceName::TimeTravel,
        ServiceName::PermaCc,
    ];

    /// Stable slug used on the command line and as the rate-limit key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::WaybackMachine => "wayback_machine",
            ServiceName::ArchiveToday => "archive_today",
            ServiceName::Memento => "memento",
            ServiceName::ArchiveIs => "archive_is",
            ServiceName::GoogleCache => "google_cache",
            ServiceName::WebCite => "webcite",
            ServiceName::Megalodon => "megalodon",
            ServiceName::TimeTravel => "timetravel",
            ServiceName::PermaCc => "perma_cc",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceName::WaybackMachine => "Wayback Machine",
            ServiceName::ArchiveToday => "Archive.today",
            ServiceName::Memento => "Memento",
            ServiceName::ArchiveIs => "Archive.is",
            ServiceName::GoogleCache => "Google Cache",
            ServiceName::WebCite => "WebCite",
            ServiceName::Megalodon => "Megalodon",
            ServiceName::TimeTravel => "TimeTravel",
            ServiceName::PermaCc => "Perma.cc",
        }
    }

    /// Whether the service accepts new submissions.
    pub fn supports_submit(&self) -> bool {
        matches!(self, ServiceName::WaybackMachine | ServiceName::ArchiveToday)
    }

    /// Whether retrieval is a pure link expansion (no network I/O).
    pub fn is_link_only(&self) -> bool {
        !matches!(
            self,
            ServiceName::WaybackMachine | ServiceName::ArchiveToday | ServiceName::Memento
        )
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for ServiceName {
    type Err = String;

    /// Accepts either the slug (`wayback_machine`) or the display name
    /// (`Wayback Machine`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ServiceName::ALL
            .into_iter()
            .find(|svc| svc.as_str() == wanted || svc.display_name().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown service: {s}"))
    }
}

/// What the caller wants done with the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Submit the URL for a fresh capture.
    Archive,
    /// Look up existing snapshots.
    Retrieve,
}

impl fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveMode::Archive => write!(f, "archive"),
            ArchiveMode::Retrieve => write!(f, "retrieve"),
        }
    }
}

/// A single user submission, fanned out across services.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveRequest {
    pub id: Uuid,
    pub url: String,
    pub mode: ArchiveMode,
    pub services: BTreeSet<ServiceName>,
}

impl ArchiveRequest {
    /// Validates and normalizes the URL. Duplicate services collapse.
    pub fn new(
        url: &str,
        mode: ArchiveMode,
        services: impl IntoIterator<Item = ServiceName>,
    ) -> Result<Self, ArchiveError> {
        Ok(Self {
            id: Uuid::new_v4(),
            url: normalize_url(url)?,
            mode,
            services: services.into_iter().collect(),
        })
    }
}

/// Terminal state of one adapter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Success,
    Failure,
    /// Accepted upstream but not yet confirmed.
    Pending,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::Success => "success",
            ArchiveStatus::Failure => "failure",
            ArchiveStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported by a service adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveResult {
    pub status: ArchiveStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Next step for the user when the result is not a success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl ArchiveResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ArchiveStatus::Success, message)
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::with_status(ArchiveStatus::Pending, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_status(ArchiveStatus::Failure, message)
    }

    /// Failure carrying the error text and its guidance.
    pub fn from_error(error: &ArchiveError) -> Self {
        Self::failure(error.to_string()).with_guidance(error.guidance())
    }

    fn with_status(status: ArchiveStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            url: None,
            details: None,
            guidance: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ArchiveStatus::Success
    }
}

/// A WARC capture stored on local disk.
#[derive(Debug, Clone, Serialize)]
pub struct WarcFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl WarcFile {
    /// Size in mebibytes, for display.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Descriptive metadata attached to an upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadMetadata {
    pub title: String,
    pub description: String,
    pub collection: String,
    pub creator: String,
    pub subjects: Vec<String>,
    pub license_url: Option<String>,
}

/// What the storage collaborator reports after an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub identifier: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_roundtrip() {
        for svc in ServiceName::ALL {
            let parsed: ServiceName = svc.as_str().parse().unwrap();
            assert_eq!(parsed, svc);
            let parsed: ServiceName = svc.display_name().parse().unwrap();
            assert_eq!(parsed, svc);
        }
        assert!("geocities".parse::<ServiceName>().is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(ServiceName::WaybackMachine.supports_submit());
        assert!(ServiceName::ArchiveToday.supports_submit());
        assert!(!ServiceName::Memento.supports_submit());
        assert!(!ServiceName::Memento.is_link_only());
        assert!(ServiceName::PermaCc.is_link_only());
    }

    #[test]
    fn test_request_dedups_services() {
        let req = ArchiveRequest::new(
            "example.com",
            ArchiveMode::Archive,
            [
                ServiceName::Memento,
                ServiceName::Memento,
                ServiceName::WaybackMachine,
            ],
        )
        .unwrap();
        assert_eq!(req.services.len(), 2);
        assert_eq!(req.url, "https://example.com");
    }

    #[test]
    fn test_request_rejects_bad_scheme() {
        let err = ArchiveRequest::new("ftp://example.com", ArchiveMode::Retrieve, []).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidUrl(_)));
    }

    #[test]
    fn test_result_from_error_carries_guidance() {
        let result = ArchiveResult::from_error(&ArchiveError::NetworkTimeout(30));
        assert_eq!(result.status, ArchiveStatus::Failure);
        assert!(result.message.contains("30 seconds"));
        assert!(result.guidance.is_some());
    }

    #[test]
    fn test_result_serializes_lowercase_status() {
        let json = serde_json::to_value(ArchiveResult::pending("later")).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("url").is_none());
    }
}
