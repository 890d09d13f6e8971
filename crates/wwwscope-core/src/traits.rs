use std::future::Future;
use std::path::Path;

use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::models::{
    ArchiveResult, ServiceName, UploadMetadata, UploadReceipt, WarcFile,
};

/// One archiving service, able to submit a URL and/or look up its snapshots.
///
/// Adapters are expected to turn every expected condition (rate limits,
/// CAPTCHAs, empty results) into an [`ArchiveResult`]. An `Err` is reserved
/// for faults the adapter could not classify; the dispatcher converts it
/// into a failure result.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn service(&self) -> ServiceName;

    async fn submit(&self, url: &str) -> Result<ArchiveResult, ArchiveError>;

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError>;
}

/// What a mirror did with a submission form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Landed on a snapshot page.
    Archived(String),
    /// The mirror served a CAPTCHA challenge instead of the archive.
    Captcha,
    /// Accepted, but no snapshot URL could be observed.
    Unconfirmed,
}

/// Strategy for pushing a URL through an Archive.today-style submit form.
///
/// Implementations: a plain HTTP form POST and a headless browser. The
/// mirror failover loop is written once against this trait.
#[async_trait]
pub trait PageSubmitter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn submit_form(&self, mirror: &str, target: &str) -> Result<PageOutcome, ArchiveError>;
}

/// Pushes a local file to long-term remote storage.
pub trait ArchiveUploader: Send + Sync + Clone {
    fn upload_file(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
    ) -> impl Future<Output = Result<UploadReceipt, ArchiveError>> + Send;
}

/// Lists WARC captures kept on local disk.
pub trait WarcStore: Send + Sync + Clone {
    fn list_local_files(&self) -> impl Future<Output = Result<Vec<WarcFile>, ArchiveError>> + Send;
}
