//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::models::{ArchiveResult, ServiceName, UploadMetadata, UploadReceipt, WarcFile};
use crate::traits::{ArchiveUploader, PageOutcome, PageSubmitter, ServiceAdapter, WarcStore};

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Scripted {
    Result(ArchiveResult),
    Error(ArchiveError),
    Panic(String),
}

/// Mock adapter with scripted responses shared by `submit` and `retrieve`.
#[derive(Clone)]
pub struct MockAdapter {
    service: ServiceName,
    /// Each call pops the first element; the last one repeats.
    responses: Arc<Mutex<Vec<Scripted>>>,
    delay: Option<Duration>,
    submit_calls: Arc<Mutex<Vec<String>>>,
    retrieve_calls: Arc<Mutex<Vec<String>>>,
}

impl MockAdapter {
    fn scripted(service: ServiceName, responses: Vec<Scripted>) -> Self {
        Self {
            service,
            responses: Arc::new(Mutex::new(responses)),
            delay: None,
            submit_calls: Arc::new(Mutex::new(Vec::new())),
            retrieve_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn success(service: ServiceName, message: &str) -> Self {
        Self::new(service, ArchiveResult::success(message))
    }

    pub fn new(service: ServiceName, result: ArchiveResult) -> Self {
        Self::scripted(service, vec![Scripted::Result(result)])
    }

    pub fn with_error(service: ServiceName, error: ArchiveError) -> Self {
        Self::scripted(service, vec![Scripted::Error(error)])
    }

    /// Adapter whose calls panic with `message`.
    pub fn panicking(service: ServiceName, message: &str) -> Self {
        Self::scripted(service, vec![Scripted::Panic(message.to_string())])
    }

    pub fn with_responses(
        service: ServiceName,
        responses: Vec<Result<ArchiveResult, ArchiveError>>,
    ) -> Self {
        let scripted = responses
            .into_iter()
            .map(|r| match r {
                Ok(result) => Scripted::Result(result),
                Err(e) => Scripted::Error(e),
            })
            .collect();
        Self::scripted(service, scripted)
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.lock().unwrap().len()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.lock().unwrap().len()
    }

    pub fn submitted_urls(&self) -> Vec<String> {
        self.submit_calls.lock().unwrap().clone()
    }

    async fn respond(&self) -> Result<ArchiveResult, ArchiveError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match responses.first() {
                    Some(Scripted::Result(r)) => Scripted::Result(r.clone()),
                    Some(Scripted::Error(e)) => Scripted::Error(ArchiveError::Generic(e.to_string())),
                    Some(Scripted::Panic(m)) => Scripted::Panic(m.clone()),
                    None => Scripted::Result(ArchiveResult::success("default")),
                }
            }
        };
        match next {
            Scripted::Result(r) => Ok(r),
            Scripted::Error(e) => Err(e),
            Scripted::Panic(message) => panic!("{message}"),
        }
    }
}

#[async_trait]
impl ServiceAdapter for MockAdapter {
    fn service(&self) -> ServiceName {
        self.service
    }

    async fn submit(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        self.submit_calls.lock().unwrap().push(url.to_string());
        self.respond().await
    }

    async fn retrieve(&self, url: &str) -> Result<ArchiveResult, ArchiveError> {
        self.retrieve_calls.lock().unwrap().push(url.to_string());
        self.respond().await
    }
}

// ---------------------------------------------------------------------------
// MockSubmitter
// ---------------------------------------------------------------------------

/// Mock form submitter with a scripted outcome queue per mirror.
///
/// Mirrors without a script answer `Unconfirmed`.
#[derive(Clone, Default)]
pub struct MockSubmitter {
    outcomes: Arc<Mutex<HashMap<String, Vec<Result<PageOutcome, ArchiveError>>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(
        self,
        mirror: &str,
        outcomes: Vec<Result<PageOutcome, ArchiveError>>,
    ) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(mirror.to_string(), outcomes);
        self
    }

    /// Mirrors hit, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSubmitter for MockSubmitter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit_form(&self, mirror: &str, _target: &str) -> Result<PageOutcome, ArchiveError> {
        self.calls.lock().unwrap().push(mirror.to_string());
        let mut outcomes = self.outcomes.lock().unwrap();
        match outcomes.get_mut(mirror) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => Ok(PageOutcome::Unconfirmed),
        }
    }
}

// ---------------------------------------------------------------------------
// MockUploader
// ---------------------------------------------------------------------------

/// Mock uploader that records uploaded paths.
#[derive(Clone)]
pub struct MockUploader {
    error: Arc<Mutex<Option<ArchiveError>>>,
    uploads: Arc<Mutex<Vec<(PathBuf, UploadMetadata)>>>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// First upload fails with `error`.
    pub fn with_error(error: ArchiveError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn uploads(&self) -> Vec<(PathBuf, UploadMetadata)> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveUploader for MockUploader {
    async fn upload_file(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, ArchiveError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), metadata.clone()));
        let identifier = format!("mock_{}", self.uploads.lock().unwrap().len());
        Ok(UploadReceipt {
            url: Some(format!("https://archive.org/details/{identifier}")),
            identifier,
            success: true,
        })
    }
}

// ---------------------------------------------------------------------------
// MockWarcStore
// ---------------------------------------------------------------------------

/// In-memory WARC listing.
#[derive(Clone, Default)]
pub struct MockWarcStore {
    files: Arc<Mutex<Vec<WarcFile>>>,
}

impl MockWarcStore {
    pub fn new(files: Vec<WarcFile>) -> Self {
        Self {
            files: Arc::new(Mutex::new(files)),
        }
    }
}

impl WarcStore for MockWarcStore {
    async fn list_local_files(&self) -> Result<Vec<WarcFile>, ArchiveError> {
        Ok(self.files.lock().unwrap().clone())
    }
}
