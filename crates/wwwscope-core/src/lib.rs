pub mod dispatch;
pub mod error;
pub mod links;
pub mod models;
pub mod rate_limiter;
pub mod retry;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use dispatch::{
    AdapterRegistry, DispatchConfig, DispatchEvent, DispatchReport, DispatchReporter, Dispatcher,
    TracingDispatchReporter,
};
pub use error::ArchiveError;
pub use links::{LinkOnlyAdapter, retrieval_link};
pub use models::{
    ArchiveMode, ArchiveRequest, ArchiveResult, ArchiveStatus, ServiceName, UploadMetadata,
    UploadReceipt, WarcFile,
};
pub use rate_limiter::{BucketLimit, RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
pub use traits::{ArchiveUploader, PageOutcome, PageSubmitter, ServiceAdapter, WarcStore};
pub use util::normalize_url;
