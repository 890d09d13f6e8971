pub mod archive_today;
pub mod config;
pub mod form_submitter;
pub mod http;
pub mod memento;
pub mod registry;
pub mod session;
pub mod sync;
pub mod uploader;
pub mod warc_store;
pub mod wayback;

#[cfg(feature = "browser")]
pub mod browser_submitter;

pub use archive_today::{ArchiveTodayAdapter, ArchiveTodayConfig};
pub use config::{ArchiveConfig, IaCredentials};
pub use form_submitter::HttpFormSubmitter;
pub use memento::{MementoAdapter, MementoConfig};
pub use registry::{build_registry, default_submitter};
pub use session::SessionPool;
pub use sync::{SyncEntry, sync_warcs};
pub use uploader::IaUploader;
pub use warc_store::LocalWarcStore;
pub use wayback::{WaybackAdapter, WaybackConfig};

#[cfg(feature = "browser")]
pub use browser_submitter::BrowserSubmitter;
