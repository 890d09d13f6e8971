//! Bulk upload of every local WARC capture.

use std::time::Duration;

use wwwscope_core::{ArchiveError, ArchiveUploader, UploadReceipt, WarcFile, WarcStore};

use crate::uploader::warc_metadata;

/// One file of a sync run and how its upload went.
#[derive(Debug)]
pub struct SyncEntry {
    pub file: WarcFile,
    pub outcome: Result<UploadReceipt, ArchiveError>,
}

impl SyncEntry {
    pub fn is_uploaded(&self) -> bool {
        matches!(&self.outcome, Ok(receipt) if receipt.success)
    }
}

/// Upload every file `store` lists into `collection`, one at a time with
/// `pause` between uploads. A failed file does not stop the run.
pub async fn sync_warcs<S, U>(
    store: &S,
    uploader: &U,
    collection: &str,
    pause: Duration,
) -> Result<Vec<SyncEntry>, ArchiveError>
where
    S: WarcStore,
    U: ArchiveUploader,
{
    let files = store.list_local_files().await?;
    let total = files.len();
    let mut entries = Vec::with_capacity(total);

    for (idx, file) in files.into_iter().enumerate() {
        tracing::info!(file = %file.name, index = idx + 1, total, "Syncing WARC");
        let mut metadata = warc_metadata(&file.path);
        metadata.collection = collection.to_string();

        let outcome = uploader.upload_file(&file.path, &metadata).await;
        if let Err(e) = &outcome {
            tracing::warn!(file = %file.name, error = %e, "WARC upload failed");
        }
        entries.push(SyncEntry { file, outcome });

        if idx + 1 < total {
            tokio::time::sleep(pause).await;
        }
    }

    let uploaded = entries.iter().filter(|e| e.is_uploaded()).count();
    tracing::info!(uploaded, total, "WARC sync finished");
    Ok(entries)
}
