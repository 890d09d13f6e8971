use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use wwwscope_core::{ArchiveError, WarcFile, WarcStore};

/// WARC captures in a local directory.
#[derive(Debug, Clone)]
pub struct LocalWarcStore {
    dir: PathBuf,
}

impl LocalWarcStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_warc(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".warc") || lower.ends_with(".warc.gz")
}

impl WarcStore for LocalWarcStore {
    /// Newest first. A missing directory is an empty store.
    async fn list_local_files(&self) -> Result<Vec<WarcFile>, ArchiveError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "WARC directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_warc(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_default();
            files.push(WarcFile {
                name,
                path: entry.path(),
                size_bytes: meta.len(),
                modified,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::time::{Duration, SystemTime};

    use super::*;

    fn touch(dir: &std::path::Path, name: &str, bytes: usize, age: Duration) {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; bytes]).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    #[tokio::test]
    async fn lists_warcs_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "old.warc", 10, Duration::from_secs(3600));
        touch(dir.path(), "new.warc.gz", 20, Duration::from_secs(60));
        touch(dir.path(), "notes.txt", 5, Duration::ZERO);
        fs::create_dir(dir.path().join("nested.warc")).unwrap();

        let files = LocalWarcStore::new(dir.path()).list_local_files().await.unwrap();

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["new.warc.gz", "old.warc"]);
        assert_eq!(files[0].size_bytes, 20);
        assert_eq!(files[1].path, dir.path().join("old.warc"));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalWarcStore::new(dir.path().join("absent"));
        assert!(store.list_local_files().await.unwrap().is_empty());
    }

    #[test]
    fn test_extension_filter() {
        assert!(is_warc("capture.WARC"));
        assert!(is_warc("capture.warc.gz"));
        assert!(!is_warc("capture.warc.zip"));
    }
}
