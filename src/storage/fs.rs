//! Filesystem artifact layout:
//! `{root}/{symbol}/{YYYY}/{MM}/{symbol}_{expiration}_{date}_{interval}.csv`,
//! where year and month come from the target date.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Datelike;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::{StorageError, StorageWriter};
use crate::catalog::TaskKey;

/// Writes artifacts under a root directory.
///
/// Each write goes to a uniquely named `.part` file in the destination
/// directory, is synced, then renamed over the final name. Readers never
/// see a truncated CSV.
#[derive(Debug, Clone)]
pub struct FsStorageWriter {
    root: PathBuf,
    interval: String,
}

impl FsStorageWriter {
    /// Creates a writer rooted at `root`; `interval` becomes the file suffix.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, interval: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            interval: interval.into(),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the final artifact path for `key`.
    #[must_use]
    pub fn artifact_path(&self, key: &TaskKey) -> PathBuf {
        let date = key.target_date;
        self.root
            .join(&key.symbol)
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!(
                "{}_{}_{}_{}.csv",
                key.symbol,
                key.expiration_compact(),
                key.target_date_compact(),
                self.interval
            ))
    }
}

#[async_trait]
impl StorageWriter for FsStorageWriter {
    #[instrument(skip(self, payload), fields(key = %key, bytes = payload.len()))]
    async fn store(&self, key: &TaskKey, payload: &[u8]) -> Result<String, StorageError> {
        let final_path = self.artifact_path(key);
        if let Some(dir) = final_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }

        let temp_path = temp_path_for(&final_path);
        if let Err(err) = write_synced(&temp_path, payload).await {
            discard(&temp_path).await;
            return Err(err);
        }
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            discard(&temp_path).await;
            return Err(StorageError::io(&final_path, e));
        }

        debug!(path = %final_path.display(), "artifact stored");
        Ok(final_path.display().to_string())
    }
}

// Unique per write: a worker whose lease was reclaimed may still be writing
// the same artifact.
fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".{:08x}.part", rand::random::<u32>()));
    final_path.with_file_name(name)
}

async fn write_synced(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    let file = File::create(path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(payload)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    writer.flush().await.map_err(|e| StorageError::io(path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| StorageError::io(path, e))
}

async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove partial artifact");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> TaskKey {
        "SPXW,2024-06-21,2024-05-31".parse().unwrap()
    }

    #[test]
    fn test_artifact_path_layout_uses_target_date_month() {
        let writer = FsStorageWriter::new("/data", "5s");
        assert_eq!(
            writer.artifact_path(&key()),
            PathBuf::from("/data/SPXW/2024/05/SPXW_20240621_20240531_5s.csv")
        );
    }

    #[tokio::test]
    async fn test_store_writes_file_and_returns_path() {
        let dir = TempDir::new().unwrap();
        let writer = FsStorageWriter::new(dir.path(), "5s");

        let reference = writer.store(&key(), b"symbol,strike\nSPXW,5000\n").await.unwrap();

        let expected = writer.artifact_path(&key());
        assert_eq!(reference, expected.display().to_string());
        assert_eq!(
            std::fs::read(&expected).unwrap(),
            b"symbol,strike\nSPXW,5000\n"
        );
    }

    #[tokio::test]
    async fn test_store_leaves_no_part_files() {
        let dir = TempDir::new().unwrap();
        let writer = FsStorageWriter::new(dir.path(), "5s");
        writer.store(&key(), b"a,b\n").await.unwrap();

        let month_dir = writer.artifact_path(&key()).parent().unwrap().to_path_buf();
        let names: Vec<String> = std::fs::read_dir(month_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["SPXW_20240621_20240531_5s.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_store_overwrites_existing_artifact() {
        let dir = TempDir::new().unwrap();
        let writer = FsStorageWriter::new(dir.path(), "5s");
        writer.store(&key(), b"old,data\n").await.unwrap();
        writer.store(&key(), b"new,data\n").await.unwrap();

        assert_eq!(
            std::fs::read(writer.artifact_path(&key())).unwrap(),
            b"new,data\n"
        );
    }

    #[tokio::test]
    async fn test_store_under_file_root_returns_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let writer = FsStorageWriter::new(&blocker, "5s");

        let err = writer.store(&key(), b"a,b\n").await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
