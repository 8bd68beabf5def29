//! Durable storage of fetched payloads.

mod fs;

pub use fs::FsStorageWriter;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::TaskKey;

/// Persists a payload and returns a locator for it.
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Stores `payload` for `key` and returns the artifact reference.
    ///
    /// On error no artifact exists at the returned location.
    async fn store(&self, key: &TaskKey, payload: &[u8]) -> Result<String, StorageError>;
}

/// Errors that can occur while writing an artifact.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File system error (create dir, write, sync, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Creates an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
