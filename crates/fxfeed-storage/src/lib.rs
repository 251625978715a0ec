//! Blob storage, local staging and HTTP plumbing for fxfeed.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

mod blob;
mod http;
mod staging;

pub use blob::{BlobStore, FsBlobStore, HttpBlobStore, MemoryBlobStore};
pub use http::{build_client, FetchedResponse, HttpClientConfig, HttpError, HttpFetcher};
pub use staging::{StagedFile, StagingArea};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob {key} not found")]
    NotFound { key: String },
    #[error("invalid blob key {key:?}")]
    InvalidKey { key: String },
    #[error("blob store rejected {key}: {message}")]
    Backend { key: String, message: String },
    #[error("request for blob {key} failed: {source}")]
    Http {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Replace `target` with `bytes` through a temp file in the same directory,
/// so concurrent readers observe either the previous or the new content.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp_path = write_temp(target, bytes).await?;
    if let Err(err) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(target, err));
    }
    Ok(())
}

/// Publish `bytes` at `target` only if nothing is there yet.
///
/// Returns `false` and leaves the existing file untouched when `target` exists.
pub(crate) async fn write_atomic_new(target: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
    let temp_path = write_temp(target, bytes).await?;
    let linked = fs::hard_link(&temp_path, target).await;
    let _ = fs::remove_file(&temp_path).await;
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(StoreError::io(target, err)),
    }
}

async fn write_temp(target: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let parent = target
        .parent()
        .ok_or_else(|| StoreError::io(target, std::io::ErrorKind::InvalidInput.into()))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| StoreError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|e| StoreError::io(&temp_path, e))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(&temp_path, err));
    }
    Ok(temp_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("dailySeries.csv");

        write_atomic(&target, b"first").await.expect("first write");
        write_atomic(&target, b"second").await.expect("second write");

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let leftovers = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn create_only_write_keeps_existing_file() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("dailySeries.csv");

        assert!(write_atomic_new(&target, b"first").await.expect("first publish"));
        assert!(!write_atomic_new(&target, b"stale").await.expect("second publish"));

        assert_eq!(std::fs::read(&target).unwrap(), b"first");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
