use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fxfeed_core::ArtifactName;
use tokio::fs;

use crate::{sha256_hex, write_atomic, write_atomic_new, StoreError};

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub name: ArtifactName,
    pub path: PathBuf,
    pub byte_size: usize,
    pub content_hash: String,
    pub staged_at: DateTime<Utc>,
}

/// Local best-effort cache of artifacts, one file per logical name.
///
/// Writes replace the file atomically, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &ArtifactName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    pub async fn write(&self, name: &ArtifactName, bytes: &[u8]) -> Result<StagedFile, StoreError> {
        let path = self.path_for(name);
        write_atomic(&path, bytes).await?;
        Ok(StagedFile {
            name: name.clone(),
            path,
            byte_size: bytes.len(),
            content_hash: sha256_hex(bytes),
            staged_at: Utc::now(),
        })
    }

    /// Read-through fill: stages `bytes` only when no file is staged yet.
    ///
    /// Returns `false` when a file appeared in the meantime; that copy comes from a
    /// later sync and is kept.
    pub async fn fill(&self, name: &ArtifactName, bytes: &[u8]) -> Result<bool, StoreError> {
        write_atomic_new(&self.path_for(name), bytes).await
    }

    /// Returns `None` on a cache miss.
    pub async fn read(&self, name: &ArtifactName) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    pub async fn contains(&self, name: &ArtifactName) -> Result<bool, StoreError> {
        let path = self.path_for(name);
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    pub async fn evict(&self, name: &ArtifactName) -> Result<bool, StoreError> {
        let path = self.path_for(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }
}
