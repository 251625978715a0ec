use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::http::{build_client, HttpClientConfig};
use crate::{write_atomic, StoreError};

/// Durable key-to-bytes storage. A later `put` on the same key wins.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Short human-readable location, used in logs and run reports.
    fn describe(&self) -> String;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Directory-backed bucket: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    bucket_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.into().join(bucket),
        }
    }

    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.bucket_dir.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        write_atomic(&path, bytes).await?;
        debug!(key, path = %path.display(), bytes = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.bucket_dir.display())
    }
}

/// Object store reached over its JSON API (media upload / `alt=media` download).
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: Url,
    bucket: String,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, bucket: &str, http: &HttpClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid blob store url {base_url}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("blob store url {base_url} cannot be a base url");
        }
        Ok(Self {
            client: build_client(http)?,
            base_url,
            bucket: bucket.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn object_url(&self, key: &str) -> Url {
        self.endpoint(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn upload_url(&self, key: &str) -> Url {
        let mut url = self.endpoint(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        url
    }

    fn request_error(key: &str) -> impl FnOnce(reqwest::Error) -> StoreError + '_ {
        move |source| StoreError::Http {
            key: key.to_string(),
            source,
        }
    }

    fn status_error(key: &str, status: StatusCode) -> StoreError {
        if status == StatusCode::NOT_FOUND {
            StoreError::NotFound {
                key: key.to_string(),
            }
        } else {
            StoreError::Backend {
                key: key.to_string(),
                message: format!("http status {}", status.as_u16()),
            }
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.upload_url(key))
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(Self::request_error(key))?;
        if !resp.status().is_success() {
            return Err(Self::status_error(key, resp.status()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut url = self.object_url(key);
        url.query_pairs_mut().append_pair("alt", "media");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::request_error(key))?;
        if !resp.status().is_success() {
            return Err(Self::status_error(key, resp.status()));
        }
        let bytes = resp.bytes().await.map_err(Self::request_error(key))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let resp = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(Self::request_error(key))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Self::status_error(key, s)),
        }
    }

    fn describe(&self) -> String {
        format!("{}#{}", self.base_url, self.bucket)
    }
}
