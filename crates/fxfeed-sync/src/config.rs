use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fxfeed_adapters::{
    load_fixture_site, ArtifactTarget, DriverLauncher, FetchPolicy, FixtureLauncher, FixtureSite,
    HttpDriverLauncher,
};
use fxfeed_core::{ArtifactName, CsvLayout};
use fxfeed_storage::{BlobStore, FsBlobStore, HttpBlobStore, HttpClientConfig, MemoryBlobStore};
use serde::{Deserialize, Serialize};

use crate::job::JobSettings;
use crate::scheduler::DEFAULT_SYNC_CRON;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedRegistry {
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    pub feed_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub source_url: String,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub layout: CsvLayout,
    pub artifacts: Vec<ArtifactTarget>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_secs: u64,
    pub selector_secs: u64,
    pub download_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let policy = FetchPolicy::default();
        Self {
            navigation_secs: policy.navigation_timeout.as_secs(),
            selector_secs: policy.selector_timeout.as_secs(),
            download_secs: policy.download_timeout.as_secs(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    3000
}

impl FeedConfig {
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            navigation_timeout: Duration::from_secs(self.timeouts.navigation_secs),
            selector_timeout: Duration::from_secs(self.timeouts.selector_secs),
            download_timeout: Duration::from_secs(self.timeouts.download_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn artifact(&self, name: &ArtifactName) -> Option<&ArtifactTarget> {
        self.artifacts.iter().find(|a| &a.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed_id.trim().is_empty() {
            bail!("feed with source {} has an empty feed_id", self.source_url);
        }
        if self.source_url.trim().is_empty() {
            bail!("feed {} has an empty source_url", self.feed_id);
        }
        if self.artifacts.is_empty() {
            bail!("feed {} lists no artifacts", self.feed_id);
        }
        self.layout
            .validate()
            .with_context(|| format!("feed {} has an invalid layout", self.feed_id))?;
        for artifact in &self.artifacts {
            if artifact.trigger_selector.trim().is_empty()
                || artifact.download_selector.trim().is_empty()
            {
                bail!(
                    "artifact {} of feed {} needs both selectors",
                    artifact.name,
                    self.feed_id
                );
            }
        }
        Ok(())
    }
}

impl FeedRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let registry: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        registry
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(registry)
    }

    /// Artifact names must be unique across feeds: they share one staging directory.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("no feeds configured");
        }
        let mut feed_ids = HashSet::new();
        let mut names = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !feed_ids.insert(feed.feed_id.as_str()) {
                bail!("duplicate feed_id {}", feed.feed_id);
            }
            for artifact in &feed.artifacts {
                if !names.insert(artifact.name.as_str()) {
                    bail!("artifact name {} is configured more than once", artifact.name);
                }
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &FeedConfig> {
        self.feeds.iter().filter(|f| f.enabled)
    }

    pub fn feed(&self, feed_id: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.feed_id == feed_id)
    }

    pub fn feed_for_artifact(&self, name: &ArtifactName) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.artifact(name).is_some())
    }

    pub fn layout_for(&self, name: &ArtifactName) -> CsvLayout {
        self.feed_for_artifact(name)
            .map(|f| f.layout.clone())
            .unwrap_or_default()
    }

    pub fn artifact_names(&self) -> Vec<ArtifactName> {
        self.feeds
            .iter()
            .flat_map(|f| f.artifacts.iter().map(|a| a.name.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Fs,
    Http,
    Memory,
}

/// `Http` follows link targets only; pages whose controls post back through
/// script (the bundled bnr feed) need `Fixture` or a browser-backed launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Http,
    Fixture,
}

impl DriverMode {
    /// Parses `FXFEED_DRIVER`; unset selects the recorded-site driver.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            None | Some("fixture") => Ok(DriverMode::Fixture),
            Some("http") => Ok(DriverMode::Http),
            Some(other) => bail!("unknown FXFEED_DRIVER {other:?} (expected fixture or http)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub job_name: String,
    pub workspace_root: PathBuf,
    pub feeds_file: PathBuf,
    pub staging_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub blob_backend: BlobBackend,
    pub blob_root: PathBuf,
    pub blob_url: String,
    pub bucket: String,
    pub key_prefix: String,
    pub driver: DriverMode,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let workspace_root = std::env::var("FXFEED_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let env_path = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        let blob_backend = match std::env::var("FXFEED_BLOB_BACKEND").as_deref() {
            Ok("fs") | Err(_) => BlobBackend::Fs,
            Ok("http") => BlobBackend::Http,
            Ok("memory") => BlobBackend::Memory,
            Ok(other) => bail!("unknown FXFEED_BLOB_BACKEND {other:?} (expected fs, http or memory)"),
        };
        let driver = DriverMode::from_env_value(std::env::var("FXFEED_DRIVER").ok().as_deref())?;

        Ok(Self {
            job_name: std::env::var("FXFEED_JOB_NAME")
                .unwrap_or_else(|_| "fx-feed-sync".to_string()),
            feeds_file: env_path("FXFEED_FEEDS_FILE", workspace_root.join("feeds.yaml")),
            staging_dir: env_path("FXFEED_STAGING_DIR", std::env::temp_dir().join("fxfeed")),
            reports_dir: env_path("FXFEED_REPORTS_DIR", workspace_root.join("reports")),
            blob_backend,
            blob_root: env_path("FXFEED_BLOB_ROOT", workspace_root.join("blobs")),
            blob_url: std::env::var("FXFEED_BLOB_URL")
                .unwrap_or_else(|_| "https://storage.googleapis.com".to_string()),
            bucket: std::env::var("FXFEED_BUCKET").unwrap_or_else(|_| "fxfeed".to_string()),
            key_prefix: std::env::var("FXFEED_KEY_PREFIX").unwrap_or_default(),
            driver,
            scheduler_enabled: std::env::var("FXFEED_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("FXFEED_SYNC_CRON")
                .unwrap_or_else(|_| DEFAULT_SYNC_CRON.to_string()),
            user_agent: std::env::var("FXFEED_USER_AGENT")
                .unwrap_or_else(|_| "fxfeed-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("FXFEED_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            workspace_root,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            job_name: self.job_name.clone(),
            staging_dir: self.staging_dir.clone(),
            key_prefix: self.key_prefix.clone(),
            reports_dir: Some(self.reports_dir.clone()),
        }
    }

    pub fn load_feeds(&self) -> Result<FeedRegistry> {
        FeedRegistry::load(&self.feeds_file)
    }

    pub fn build_store(&self) -> Result<Arc<dyn BlobStore>> {
        Ok(match self.blob_backend {
            BlobBackend::Fs => Arc::new(FsBlobStore::new(&self.blob_root, &self.bucket)),
            BlobBackend::Http => Arc::new(HttpBlobStore::new(
                &self.blob_url,
                &self.bucket,
                &self.http_client_config(),
            )?),
            BlobBackend::Memory => Arc::new(MemoryBlobStore::new()),
        })
    }

    /// Fixture mode merges `fixtures/<feed_id>/site.json` of every feed into one site.
    pub fn build_launcher(&self, feeds: &FeedRegistry) -> Result<Arc<dyn DriverLauncher>> {
        match self.driver {
            DriverMode::Http => Ok(Arc::new(HttpDriverLauncher::new(self.http_client_config()))),
            DriverMode::Fixture => {
                let mut site = FixtureSite { pages: Vec::new() };
                for feed in &feeds.feeds {
                    let path = self
                        .workspace_root
                        .join("fixtures")
                        .join(&feed.feed_id)
                        .join("site.json");
                    site.pages.extend(load_fixture_site(&path)?.pages);
                }
                Ok(Arc::new(FixtureLauncher::new(site)))
            }
        }
    }
}
