use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use fxfeed_adapters::{ArtifactTarget, CsvParser, DriverLauncher, Fetcher, ParseError};
use fxfeed_core::{ArtifactName, ColumnHeader, CsvRecord, InvalidArtifactName};
use fxfeed_storage::{sha256_hex, BlobStore, StagingArea, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{FeedConfig, FeedRegistry};
use crate::guard::{FlightGuard, SingleFlight};
use crate::report::{write_run_report, ArtifactOutcome, ArtifactStatus, SyncReport};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync job {job} is already running")]
    AlreadyRunning { job: String },
    #[error("{} of {} artifacts failed in run {}", .0.failed(), .0.artifacts.len(), .0.run_id)]
    ArtifactsFailed(Box<SyncReport>),
    #[error("no feed configured with id {feed_id}")]
    UnknownFeed { feed_id: String },
    #[error("artifact {name} is neither staged nor stored")]
    NotFound { name: ArtifactName },
    #[error(transparent)]
    InvalidName(#[from] InvalidArtifactName),
    #[error("artifact {name} is malformed: {source}")]
    Malformed {
        name: ArtifactName,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// The run report, when the run itself completed.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::ArtifactsFailed(report) => Some(&**report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub job_name: String,
    pub staging_dir: PathBuf,
    pub key_prefix: String,
    pub reports_dir: Option<PathBuf>,
}

impl JobSettings {
    pub fn new(job_name: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_name: job_name.into(),
            staging_dir: staging_dir.into(),
            key_prefix: String::new(),
            reports_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Staging,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTable {
    pub name: ArtifactName,
    pub header: ColumnHeader,
    pub records: Vec<CsvRecord>,
    pub source: ReadSource,
}

/// Fetches configured artifacts into staging and the blob store, and serves
/// parsed reads back out of them.
pub struct SyncJob {
    name: String,
    feeds: FeedRegistry,
    staging: StagingArea,
    store: Arc<dyn BlobStore>,
    launcher: Arc<dyn DriverLauncher>,
    key_prefix: String,
    reports_dir: Option<PathBuf>,
    flights: SingleFlight,
}

impl SyncJob {
    /// The job starts with a private single-flight registry; jobs that must
    /// exclude each other share one through [`SyncJob::with_single_flight`].
    pub fn new(
        settings: JobSettings,
        feeds: FeedRegistry,
        store: Arc<dyn BlobStore>,
        launcher: Arc<dyn DriverLauncher>,
    ) -> Self {
        Self {
            name: settings.job_name,
            feeds,
            staging: StagingArea::new(settings.staging_dir),
            store,
            launcher,
            key_prefix: settings.key_prefix.trim_matches('/').to_string(),
            reports_dir: settings.reports_dir,
            flights: SingleFlight::new(),
        }
    }

    /// Share a single-flight registry with other jobs in this process.
    pub fn with_single_flight(mut self, flights: SingleFlight) -> Self {
        self.flights = flights;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feeds(&self) -> &FeedRegistry {
        &self.feeds
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.flights.is_running(&self.name)
    }

    pub fn blob_key(&self, name: &ArtifactName) -> String {
        if self.key_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.key_prefix, name)
        }
    }

    pub async fn sync(&self, feed: &FeedConfig) -> Result<SyncReport, SyncError> {
        let _flight = self.claim()?;
        self.run(&[feed]).await
    }

    pub async fn sync_feed(&self, feed_id: &str) -> Result<SyncReport, SyncError> {
        let feed = self
            .feeds
            .feed(feed_id)
            .ok_or_else(|| SyncError::UnknownFeed {
                feed_id: feed_id.to_string(),
            })?;
        self.sync(feed).await
    }

    /// One run over every enabled feed, under a single claim of the job name.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        let _flight = self.claim()?;
        let feeds: Vec<&FeedConfig> = self.feeds.enabled().collect();
        self.run(&feeds).await
    }

    pub async fn read_parsed(&self, name: &str) -> Result<Vec<CsvRecord>, SyncError> {
        Ok(self.read_table(name).await?.records)
    }

    pub async fn read_table(&self, name: &str) -> Result<ParsedTable, SyncError> {
        let name = ArtifactName::parse(name)?;
        let (bytes, source) = self.load_bytes(&name).await?;
        let text = String::from_utf8_lossy(&bytes);
        let parser = CsvParser::new(self.feeds.layout_for(&name));
        let parsed = parser.parse(&text).map_err(|source| SyncError::Malformed {
            name: name.clone(),
            source,
        })?;
        let header = parsed.header().clone();
        let records = parsed.into_records();
        debug!(artifact = %name, records = records.len(), ?source, "artifact parsed");
        Ok(ParsedTable {
            name,
            header,
            records,
            source,
        })
    }

    fn claim(&self) -> Result<FlightGuard, SyncError> {
        self.flights.try_acquire(&self.name).ok_or_else(|| {
            warn!(job = %self.name, "sync already in progress, skipping trigger");
            SyncError::AlreadyRunning {
                job: self.name.clone(),
            }
        })
    }

    async fn run(&self, feeds: &[&FeedConfig]) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", job = %self.name, %run_id);
        async move {
            let started_at = Utc::now();
            info!(feeds = feeds.len(), store = %self.store.describe(), "sync started");

            let mut artifacts = Vec::new();
            for feed in feeds {
                let fetcher = Fetcher::new(self.launcher.clone(), feed.fetch_policy());
                for target in &feed.artifacts {
                    let span = info_span!("fetch_artifact", %run_id, artifact = %target.name);
                    let outcome = self.sync_artifact(feed, &fetcher, target).instrument(span).await;
                    artifacts.push(outcome);
                }
            }

            let report = SyncReport {
                run_id,
                job_name: self.name.clone(),
                store: self.store.describe(),
                started_at,
                finished_at: Utc::now(),
                artifacts,
            };
            if let Some(dir) = &self.reports_dir {
                if let Err(err) = write_run_report(dir, &report).await {
                    warn!(error = %format!("{err:#}"), "writing run report failed");
                }
            }

            info!(uploaded = report.uploaded(), failed = report.failed(), "sync finished");
            if report.is_success() {
                Ok(report)
            } else {
                Err(SyncError::ArtifactsFailed(Box::new(report)))
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch, stage, then upload. Staging is a cache: failing to stage does not block the upload.
    async fn sync_artifact(
        &self,
        feed: &FeedConfig,
        fetcher: &Fetcher,
        target: &ArtifactTarget,
    ) -> ArtifactOutcome {
        let blob_key = self.blob_key(&target.name);
        let outcome = |status: ArtifactStatus| ArtifactOutcome {
            feed_id: feed.feed_id.clone(),
            name: target.name.clone(),
            blob_key: blob_key.clone(),
            status,
        };

        let raw = match fetcher.fetch(&feed.source_url, target).await {
            Ok(raw) => raw,
            Err(failure) => {
                warn!(feed = %feed.feed_id, artifact = %target.name, stage = %failure.stage, error = %failure, "fetch failed");
                return outcome(ArtifactStatus::FetchFailed {
                    stage: failure.stage,
                    timed_out: failure.is_timeout(),
                    error: failure.to_string(),
                });
            }
        };

        let staged = match self.staging.write(&raw.name, &raw.bytes).await {
            Ok(file) => {
                debug!(artifact = %raw.name, path = %file.path.display(), "artifact staged");
                true
            }
            Err(err) => {
                warn!(artifact = %raw.name, error = %err, "staging failed, uploading anyway");
                false
            }
        };

        match self.store.put(&blob_key, &raw.bytes).await {
            Ok(()) => {
                info!(artifact = %raw.name, key = %blob_key, bytes = raw.byte_size(), "artifact uploaded");
                outcome(ArtifactStatus::Uploaded {
                    bytes: raw.byte_size(),
                    sha256: sha256_hex(&raw.bytes),
                    staged,
                })
            }
            Err(err) => {
                warn!(artifact = %raw.name, key = %blob_key, error = %err, "upload failed");
                outcome(ArtifactStatus::UploadFailed {
                    bytes: raw.byte_size(),
                    staged,
                    error: err.to_string(),
                })
            }
        }
    }

    /// Staging first; on a miss, the store, filling staging on the way back.
    async fn load_bytes(&self, name: &ArtifactName) -> Result<(Vec<u8>, ReadSource), SyncError> {
        match self.staging.read(name).await {
            Ok(Some(bytes)) => return Ok((bytes, ReadSource::Staging)),
            Ok(None) => {}
            Err(err) => warn!(artifact = %name, error = %err, "staging read failed, trying store"),
        }

        let key = self.blob_key(name);
        let bytes = match self.store.get(&key).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                return Err(SyncError::NotFound { name: name.clone() })
            }
            Err(err) => return Err(err.into()),
        };

        match self.staging.fill(name, &bytes).await {
            Ok(true) => {}
            Ok(false) => debug!(artifact = %name, "staging refilled by a newer sync, keeping it"),
            Err(err) => warn!(artifact = %name, error = %err, "filling staging failed"),
        }
        Ok((bytes, ReadSource::Store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use async_trait::async_trait;
    use fxfeed_adapters::{
        DriverError, FetchStage, FixtureDownload, FixtureLauncher, FixturePage, FixtureSite,
        PageDriver,
    };
    use fxfeed_core::CsvLayout;
    use fxfeed_storage::MemoryBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Semaphore;

    const PAGE_URL: &str = "https://bank.test/rates";
    const DAILY: &str = "meta1\nmeta2\nmeta3\nmeta4\nmeta5\nData;USD\n2024-01-01;4.97\n";
    const ARCHIVE: &str = "m\nm\nm\nm\nm\nData;EUR;USD\n02.01.2024;4,9700;4,5100\n03.01.2024;4,9710;4,5200\n";

    fn feed(artifacts: &[&str]) -> FeedConfig {
        FeedConfig {
            feed_id: "bnr".into(),
            display_name: None,
            enabled: true,
            source_url: PAGE_URL.into(),
            settle_delay_ms: 1,
            timeouts: TimeoutConfig {
                navigation_secs: 30,
                selector_secs: 1,
                download_secs: 1,
            },
            layout: CsvLayout::new(5, 6),
            artifacts: artifacts
                .iter()
                .map(|name| ArtifactTarget {
                    name: ArtifactName::parse(*name).unwrap(),
                    trigger_selector: format!("#trigger-{name}"),
                    download_selector: format!("#download-{name}"),
                })
                .collect(),
        }
    }

    /// Serves `bodies`; artifacts without a body have a trigger that never shows up.
    fn site(bodies: &[(&str, &str)]) -> FixtureSite {
        FixtureSite {
            pages: vec![FixturePage {
                url: PAGE_URL.into(),
                visible: bodies.iter().map(|(name, _)| format!("#trigger-{name}")).collect(),
                downloads: bodies
                    .iter()
                    .map(|(name, body)| FixtureDownload {
                        selector: format!("#download-{name}"),
                        after: None,
                        path: None,
                        inline_text: Some(body.to_string()),
                    })
                    .collect(),
            }],
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryBlobStore,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, bytes).await
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            self.inner.get(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    struct Harness {
        _dir: TempDir,
        staging_dir: PathBuf,
        reports_dir: PathBuf,
        store: Arc<CountingStore>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            Self {
                staging_dir: dir.path().join("staging"),
                reports_dir: dir.path().join("reports"),
                store: Arc::new(CountingStore::default()),
                _dir: dir,
            }
        }

        fn job(&self, feed: FeedConfig, launcher: Arc<dyn DriverLauncher>) -> SyncJob {
            let mut settings = JobSettings::new("fx-feed-sync", &self.staging_dir);
            settings.reports_dir = Some(self.reports_dir.clone());
            SyncJob::new(
                settings,
                FeedRegistry { feeds: vec![feed] },
                self.store.clone(),
                launcher,
            )
        }

        fn puts(&self) -> usize {
            self.store.puts.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn sync_then_read_parsed_round_trip() {
        let harness = Harness::new();
        let feed = feed(&["dailySeries.csv", "archive.csv"]);
        let launcher = Arc::new(FixtureLauncher::new(site(&[
            ("dailySeries.csv", DAILY),
            ("archive.csv", ARCHIVE),
        ])));
        let job = harness.job(feed.clone(), launcher);

        let report = job.sync(&feed).await.unwrap();
        assert_eq!(report.uploaded(), 2);
        assert_eq!(harness.puts(), 2);
        assert!(report.artifacts.iter().all(|a| matches!(
            a.status,
            ArtifactStatus::Uploaded { staged: true, .. }
        )));
        assert!(harness
            .reports_dir
            .join(report.run_id.to_string())
            .join("sync_report.json")
            .exists());

        let records = job.read_parsed("dailySeries.csv").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Data"), Some("2024-01-01"));
        assert_eq!(records[0].get("USD"), Some("4.97"));

        let archive = job.read_table("archive.csv").await.unwrap();
        assert_eq!(archive.source, ReadSource::Staging);
        assert_eq!(archive.header.columns(), ["Data", "EUR", "USD"]);
        assert_eq!(archive.records[1].get("EUR"), Some("4,9710"));
    }

    #[tokio::test]
    async fn fetch_timeout_skips_upload_and_fails_run() {
        let harness = Harness::new();
        let feed = feed(&["dailySeries.csv"]);
        let job = harness.job(feed.clone(), Arc::new(HangingLauncher));

        let err = job.sync(&feed).await.unwrap_err();
        let report = err.report().unwrap();
        let outcome = report.outcome("dailySeries.csv").unwrap();
        assert!(matches!(
            outcome.status,
            ArtifactStatus::FetchFailed {
                stage: FetchStage::WaitTrigger,
                timed_out: true,
                ..
            }
        ));
        assert_eq!(harness.puts(), 0);
        assert!(!job.staging().contains(&outcome.name).await.unwrap());
    }

    #[tokio::test]
    async fn one_failed_artifact_does_not_stop_the_others() {
        let harness = Harness::new();
        let feed = feed(&["archive.csv", "dailySeries.csv"]);
        let launcher = Arc::new(FixtureLauncher::new(site(&[("dailySeries.csv", DAILY)])));
        let job = harness.job(feed.clone(), launcher);

        let err = job.sync(&feed).await.unwrap_err();
        let report = err.report().unwrap();
        assert_eq!((report.uploaded(), report.failed()), (1, 1));
        assert!(report.outcome("dailySeries.csv").unwrap().is_uploaded());
        assert_eq!(harness.puts(), 1);
        assert!(err.to_string().starts_with("1 of 2 artifacts failed"));
    }

    #[tokio::test]
    async fn reading_unknown_artifact_is_not_found() {
        let harness = Harness::new();
        let job = harness.job(feed(&["dailySeries.csv"]), Arc::new(HangingLauncher));
        assert!(matches!(
            job.read_parsed("missing.csv").await,
            Err(SyncError::NotFound { .. })
        ));
        assert!(matches!(
            job.read_parsed("../etc/passwd").await,
            Err(SyncError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn store_hit_fills_staging() {
        let harness = Harness::new();
        let job = harness.job(feed(&["dailySeries.csv"]), Arc::new(HangingLauncher));
        harness.store.put("dailySeries.csv", DAILY.as_bytes()).await.unwrap();

        let first = job.read_table("dailySeries.csv").await.unwrap();
        assert_eq!(first.source, ReadSource::Store);
        let second = job.read_table("dailySeries.csv").await.unwrap();
        assert_eq!(second.source, ReadSource::Staging);
        assert_eq!(first.records, second.records);
    }

    /// Reads the blob, then parks until the gate opens.
    struct GatedGetStore {
        inner: MemoryBlobStore,
        fetched: tokio::sync::Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl BlobStore for GatedGetStore {
        async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
            self.inner.put(key, bytes).await
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            let bytes = self.inner.get(key).await?;
            self.fetched.notify_one();
            self.gate.acquire().await.unwrap().forget();
            Ok(bytes)
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }

        fn describe(&self) -> String {
            "gated".into()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_read_does_not_restage_older_bytes_over_a_newer_sync() {
        const OLD: &str = "m\nm\nm\nm\nm\nData;USD\n2024-01-02;1.00\n";
        const NEW: &str = "m\nm\nm\nm\nm\nData;USD\n2024-01-02;2.00\n";
        let dir = tempdir().unwrap();
        let store = Arc::new(GatedGetStore {
            inner: MemoryBlobStore::new(),
            fetched: tokio::sync::Notify::new(),
            gate: Semaphore::new(0),
        });
        store.inner.put("dailySeries.csv", OLD.as_bytes()).await.unwrap();
        let feed = feed(&["dailySeries.csv"]);
        let job = Arc::new(SyncJob::new(
            JobSettings::new("fx-feed-sync", dir.path().join("staging")),
            FeedRegistry { feeds: vec![feed.clone()] },
            store.clone(),
            Arc::new(FixtureLauncher::new(site(&[("dailySeries.csv", NEW)]))),
        ));

        let reader = {
            let job = job.clone();
            tokio::spawn(async move { job.read_table("dailySeries.csv").await })
        };
        store.fetched.notified().await;

        job.sync(&feed).await.unwrap();
        store.gate.add_permits(8);
        let stale = reader.await.unwrap().unwrap();
        assert_eq!(stale.source, ReadSource::Store);
        assert_eq!(stale.records[0].get("USD"), Some("1.00"));

        let fresh = job.read_table("dailySeries.csv").await.unwrap();
        assert_eq!(fresh.source, ReadSource::Staging);
        assert_eq!(fresh.records[0].get("USD"), Some("2.00"));
        assert_eq!(store.inner.get("dailySeries.csv").await.unwrap(), NEW.as_bytes());
    }

    #[tokio::test]
    async fn staging_shadows_store() {
        let harness = Harness::new();
        let job = harness.job(feed(&["dailySeries.csv"]), Arc::new(HangingLauncher));
        let name = ArtifactName::parse("dailySeries.csv").unwrap();
        job.staging().write(&name, DAILY.as_bytes()).await.unwrap();

        let table = job.read_table("dailySeries.csv").await.unwrap();
        assert_eq!(table.source, ReadSource::Staging);
        assert_eq!(harness.puts(), 0);
    }

    #[tokio::test]
    async fn malformed_artifact_is_reported() {
        let harness = Harness::new();
        let job = harness.job(feed(&["dailySeries.csv"]), Arc::new(HangingLauncher));
        harness.store.put("dailySeries.csv", b"only\ntwo lines\n").await.unwrap();
        assert!(matches!(
            job.read_parsed("dailySeries.csv").await,
            Err(SyncError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn key_prefix_namespaces_uploads() {
        let harness = Harness::new();
        let feed = feed(&["dailySeries.csv"]);
        let mut settings = JobSettings::new("fx-feed-sync", &harness.staging_dir);
        settings.key_prefix = "/prod/".into();
        let job = SyncJob::new(
            settings,
            FeedRegistry { feeds: vec![feed.clone()] },
            harness.store.clone(),
            Arc::new(FixtureLauncher::new(site(&[("dailySeries.csv", DAILY)]))),
        );

        let report = job.sync(&feed).await.unwrap();
        assert_eq!(report.artifacts[0].blob_key, "prod/dailySeries.csv");
        assert_eq!(harness.store.inner.keys().await, vec!["prod/dailySeries.csv"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_sync_is_skipped() {
        let harness = Harness::new();
        let gate = Arc::new(Semaphore::new(0));
        let launcher = Arc::new(GatedLauncher {
            gate: gate.clone(),
            inner: FixtureLauncher::new(site(&[("dailySeries.csv", DAILY)])),
        });
        let job = Arc::new(harness.job(feed(&["dailySeries.csv"]), launcher));

        let first = tokio::spawn({
            let job = job.clone();
            async move { job.sync_all().await }
        });
        while !job.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            job.sync_all().await,
            Err(SyncError::AlreadyRunning { .. })
        ));
        gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert!(!job.is_running());
        assert_eq!(harness.puts(), 1);
    }

    #[tokio::test]
    async fn unknown_feed_id_is_rejected() {
        let harness = Harness::new();
        let job = harness.job(feed(&["dailySeries.csv"]), Arc::new(HangingLauncher));
        assert!(matches!(
            job.sync_feed("ecb").await,
            Err(SyncError::UnknownFeed { .. })
        ));
    }

    struct HangingLauncher;

    #[async_trait]
    impl DriverLauncher for HangingLauncher {
        async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
            Ok(Box::new(HangingPage))
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    /// Loads fine, but no selector ever becomes visible.
    struct HangingPage;

    #[async_trait]
    impl PageDriver for HangingPage {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn wait_for_load(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn wait_for_visible(&self, _selector: &str) -> Result<(), DriverError> {
            std::future::pending().await
        }

        async fn click(&self, _selector: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn await_download(&self) -> Result<Vec<u8>, DriverError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    struct GatedLauncher {
        gate: Arc<Semaphore>,
        inner: FixtureLauncher,
    }

    #[async_trait]
    impl DriverLauncher for GatedLauncher {
        async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| DriverError::Launch(e.to_string()))?;
            self.inner.launch().await
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }
}
