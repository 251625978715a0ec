//! Sync orchestration: feed configuration, the sync job, scheduling, run reports
//! and Parquet snapshots.

mod config;
mod export;
mod guard;
mod job;
mod report;
mod scheduler;

pub use config::{BlobBackend, DriverMode, FeedConfig, FeedRegistry, SyncConfig, TimeoutConfig};
pub use export::{export_snapshot, ManifestFile, SnapshotManifest};
pub use guard::{FlightGuard, SingleFlight};
pub use job::{JobSettings, ParsedTable, ReadSource, SyncError, SyncJob};
pub use report::{
    load_recent_reports, write_run_report, ArtifactOutcome, ArtifactStatus, SyncReport,
};
pub use scheduler::{run_scheduled, FeedScheduler, DEFAULT_SYNC_CRON};

use anyhow::Result;
use tracing::info;

/// Builds the store, launcher and feed registry described by `config`.
///
/// Jobs built here share [`SingleFlight::process`], so two of them with the same
/// job name never sync at the same time.
pub fn build_job(config: &SyncConfig) -> Result<SyncJob> {
    let feeds = config.load_feeds()?;
    let store = config.build_store()?;
    let launcher = config.build_launcher(&feeds)?;
    info!(
        feeds = feeds.feeds.len(),
        store = %store.describe(),
        driver = launcher.name(),
        staging = %config.staging_dir.display(),
        "sync job configured"
    );
    Ok(SyncJob::new(config.job_settings(), feeds, store, launcher)
        .with_single_flight(SingleFlight::process()))
}

pub fn build_job_from_env() -> Result<SyncJob> {
    build_job(&SyncConfig::from_env()?)
}
