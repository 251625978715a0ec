use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::job::{SyncError, SyncJob};
use crate::report::SyncReport;

/// Six-field cron (seconds first): daily at 02:00.
pub const DEFAULT_SYNC_CRON: &str = "0 0 2 * * *";

pub struct FeedScheduler {
    job: Arc<SyncJob>,
    cron: String,
}

impl FeedScheduler {
    pub fn new(job: Arc<SyncJob>, cron: impl Into<String>) -> Self {
        Self {
            job,
            cron: cron.into(),
        }
    }

    pub fn cron(&self) -> &str {
        &self.cron
    }

    pub fn build_job(&self) -> Result<Job> {
        let job = self.job.clone();
        Job::new_async(self.cron.as_str(), move |_uuid, _lock| {
            let job = job.clone();
            Box::pin(async move {
                run_scheduled(&job).await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {}", self.cron))
    }

    pub async fn start(&self) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        sched
            .add(self.build_job()?)
            .await
            .context("adding scheduler job")?;
        sched.start().await.context("starting scheduler")?;
        info!(job = %self.job.name(), cron = %self.cron, "scheduler started");
        Ok(sched)
    }

    /// Runs triggers until ctrl-c, then shuts the scheduler down.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        let mut sched = self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("shutdown requested, stopping scheduler");
        sched.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}

/// One scheduled trigger. Failures are logged; a trigger never takes the scheduler down.
pub async fn run_scheduled(job: &SyncJob) -> Option<SyncReport> {
    match job.sync_all().await {
        Ok(report) => {
            info!(run_id = %report.run_id, uploaded = report.uploaded(), "scheduled sync complete");
            Some(report)
        }
        Err(SyncError::AlreadyRunning { job }) => {
            warn!(%job, "previous sync still running, trigger skipped");
            None
        }
        Err(SyncError::ArtifactsFailed(report)) => {
            error!(run_id = %report.run_id, failed = report.failed(), "scheduled sync finished with failures");
            Some(*report)
        }
        Err(err) => {
            error!(error = %err, "scheduled sync failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, FeedRegistry, TimeoutConfig};
    use crate::guard::SingleFlight;
    use crate::job::JobSettings;
    use fxfeed_adapters::{ArtifactTarget, FixtureDownload, FixtureLauncher, FixturePage, FixtureSite};
    use fxfeed_core::{ArtifactName, CsvLayout};
    use fxfeed_storage::MemoryBlobStore;
    use tempfile::tempdir;

    fn job(staging: &std::path::Path) -> SyncJob {
        let feed = FeedConfig {
            feed_id: "bnr".into(),
            display_name: Some("BNR".into()),
            enabled: true,
            source_url: "https://bank.test/rates".into(),
            settle_delay_ms: 1,
            timeouts: TimeoutConfig::default(),
            layout: CsvLayout::default(),
            artifacts: vec![ArtifactTarget {
                name: ArtifactName::parse("dailySeries.csv").unwrap(),
                trigger_selector: "#generate".into(),
                download_selector: "#csv".into(),
            }],
        };
        let site = FixtureSite {
            pages: vec![FixturePage {
                url: "https://bank.test/rates".into(),
                visible: vec!["#generate".into()],
                downloads: vec![FixtureDownload {
                    selector: "#csv".into(),
                    after: None,
                    path: None,
                    inline_text: Some("m\nm\nm\nm\nm\nData;USD\n2024-01-01;4.97\n".into()),
                }],
            }],
        };
        SyncJob::new(
            JobSettings::new("fx-feed-sync", staging),
            FeedRegistry { feeds: vec![feed] },
            Arc::new(MemoryBlobStore::new()),
            Arc::new(FixtureLauncher::new(site)),
        )
    }

    #[tokio::test]
    async fn cron_expressions_are_validated() {
        let dir = tempdir().unwrap();
        let job = Arc::new(job(dir.path()));
        assert!(FeedScheduler::new(job.clone(), DEFAULT_SYNC_CRON).build_job().is_ok());
        assert!(FeedScheduler::new(job, "every day at two").build_job().is_err());
    }

    #[tokio::test]
    async fn scheduled_trigger_runs_sync_and_skips_overlap() {
        let dir = tempdir().unwrap();
        let flights = SingleFlight::new();
        let job = job(dir.path()).with_single_flight(flights.clone());

        let report = run_scheduled(&job).await.unwrap();
        assert_eq!(report.uploaded(), 1);

        let _held = flights.try_acquire(job.name()).unwrap();
        assert!(run_scheduled(&job).await.is_none());
    }
}
