use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fxfeed_core::{ArtifactName, RawArtifact};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::{DriverError, DriverLauncher, PageDriver};

/// Which element to press to generate a file and which one to press to download it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTarget {
    pub name: ArtifactName,
    pub trigger_selector: String,
    pub download_selector: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    Launch,
    Navigate,
    Load,
    WaitTrigger,
    ClickTrigger,
    WaitDownloadTrigger,
    ClickDownload,
    Download,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchStage::Launch => "launch",
            FetchStage::Navigate => "navigate",
            FetchStage::Load => "page load",
            FetchStage::WaitTrigger => "wait for trigger",
            FetchStage::ClickTrigger => "click trigger",
            FetchStage::WaitDownloadTrigger => "wait for download trigger",
            FetchStage::ClickDownload => "click download trigger",
            FetchStage::Download => "download",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("fetch failed at {stage}: {cause}")]
pub struct FetchFailure {
    pub stage: FetchStage,
    #[source]
    pub cause: DriverError,
}

impl FetchFailure {
    pub fn is_timeout(&self) -> bool {
        self.cause.is_timeout()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub download_timeout: Duration,
    /// Fixed wait after the trigger click; the server gives no completion signal.
    pub settle_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_millis(3000),
        }
    }
}

pub struct Fetcher {
    launcher: Arc<dyn DriverLauncher>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(launcher: Arc<dyn DriverLauncher>, policy: FetchPolicy) -> Self {
        Self { launcher, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Drive one page session to a downloaded artifact. The session is
    /// closed on every path out of this function; a close that outlives the
    /// navigation timeout is abandoned.
    pub async fn fetch(&self, page_url: &str, target: &ArtifactTarget) -> Result<RawArtifact, FetchFailure> {
        let page = bounded(
            FetchStage::Launch,
            self.policy.navigation_timeout,
            self.launcher.launch(),
        )
        .await?;

        let outcome = self.drive(page.as_ref(), page_url, target).await;

        match tokio::time::timeout(self.policy.navigation_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(artifact = %target.name, error = %err, "closing page session failed")
            }
            Err(_) => warn!(
                artifact = %target.name,
                after = ?self.policy.navigation_timeout,
                "closing page session timed out, abandoning it"
            ),
        }

        let bytes = outcome?;
        info!(artifact = %target.name, bytes = bytes.len(), driver = self.launcher.name(), "artifact downloaded");
        Ok(RawArtifact::new(target.name.clone(), page_url, bytes))
    }

    async fn drive(
        &self,
        page: &dyn PageDriver,
        page_url: &str,
        target: &ArtifactTarget,
    ) -> Result<Vec<u8>, FetchFailure> {
        let policy = &self.policy;

        bounded(FetchStage::Navigate, policy.navigation_timeout, page.navigate(page_url)).await?;
        bounded(FetchStage::Load, policy.navigation_timeout, page.wait_for_load()).await?;
        bounded(
            FetchStage::WaitTrigger,
            policy.selector_timeout,
            page.wait_for_visible(&target.trigger_selector),
        )
        .await?;
        bounded(
            FetchStage::ClickTrigger,
            policy.selector_timeout,
            page.click(&target.trigger_selector),
        )
        .await?;

        debug!(artifact = %target.name, delay = ?policy.settle_delay, "waiting for file generation");
        tokio::time::sleep(policy.settle_delay).await;

        bounded(
            FetchStage::WaitDownloadTrigger,
            policy.selector_timeout,
            page.wait_for_visible(&target.download_selector),
        )
        .await?;

        // Start waiting for the download before the click can complete.
        let (bytes, ()) = tokio::try_join!(
            bounded(FetchStage::Download, policy.download_timeout, page.await_download()),
            bounded(
                FetchStage::ClickDownload,
                policy.selector_timeout,
                page.click(&target.download_selector),
            ),
        )?;

        if bytes.is_empty() {
            return Err(FetchFailure {
                stage: FetchStage::Download,
                cause: DriverError::Download("download was empty".to_string()),
            });
        }
        Ok(bytes)
    }
}

async fn bounded<T>(
    stage: FetchStage,
    limit: Duration,
    step: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, FetchFailure> {
    match tokio::time::timeout(limit, step).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(FetchFailure { stage, cause }),
        Err(_) => Err(FetchFailure {
            stage,
            cause: DriverError::Timeout {
                operation: stage.to_string(),
                after: limit,
            },
        }),
    }
}
