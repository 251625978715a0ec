use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fxfeed_adapters::FetchStage;
use fxfeed_core::ArtifactName;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Uploaded {
        bytes: usize,
        sha256: String,
        staged: bool,
    },
    FetchFailed {
        stage: FetchStage,
        timed_out: bool,
        error: String,
    },
    UploadFailed {
        bytes: usize,
        staged: bool,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub feed_id: String,
    pub name: ArtifactName,
    pub blob_key: String,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

impl ArtifactOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self.status, ArtifactStatus::Uploaded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub job_name: String,
    pub store: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactOutcome>,
}

impl SyncReport {
    pub fn uploaded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_uploaded()).count()
    }

    pub fn failed(&self) -> usize {
        self.artifacts.len() - self.uploaded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&ArtifactOutcome> {
        self.artifacts.iter().find(|a| a.name.as_str() == name)
    }

    pub fn summary_markdown(&self) -> String {
        let rows = self
            .artifacts
            .iter()
            .map(|a| match &a.status {
                ArtifactStatus::Uploaded { bytes, sha256, staged } => format!(
                    "| {} | {} | uploaded | {bytes} bytes, sha256 `{}`{} |",
                    a.feed_id,
                    a.name,
                    short_hash(sha256),
                    if *staged { "" } else { ", not staged" }
                ),
                ArtifactStatus::FetchFailed { stage, error, .. } => format!(
                    "| {} | {} | fetch failed at {stage} | {} |",
                    a.feed_id,
                    a.name,
                    error.replace('|', "\\|")
                ),
                ArtifactStatus::UploadFailed { error, .. } => format!(
                    "| {} | {} | upload failed | {} |",
                    a.feed_id,
                    a.name,
                    error.replace('|', "\\|")
                ),
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "# FX Feed Sync\n\n- Run ID: `{}`\n- Job: {}\n- Store: {}\n- Started: {}\n- Finished: {}\n- Uploaded: {}\n- Failed: {}\n\n## Artifacts\n| Feed | Artifact | Status | Detail |\n|---|---|---|---|\n{}\n",
            self.run_id,
            self.job_name,
            self.store,
            self.started_at,
            self.finished_at,
            self.uploaded(),
            self.failed(),
            rows
        )
    }
}

fn short_hash(sha256: &str) -> &str {
    sha256.get(..12).unwrap_or(sha256)
}

/// Writes `sync_report.json` and `summary.md` under `<reports_root>/<run_id>/`.
pub async fn write_run_report(reports_root: &Path, report: &SyncReport) -> Result<PathBuf> {
    let run_dir = reports_root.join(report.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing sync report")?;
    fs::write(run_dir.join("sync_report.json"), json)
        .await
        .context("writing sync_report.json")?;
    fs::write(run_dir.join("summary.md"), report.summary_markdown())
        .await
        .context("writing summary.md")?;

    Ok(run_dir)
}

/// Most recent run reports first, at most `limit`.
pub fn load_recent_reports(reports_root: &Path, limit: usize) -> Result<Vec<SyncReport>> {
    if !reports_root.exists() {
        return Ok(vec![]);
    }
    let mut reports = Vec::new();
    for entry in std::fs::read_dir(reports_root)
        .with_context(|| format!("listing {}", reports_root.display()))?
        .filter_map(|e| e.ok())
    {
        let path = entry.path().join("sync_report.json");
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let report: SyncReport = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        reports.push(report);
    }
    reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    reports.truncate(limit);
    Ok(reports)
}
