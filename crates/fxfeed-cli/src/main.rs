use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fxfeed_sync::{build_job, export_snapshot, FeedScheduler, SyncConfig, SyncError, SyncReport};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fxfeed")]
#[command(about = "Exchange-rate CSV feed sync")]
#[command(
    after_help = "FXFEED_DRIVER selects the page driver: `fixture` (default) replays fixtures/<feed>/site.json, `http` follows links and cannot press script postback buttons."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every configured artifact, stage it and upload it
    Sync {
        /// Only sync this feed
        #[arg(long)]
        feed: Option<String>,
    },
    /// Print the parsed records of an artifact as JSON lines
    Read { name: String },
    /// Write a Parquet snapshot of a parsed artifact
    Export {
        name: String,
        #[arg(long, default_value = "exports")]
        out: PathBuf,
    },
    /// Run the cron scheduler until interrupted
    Schedule,
    /// Serve the web UI
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { feed: None }) {
        Commands::Sync { feed } => {
            let config = SyncConfig::from_env()?;
            let job = build_job(&config)?;
            let result = match feed {
                Some(feed_id) => job.sync_feed(&feed_id).await,
                None => job.sync_all().await,
            };
            match result {
                Ok(report) => print_report(&report),
                Err(SyncError::ArtifactsFailed(report)) => {
                    print_report(&report);
                    bail!("{} of {} artifacts failed", report.failed(), report.artifacts.len());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Read { name } => {
            let job = build_job(&SyncConfig::from_env()?)?;
            for record in job.read_parsed(&name).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::Export { name, out } => {
            let job = build_job(&SyncConfig::from_env()?)?;
            let table = job.read_table(&name).await?;
            let manifest = export_snapshot(&table, &out)
                .with_context(|| format!("exporting {name} to {}", out.display()))?;
            println!(
                "export complete: artifact={} rows={} columns={} out={}",
                manifest.artifact,
                manifest.rows,
                manifest.columns.len(),
                out.display()
            );
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env()?;
            let job = Arc::new(build_job(&config)?);
            info!(cron = %config.sync_cron, "running scheduler until ctrl-c");
            FeedScheduler::new(job, config.sync_cron.clone())
                .run_until_shutdown()
                .await?;
        }
        Commands::Serve => fxfeed_web::serve_from_env().await?,
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "sync complete: run_id={} uploaded={} failed={} store={}",
        report.run_id,
        report.uploaded(),
        report.failed(),
        report.store
    );
}
