//! Axum + Askama surface over parsed feed artifacts: an index page, series JSON
//! and plotly-style chart data.

use std::path::PathBuf;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use fxfeed_core::CsvRecord;
use fxfeed_sync::{build_job, load_recent_reports, FeedScheduler, SyncConfig, SyncError, SyncJob};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub job: Arc<SyncJob>,
    pub reports_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(job: Arc<SyncJob>) -> Self {
        Self {
            job,
            reports_dir: None,
        }
    }

    pub fn with_reports_dir(mut self, reports_dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(reports_dir.into());
        self
    }
}

#[derive(Debug, Clone)]
struct ArtifactRow {
    feed: String,
    name: String,
}

#[derive(Debug, Clone)]
struct RunRow {
    run_id: String,
    started_at: String,
    uploaded: usize,
    failed: usize,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    job_name: String,
    running: bool,
    artifacts: Vec<ArtifactRow>,
    runs: Vec<RunRow>,
}

#[derive(Debug, Serialize)]
struct SeriesResponse<'a> {
    name: &'a str,
    columns: Vec<&'a str>,
    records: &'a [CsvRecord],
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/series/{name}", get(series_handler))
        .route("/series/{name}/chart", get(chart_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "listening for shutdown signal failed");
            }
        })
        .await?;
    Ok(())
}

/// Serves the web UI, with the cron scheduler alongside when it is enabled.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env()?;
    let port: u16 = std::env::var("FXFEED_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let job = Arc::new(build_job(&config)?);

    let _scheduler = if config.scheduler_enabled {
        Some(
            FeedScheduler::new(job.clone(), config.sync_cron.clone())
                .start()
                .await?,
        )
    } else {
        None
    };

    serve(
        AppState::new(job).with_reports_dir(config.reports_dir.clone()),
        port,
    )
    .await
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let artifacts = state
        .job
        .feeds()
        .feeds
        .iter()
        .flat_map(|feed| {
            feed.artifacts.iter().map(|a| ArtifactRow {
                feed: feed
                    .display_name
                    .clone()
                    .unwrap_or_else(|| feed.feed_id.clone()),
                name: a.name.to_string(),
            })
        })
        .collect();

    let runs = match &state.reports_dir {
        Some(dir) => match load_recent_reports(dir, 10) {
            Ok(reports) => reports
                .into_iter()
                .map(|r| RunRow {
                    run_id: r.run_id.to_string(),
                    started_at: r.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    uploaded: r.uploaded(),
                    failed: r.failed(),
                })
                .collect(),
            Err(err) => return server_error(err),
        },
        None => vec![],
    };

    render_html(IndexTemplate {
        job_name: state.job.name().to_string(),
        running: state.job.is_running(),
        artifacts,
        runs,
    })
}

async fn series_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    match state.job.read_table(&name).await {
        Ok(table) => Json(SeriesResponse {
            name: table.name.as_str(),
            columns: table.header.iter().collect(),
            records: &table.records,
        })
        .into_response(),
        Err(err) => sync_error(err),
    }
}

/// Repeated `currency` keys select traces; `from`/`to` bound the date column inclusively.
#[derive(Debug, Default)]
struct ChartQuery {
    currencies: Vec<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl ChartQuery {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "currency" => query.currencies.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string),
                ),
                "from" => query.from = parse_date(&value),
                "to" => query.to = parse_date(&value),
                _ => {}
            }
        }
        query
    }

    fn in_range(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let query = ChartQuery::from_pairs(pairs);
    let table = match state.job.read_table(&name).await {
        Ok(table) => table,
        Err(err) => {
            warn!(artifact = %name, error = %err, "chart read failed");
            return Json(empty_chart()).into_response();
        }
    };

    let mut columns = table.header.iter();
    let Some(date_column) = columns.next() else {
        return Json(empty_chart()).into_response();
    };
    let currencies: Vec<&str> = if query.currencies.is_empty() {
        columns.filter(|c| !c.trim().is_empty()).collect()
    } else {
        query
            .currencies
            .iter()
            .map(String::as_str)
            .filter(|c| table.header.position(c).is_some())
            .collect()
    };

    let traces = currencies
        .iter()
        .filter_map(|currency| {
            let (x, y): (Vec<String>, Vec<f64>) = table
                .records
                .iter()
                .filter_map(|record| {
                    let date = record.get(date_column).and_then(parse_date)?;
                    if !query.in_range(date) {
                        return None;
                    }
                    let value = record.get(currency).and_then(parse_decimal)?;
                    Some((date.format("%Y-%m-%d").to_string(), value))
                })
                .unzip();
            (!x.is_empty()).then(|| {
                serde_json::json!({
                    "type": "scatter",
                    "mode": "lines",
                    "name": currency,
                    "x": x,
                    "y": y,
                })
            })
        })
        .collect::<Vec<_>>();

    if traces.is_empty() {
        return Json(empty_chart()).into_response();
    }
    Json(serde_json::json!({
        "data": traces,
        "layout": {
            "title": format!("{}: {}", table.name, currencies.join(", ")),
            "xaxis": {"title": date_column},
            "paper_bgcolor": "#ffffff",
            "plot_bgcolor": "#f8fafc"
        }
    }))
    .into_response()
}

fn empty_chart() -> serde_json::Value {
    serde_json::json!({
        "data": [],
        "layout": {"title": "No data for range"}
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Accepts both `4,9700` and `4.9700`.
fn parse_decimal(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.replace(',', ".").parse().ok()
}

fn sync_error(err: SyncError) -> Response {
    let status = match &err {
        SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
        SyncError::InvalidName(_) => StatusCode::BAD_REQUEST,
        SyncError::Malformed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Store(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}
