use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, Instrument};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

pub fn build_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    builder.build().context("building reqwest client")
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// True when the server delivered a file rather than a page.
    pub fn is_attachment(&self) -> bool {
        if let Some(disposition) = &self.content_disposition {
            if disposition.to_ascii_lowercase().starts_with("attachment") {
                return true;
            }
        }
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                !(ct.starts_with("text/html") || ct.starts_with("application/xhtml"))
            }
            None => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Request { source, .. } if source.is_timeout())
    }
}

/// Single-shot GET client. Failures are surfaced, never retried here.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(&config)?,
        })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, HttpError> {
        self.get(url).instrument(info_span!("http_fetch", url)).await
    }

    async fn get(&self, url: &str) -> Result<FetchedResponse, HttpError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| HttpError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = header_value(resp.headers(), CONTENT_TYPE);
        let content_disposition = header_value(resp.headers(), CONTENT_DISPOSITION);

        let body = resp
            .bytes()
            .await
            .map_err(|source| HttpError::Request {
                url: final_url.clone(),
                source,
            })?
            .to_vec();

        Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            content_disposition,
            body,
        })
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
