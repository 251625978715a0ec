//! Page driver over plain HTTP.
//!
//! Handles pages whose controls are ordinary links: visibility is checked on
//! the served HTML and a click follows the element's link target. Controls
//! that only work through script execution are reported as unclickable; those
//! feeds need a browser-backed [`PageDriver`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fxfeed_storage::{FetchedResponse, HttpClientConfig, HttpFetcher};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::driver::{DriverError, DriverLauncher, PageDriver};

#[derive(Debug, Clone, Default)]
pub struct HttpDriverLauncher {
    config: HttpClientConfig,
}

impl HttpDriverLauncher {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverLauncher for HttpDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        let http = HttpFetcher::new(self.config.clone())
            .map_err(|e| DriverError::Launch(format!("{e:#}")))?;
        Ok(Box::new(HttpPageDriver::new(http)))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: Url,
    html: String,
}

pub struct HttpPageDriver {
    http: HttpFetcher,
    page: Mutex<Option<LoadedPage>>,
    downloads_tx: mpsc::UnboundedSender<Vec<u8>>,
    downloads_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl HttpPageDriver {
    pub fn new(http: HttpFetcher) -> Self {
        let (downloads_tx, downloads_rx) = mpsc::unbounded_channel();
        Self {
            http,
            page: Mutex::new(None),
            downloads_tx,
            downloads_rx: Mutex::new(downloads_rx),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    async fn loaded(&self) -> Result<LoadedPage, DriverError> {
        self.ensure_open()?;
        self.page.lock().await.clone().ok_or(DriverError::NoPage)
    }

    /// GET `url`; attachments go to the download channel, pages replace the current page.
    async fn follow(&self, url: &str) -> Result<(), DriverError> {
        let resp = self.http.fetch_bytes(url).await?;
        if resp.is_attachment() {
            debug!(url, bytes = resp.body.len(), "download received");
            return self
                .downloads_tx
                .send(resp.body)
                .map_err(|_| DriverError::Closed);
        }

        self.replace_page(url, resp).await
    }

    async fn replace_page(&self, requested: &str, resp: FetchedResponse) -> Result<(), DriverError> {
        let url = Url::parse(&resp.final_url).map_err(|e| DriverError::Navigation {
            url: requested.to_string(),
            message: e.to_string(),
        })?;
        let html = String::from_utf8_lossy(&resp.body).into_owned();
        *self.page.lock().await = Some(LoadedPage { url, html });
        Ok(())
    }
}

#[async_trait]
impl PageDriver for HttpPageDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let resp = self.http.fetch_bytes(url).await?;
        if resp.is_attachment() {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message: "url served a file instead of a page".to_string(),
            });
        }
        self.replace_page(url, resp).await
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        self.loaded().await.map(|_| ())
    }

    async fn wait_for_visible(&self, selector: &str) -> Result<(), DriverError> {
        let page = self.loaded().await?;
        match find_visible(&page.html, selector)? {
            Some(_) => Ok(()),
            None => Err(DriverError::NotVisible {
                selector: selector.to_string(),
            }),
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let page = self.loaded().await?;
        let Some(link) = find_visible(&page.html, selector)? else {
            return Err(DriverError::NotVisible {
                selector: selector.to_string(),
            });
        };
        let Some(href) = link else {
            return Err(DriverError::Unclickable {
                selector: selector.to_string(),
                reason: "element has no link target and needs a script engine".to_string(),
            });
        };
        let target = page.url.join(&href).map_err(|e| DriverError::Unclickable {
            selector: selector.to_string(),
            reason: format!("bad link target {href:?}: {e}"),
        })?;
        self.follow(target.as_str()).await
    }

    async fn await_download(&self) -> Result<Vec<u8>, DriverError> {
        self.ensure_open()?;
        self.downloads_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(DriverError::Closed)
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        *self.page.lock().await = None;
        Ok(())
    }
}

/// Finds the first visible element matching `selector` and returns its link
/// target, if any. Outer `None` means nothing visible matched.
fn find_visible(html: &str, selector: &str) -> Result<Option<Option<String>>, DriverError> {
    let sel = Selector::parse(selector).map_err(|e| DriverError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    let found = document
        .select(&sel)
        .find(|el| !is_hidden(el))
        .map(|el| link_target(&el));
    Ok(found)
}

fn is_hidden(el: &ElementRef<'_>) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|node| {
            let value = node.value();
            let inline_style = value
                .attr("style")
                .map(|s| s.replace(' ', "").to_ascii_lowercase())
                .unwrap_or_default();
            value.attr("hidden").is_some()
                || value.attr("type") == Some("hidden")
                || inline_style.contains("display:none")
                || inline_style.contains("visibility:hidden")
        })
}

fn link_target(el: &ElementRef<'_>) -> Option<String> {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .find_map(|node| {
            let value = node.value();
            value
                .attr("href")
                .or_else(|| value.attr("formaction"))
                .map(str::trim)
                .filter(|href| !href.is_empty() && !href.starts_with("javascript:"))
                .map(str::to_string)
        })
}
