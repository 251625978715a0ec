//! Recorded-site page driver for offline runs and tests.
//!
//! A site fixture is a JSON file describing pages by URL, which selectors are
//! visible on each page and which selectors produce a download. Download
//! bodies are either inline or a path relative to the fixture file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::driver::{DriverError, DriverLauncher, PageDriver};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSite {
    pub pages: Vec<FixturePage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePage {
    pub url: String,
    #[serde(default)]
    pub visible: Vec<String>,
    #[serde(default)]
    pub downloads: Vec<FixtureDownload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDownload {
    pub selector: String,
    /// Only served when this selector was the last control clicked.
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub inline_text: Option<String>,
}

impl FixturePage {
    fn is_visible(&self, selector: &str) -> bool {
        self.visible.iter().any(|s| s == selector)
            || self.downloads.iter().any(|d| d.selector == selector)
    }

    /// A download bound to `last_click` wins over an unbound one.
    fn download_for(&self, selector: &str, last_click: Option<&str>) -> Option<&FixtureDownload> {
        let matching = || self.downloads.iter().filter(move |d| d.selector == selector);
        matching()
            .find(|d| d.after.is_some() && d.after.as_deref() == last_click)
            .or_else(|| matching().find(|d| d.after.is_none()))
    }
}

pub fn load_fixture_site(path: impl AsRef<Path>) -> Result<FixtureSite> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut site: FixtureSite =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    hydrate_download_bodies(path, &mut site)?;
    Ok(site)
}

fn hydrate_download_bodies(site_path: &Path, site: &mut FixtureSite) -> Result<()> {
    let base = site_path.parent().unwrap_or_else(|| Path::new("."));
    for download in site.pages.iter_mut().flat_map(|p| p.downloads.iter_mut()) {
        if download.inline_text.is_some() {
            continue;
        }
        let Some(rel_path) = &download.path else {
            continue;
        };
        let body_path: PathBuf = base.join(rel_path);
        let body = fs::read_to_string(&body_path)
            .with_context(|| format!("reading fixture download {}", body_path.display()))?;
        download.inline_text = Some(body);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FixtureLauncher {
    site: Arc<FixtureSite>,
}

impl FixtureLauncher {
    pub fn new(site: FixtureSite) -> Self {
        Self {
            site: Arc::new(site),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_site(path)?))
    }
}

#[async_trait]
impl DriverLauncher for FixtureLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        Ok(Box::new(FixturePageDriver::new(self.site.clone())))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

pub struct FixturePageDriver {
    site: Arc<FixtureSite>,
    current: Mutex<Option<usize>>,
    last_click: Mutex<Option<String>>,
    downloads_tx: mpsc::UnboundedSender<Vec<u8>>,
    downloads_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl FixturePageDriver {
    pub fn new(site: Arc<FixtureSite>) -> Self {
        let (downloads_tx, downloads_rx) = mpsc::unbounded_channel();
        Self {
            site,
            current: Mutex::new(None),
            last_click: Mutex::new(None),
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

    async fn current_page(&self) -> Result<&FixturePage, DriverError> {
        self.ensure_open()?;
        let idx = (*self.current.lock().await).ok_or(DriverError::NoPage)?;
        self.site.pages.get(idx).ok_or(DriverError::NoPage)
    }
}

#[async_trait]
impl PageDriver for FixturePageDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let idx = self
            .site
            .pages
            .iter()
            .position(|p| p.url == url)
            .ok_or_else(|| DriverError::Navigation {
                url: url.to_string(),
                message: "no fixture page recorded for this url".to_string(),
            })?;
        *self.current.lock().await = Some(idx);
        Ok(())
    }

    async fn wait_for_load(&self) -> Result<(), DriverError> {
        self.current_page().await.map(|_| ())
    }

    async fn wait_for_visible(&self, selector: &str) -> Result<(), DriverError> {
        if self.current_page().await?.is_visible(selector) {
            Ok(())
        } else {
            Err(DriverError::NotVisible {
                selector: selector.to_string(),
            })
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let page = self.current_page().await?;
        let mut last_click = self.last_click.lock().await;
        if let Some(download) = page.download_for(selector, last_click.as_deref()) {
            let body = download.inline_text.clone().ok_or_else(|| {
                DriverError::Download(format!("fixture download for {selector} has no body"))
            })?;
            self.downloads_tx
                .send(body.into_bytes())
                .map_err(|_| DriverError::Closed)?;
            return Ok(());
        }
        if page.is_visible(selector) {
            *last_click = Some(selector.to_string());
            Ok(())
        } else {
            Err(DriverError::NotVisible {
                selector: selector.to_string(),
            })
        }
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
        Ok(())
    }
}
