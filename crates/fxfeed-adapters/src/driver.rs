use std::time::Duration;

use async_trait::async_trait;
use fxfeed_storage::HttpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("no page loaded")]
    NoPage,
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("element {selector:?} is not visible")]
    NotVisible { selector: String },
    #[error("element {selector:?} cannot be clicked: {reason}")]
    Unclickable { selector: String, reason: String },
    #[error("download failed: {0}")]
    Download(String),
    #[error("page session already closed")]
    Closed,
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        match self {
            DriverError::Timeout { .. } => true,
            DriverError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// One scripted page session.
///
/// Methods take `&self` so that a click and the download wait can be in
/// flight at the same time. Callers must `close` the session when done.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn wait_for_load(&self) -> Result<(), DriverError>;

    async fn wait_for_visible(&self, selector: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Resolves with the bytes of the next download the page triggers.
    async fn await_download(&self) -> Result<Vec<u8>, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens page sessions; the browser-launch step.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, DriverError>;

    fn name(&self) -> &'static str;
}
