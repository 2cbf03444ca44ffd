//! Error types for browser-driven fetches.

use std::time::Duration;

use crate::engine::BrowserKind;

/// All errors a fetch can end with.
///
/// The variants follow the order in which a run can fail: input validation,
/// engine launch, navigation, the download wait, then persisting the result.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// The target URL could not be parsed. The browser is never launched.
    #[error("invalid url '{input}': {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    /// Bad configuration: header values, listing template, ticker.
    #[error("configuration error: {0}")]
    Config(String),

    /// The selected engine cannot be launched on this machine.
    #[error("{engine} is not available: {reason}")]
    EngineUnavailable { engine: BrowserKind, reason: String },

    /// The page answered, but not with a successful status.
    #[error("{url} responded with status {status}")]
    PageNotOk {
        url: String,
        status: u16,
        body: String,
    },

    /// The engine could not complete the navigation at all.
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// Navigation did not reach DOMContentLoaded in time.
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    /// No download started within the configured timeout.
    #[error("no download started within {timeout:?}")]
    DownloadTimeout { timeout: Duration },

    /// Any fault reported by the automation engine itself.
    #[error("browser engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Create an engine error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Which of the four failure kinds this error belongs to.
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::InvalidUrl { .. } | FetchError::Config(_) => FailureKind::Input,
            FetchError::PageNotOk { .. }
            | FetchError::NavigationFailed { .. }
            | FetchError::NavigationTimeout { .. } => FailureKind::Navigation,
            FetchError::DownloadTimeout { .. } => FailureKind::DownloadTimeout,
            FetchError::EngineUnavailable { .. }
            | FetchError::Engine(_)
            | FetchError::Io(_)
            | FetchError::Json(_) => FailureKind::Engine,
        }
    }
}

/// Coarse failure classes, one per way a run can go wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected before the browser was launched.
    Input,
    /// The page could not be loaded, or loaded with an error status.
    Navigation,
    /// The download wait ran out.
    DownloadTimeout,
    /// The engine or the local filesystem failed.
    Engine,
}

impl From<chromiumoxide::error::CdpError> for FetchError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        FetchError::Engine(e.to_string())
    }
}

#[cfg(feature = "playwright")]
impl From<playwright_rs::Error> for FetchError {
    fn from(e: playwright_rs::Error) -> Self {
        FetchError::Engine(e.to_string())
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, FetchError>;
