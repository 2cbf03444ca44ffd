//! Scoped ownership of a launched browser.
//!
//! A [`BrowserSession`] is the only holder of the renderer for the duration of
//! a fetch. Flows borrow it, then hand their outcome to
//! [`BrowserSession::release`], which closes the browser on success and
//! failure alike. If the flow never gets that far (the future is dropped on
//! Ctrl-C, or a panic unwinds) the renderer is dropped with the session and
//! the engine kills its process.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::{ContextProfile, LaunchOptions};
use crate::engine::{BrowserKind, Launcher, PendingDownload, RenderContext, Renderer};
use crate::error::{FetchError, Result};

/// A launched browser that is closed exactly once.
pub struct BrowserSession {
    kind: BrowserKind,
    renderer: Option<Box<dyn Renderer>>,
}

impl BrowserSession {
    /// Launch `kind` through `launcher`.
    pub async fn launch(
        launcher: &dyn Launcher,
        kind: BrowserKind,
        options: &LaunchOptions,
    ) -> Result<Self> {
        let renderer = launcher.launch(kind, options).await?;
        debug!(browser = %kind, "browser launched");
        Ok(Self {
            kind,
            renderer: Some(renderer),
        })
    }

    pub fn kind(&self) -> BrowserKind {
        self.kind
    }

    fn renderer(&self) -> Result<&dyn Renderer> {
        self.renderer
            .as_deref()
            .ok_or_else(|| FetchError::engine("browser session already released"))
    }

    /// Open a browsing context on the session's browser.
    pub async fn new_context(&self, profile: &ContextProfile) -> Result<Box<dyn RenderContext>> {
        self.renderer()?.new_context(profile).await
    }

    /// Arm a download capture into `dir`.
    pub async fn expect_download(&self, dir: &Path) -> Result<Box<dyn PendingDownload>> {
        self.renderer()?.expect_download(dir).await
    }

    /// Close the browser, then return `outcome`.
    ///
    /// A close failure is logged but never replaces the flow's outcome.
    pub async fn release<T>(mut self, outcome: Result<T>) -> Result<T> {
        let Some(renderer) = self.renderer.take() else {
            return outcome;
        };

        match (renderer.close().await, outcome) {
            (Ok(()), outcome) => {
                debug!(browser = %self.kind, "browser closed");
                outcome
            }
            (Err(close_err), Ok(value)) => {
                warn!(browser = %self.kind, error = %close_err, "browser did not close cleanly");
                Ok(value)
            }
            (Err(close_err), Err(err)) => {
                warn!(browser = %self.kind, error = %close_err, "browser did not close cleanly");
                Err(err)
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.renderer.is_some() {
            warn!(browser = %self.kind, "browser session dropped without release; killing browser");
        }
    }
}
