//! Browser engine abstraction.
//!
//! Defines the `Renderer`, `RenderContext` and `PendingDownload` traits that
//! abstract over the automation engine, and the [`Launcher`] that turns a
//! [`BrowserKind`] into a running renderer. Chromium is driven over CDP with
//! chromiumoxide; WebKit and Firefox go through Playwright.

pub mod chromium;
#[cfg(feature = "playwright")]
pub mod playwright;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::{ContextProfile, LaunchOptions};
use crate::error::{FetchError, Result};

/// The three browser engines a fetch can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BrowserKind {
    #[default]
    Chromium,
    Webkit,
    Firefox,
}

impl BrowserKind {
    pub const ALL: [BrowserKind; 3] = [
        BrowserKind::Chromium,
        BrowserKind::Webkit,
        BrowserKind::Firefox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Webkit => "webkit",
            BrowserKind::Firefox => "firefox",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" => Ok(BrowserKind::Chromium),
            "webkit" => Ok(BrowserKind::Webkit),
            "firefox" => Ok(BrowserKind::Firefox),
            other => Err(FetchError::config(format!(
                "unknown browser '{other}' (expected chromium, webkit or firefox)"
            ))),
        }
    }
}

/// Main-document response observed during a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResponse {
    /// URL of the document response, after redirects.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Engine handle used to fetch the body later.
    pub request_id: String,
}

impl NavigationResponse {
    /// Successful status: 2xx, or 0 for responses served without HTTP.
    pub fn is_ok(&self) -> bool {
        self.status == 0 || (200..300).contains(&self.status)
    }
}

/// A download that has begun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStarted {
    /// Engine-assigned download id.
    pub guid: String,
    /// URL the payload is fetched from.
    pub url: String,
    /// Filename proposed by the server or browser.
    pub suggested_filename: String,
}

/// Launches a renderer for a browser kind.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, kind: BrowserKind, options: &LaunchOptions) -> Result<Box<dyn Renderer>>;
}

/// A running browser engine.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a browsing context (tab) presenting itself as `profile`.
    async fn new_context(&self, profile: &ContextProfile) -> Result<Box<dyn RenderContext>>;

    /// Route the next download into `dir` and start listening for it.
    async fn expect_download(&self, dir: &Path) -> Result<Box<dyn PendingDownload>>;

    /// Shut the engine down and release the process.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A single browsing context.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate and wait for DOMContentLoaded on the main document.
    async fn navigate(&mut self, url: &Url) -> Result<NavigationResponse>;

    /// Raw body bytes of a response seen by [`RenderContext::navigate`].
    async fn response_body(&self, response: &NavigationResponse) -> Result<Vec<u8>>;

    /// Evaluate a script in the page without waiting on what it triggers.
    async fn evaluate(&self, script: &str) -> Result<()>;

    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A download capture armed by [`Renderer::expect_download`].
#[async_trait]
pub trait PendingDownload: Send {
    /// Wait until a download begins.
    async fn started(&mut self) -> Result<DownloadStarted>;

    /// Wait for the started download to finish; returns where the engine stored it.
    async fn finished(self: Box<Self>) -> Result<PathBuf>;
}

/// Launcher backed by the real engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineLauncher;

#[async_trait]
impl Launcher for EngineLauncher {
    async fn launch(&self, kind: BrowserKind, options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
        match kind {
            BrowserKind::Chromium => launch_chromium(options).await,
            BrowserKind::Webkit => launch_webkit(options).await,
            BrowserKind::Firefox => launch_firefox(options).await,
        }
    }
}

async fn launch_chromium(options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
    let renderer = chromium::ChromiumRenderer::launch(options).await?;
    Ok(Box::new(renderer))
}

#[cfg(feature = "playwright")]
async fn launch_webkit(options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
    let renderer = playwright::PlaywrightRenderer::launch(BrowserKind::Webkit, options).await?;
    Ok(Box::new(renderer))
}

#[cfg(feature = "playwright")]
async fn launch_firefox(options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
    let renderer = playwright::PlaywrightRenderer::launch(BrowserKind::Firefox, options).await?;
    Ok(Box::new(renderer))
}

#[cfg(not(feature = "playwright"))]
async fn launch_webkit(_options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
    Err(without_playwright(BrowserKind::Webkit))
}

#[cfg(not(feature = "playwright"))]
async fn launch_firefox(_options: &LaunchOptions) -> Result<Box<dyn Renderer>> {
    Err(without_playwright(BrowserKind::Firefox))
}

#[cfg(not(feature = "playwright"))]
fn without_playwright(engine: BrowserKind) -> FetchError {
    FetchError::EngineUnavailable {
        engine,
        reason: "built without the `playwright` feature".into(),
    }
}

/// Run `navigation`, giving up after `timeout` with [`FetchError::NavigationTimeout`].
pub async fn bounded_navigation<T, F>(url: &Url, timeout: Duration, navigation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, navigation).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::NavigationTimeout {
            url: url.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_kind_round_trips_names() {
        for kind in BrowserKind::ALL {
            assert_eq!(kind.as_str().parse::<BrowserKind>().unwrap(), kind);
        }
        assert_eq!("WebKit".parse::<BrowserKind>().unwrap(), BrowserKind::Webkit);
    }

    #[test]
    fn unknown_browser_is_rejected() {
        assert!("opera".parse::<BrowserKind>().is_err());
        assert_eq!(BrowserKind::default(), BrowserKind::Chromium);
    }

    #[test]
    fn response_ok_range() {
        let mut resp = NavigationResponse {
            url: "http://localhost/".into(),
            status: 200,
            request_id: "1".into(),
        };
        assert!(resp.is_ok());
        resp.status = 204;
        assert!(resp.is_ok());
        resp.status = 0;
        assert!(resp.is_ok());
        resp.status = 302;
        assert!(!resp.is_ok());
        resp.status = 404;
        assert!(!resp.is_ok());
    }

    #[tokio::test]
    async fn each_engine_goes_to_its_own_driver() {
        let options = LaunchOptions {
            executable: Some(PathBuf::from("/nonexistent/munchkin/browser")),
            headed: false,
            navigation_timeout: Duration::from_secs(5),
        };
        for kind in BrowserKind::ALL {
            let err = EngineLauncher.launch(kind, &options).await.err().unwrap();
            let message = err.to_string().to_lowercase();
            assert!(message.contains(kind.as_str()), "{kind}: {message}");

            let unavailable = matches!(err, FetchError::EngineUnavailable { .. });
            let expected = kind != BrowserKind::Chromium && cfg!(not(feature = "playwright"));
            assert_eq!(unavailable, expected, "{kind}: {err:?}");
        }
    }

    #[tokio::test]
    async fn navigation_gives_up_after_timeout() {
        let url = Url::parse("http://localhost:9/slow").unwrap();
        let timeout = Duration::from_millis(50);

        let err = bounded_navigation(&url, timeout, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Navigation);
        match err {
            FetchError::NavigationTimeout { url, timeout: waited } => {
                assert_eq!(url, "http://localhost:9/slow");
                assert_eq!(waited, timeout);
            }
            other => panic!("expected NavigationTimeout, got {other:?}"),
        }

        let quick = bounded_navigation(&url, timeout, async { Ok(7) }).await.unwrap();
        assert_eq!(quick, 7);
    }
}
