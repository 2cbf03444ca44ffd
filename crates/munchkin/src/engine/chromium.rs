//! Chromium engine driven over CDP with chromiumoxide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, GetResponseBodyParams, Headers,
    RequestId, ResourceType, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventDomContentEventFired, NavigateParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    bounded_navigation, BrowserKind, DownloadStarted, NavigationResponse, PendingDownload,
    RenderContext, Renderer,
};
use crate::config::{ContextProfile, LaunchOptions};
use crate::error::{FetchError, Result};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. MUNCHKIN_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("MUNCHKIN_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.munchkin/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".munchkin/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".munchkin/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".munchkin/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".munchkin/chromium/chrome-linux64/chrome"),
                home.join(".munchkin/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// A launched Chromium process.
///
/// Dropping the renderer without [`Renderer::close`] still stops the CDP
/// handler task, and chromiumoxide kills the child process when the
/// `Browser` is dropped.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    // Removed after the browser is gone; declared last so it drops last.
    _profile_dir: TempDir,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium with a throwaway profile.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let chrome_path = match &options.executable {
            Some(path) => path.clone(),
            None => find_chromium().ok_or_else(|| FetchError::EngineUnavailable {
                engine: BrowserKind::Chromium,
                reason: "Chromium not found. Install Chrome or set MUNCHKIN_CHROMIUM_PATH".into(),
            })?,
        };
        debug!(path = %chrome_path.display(), "launching chromium");

        let profile_dir = tempfile::Builder::new()
            .prefix("munchkin-profile")
            .tempdir()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile_dir.path())
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        builder = if options.headed {
            builder.with_head()
        } else {
            builder.arg("--headless=new")
        };
        let config = builder
            .build()
            .map_err(|e| FetchError::engine(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::engine(format!("failed to launch Chromium: {e}")))?;

        // Spawn the handler task
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!(error = %e, "cdp handler event error");
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            navigation_timeout: options.navigation_timeout,
            _profile_dir: profile_dir,
        })
    }
}

impl Drop for ChromiumRenderer {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self, profile: &ContextProfile) -> Result<Box<dyn RenderContext>> {
        let page = self.browser.new_page("about:blank").await?;

        page.execute(NetworkEnableParams::default()).await?;
        let headers = serde_json::to_value(profile.extra_headers())?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await?;
        page.execute(SetUserAgentOverrideParams::new(profile.user_agent()))
            .await?;
        for script in profile.init_scripts() {
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script.as_str()))
                .await?;
        }
        debug!(user_agent = profile.user_agent(), "browsing context ready");

        Ok(Box::new(ChromiumContext {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn expect_download(&self, dir: &Path) -> Result<Box<dyn PendingDownload>> {
        // Listen first so no event slips between the behavior change and the wait.
        let begins = self
            .browser
            .event_listener::<EventDownloadWillBegin>()
            .await?;
        let progress = self
            .browser
            .event_listener::<EventDownloadProgress>()
            .await?;

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(dir.to_string_lossy())
            .events_enabled(true)
            .build()
            .map_err(FetchError::engine)?;
        self.browser.execute(params).await?;
        debug!(dir = %dir.display(), "download capture armed");

        Ok(Box::new(ChromiumDownload {
            dir: dir.to_path_buf(),
            begins,
            progress,
            guid: None,
        }))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let closed = shut_down(&mut self.browser, EXIT_GRACE).await;
        self.handler.abort();
        closed
    }
}

/// How long a closing browser gets to answer and exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// The parts of a browser process that shutting it down touches.
#[async_trait]
pub(crate) trait BrowserProcess: Send {
    /// Ask the browser to close itself.
    async fn request_close(&mut self) -> Result<()>;
    /// Wait for the process to exit.
    async fn reap(&mut self) -> std::io::Result<()>;
    /// Kill the process and reap it.
    async fn force_kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> Result<()> {
        self.close().await?;
        Ok(())
    }

    async fn reap(&mut self) -> std::io::Result<()> {
        self.wait().await.map(|_| ())
    }

    async fn force_kill(&mut self) -> std::io::Result<()> {
        self.kill().await.unwrap_or(Ok(()))
    }
}

/// Close politely, then kill if the browser does not answer or exit within `grace`.
///
/// Returns the close request's error, if any. Never waits longer than twice
/// `grace` plus the kill.
pub(crate) async fn shut_down<P: BrowserProcess + ?Sized>(
    process: &mut P,
    grace: Duration,
) -> Result<()> {
    let closed = match tokio::time::timeout(grace, process.request_close()).await {
        Ok(closed) => closed,
        Err(_) => Err(FetchError::engine(format!(
            "browser did not answer the close request within {grace:?}"
        ))),
    };

    let exited = match &closed {
        Ok(()) => match tokio::time::timeout(grace, process.reap()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to reap browser process");
                false
            }
            Err(_) => false,
        },
        Err(_) => false,
    };

    if !exited {
        debug!("killing browser process");
        if let Err(e) = process.force_kill().await {
            warn!(error = %e, "failed to kill browser process");
        }
    }
    closed
}

/// A single Chromium page.
pub struct ChromiumContext {
    page: Page,
    navigation_timeout: Duration,
}

impl ChromiumContext {
    async fn navigate_inner(&self, url: &Url) -> Result<NavigationResponse> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await?;
        let mut dom_ready = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await?;

        let nav = self
            .page
            .execute(NavigateParams::new(url.as_str()))
            .await?
            .result;
        if let Some(reason) = nav.error_text.filter(|t| !t.is_empty()) {
            return Err(FetchError::NavigationFailed {
                url: url.to_string(),
                reason,
            });
        }
        let loader_id = nav.loader_id.ok_or_else(|| FetchError::NavigationFailed {
            url: url.to_string(),
            reason: "same-document navigation produced no response".into(),
        })?;

        let response = loop {
            let event = responses
                .next()
                .await
                .ok_or_else(|| FetchError::engine("response event stream closed"))?;
            if event.loader_id == loader_id && event.r#type == ResourceType::Document {
                break NavigationResponse {
                    url: event.response.url.clone(),
                    status: u16::try_from(event.response.status).unwrap_or(0),
                    request_id: event.request_id.inner().clone(),
                };
            }
        };

        dom_ready
            .next()
            .await
            .ok_or_else(|| FetchError::engine("page event stream closed"))?;
        debug!(url = %response.url, status = response.status, "DOMContentLoaded");

        Ok(response)
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &Url) -> Result<NavigationResponse> {
        bounded_navigation(url, self.navigation_timeout, self.navigate_inner(url)).await
    }

    async fn response_body(&self, response: &NavigationResponse) -> Result<Vec<u8>> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(
                response.request_id.clone(),
            )))
            .await?
            .result;

        if body.base64_encoded {
            B64.decode(body.body.as_bytes())
                .map_err(|e| FetchError::engine(format!("failed to decode response body: {e}")))
        } else {
            Ok(body.body.into_bytes())
        }
    }

    async fn evaluate(&self, script: &str) -> Result<()> {
        self.page.evaluate(script).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}

/// Download capture backed by the `Browser.download*` events.
struct ChromiumDownload {
    dir: PathBuf,
    begins: EventStream<EventDownloadWillBegin>,
    progress: EventStream<EventDownloadProgress>,
    guid: Option<String>,
}

#[async_trait]
impl PendingDownload for ChromiumDownload {
    async fn started(&mut self) -> Result<DownloadStarted> {
        let event = self
            .begins
            .next()
            .await
            .ok_or_else(|| FetchError::engine("download event stream closed"))?;
        self.guid = Some(event.guid.clone());

        Ok(DownloadStarted {
            guid: event.guid.clone(),
            url: event.url.clone(),
            suggested_filename: event.suggested_filename.clone(),
        })
    }

    async fn finished(mut self: Box<Self>) -> Result<PathBuf> {
        let guid = self
            .guid
            .clone()
            .ok_or_else(|| FetchError::engine("download has not started"))?;

        while let Some(event) = self.progress.next().await {
            if event.guid != guid {
                continue;
            }
            match event.state {
                DownloadProgressState::Completed => return Ok(self.dir.join(&guid)),
                DownloadProgressState::Canceled => {
                    return Err(FetchError::engine(format!("download {guid} was canceled")))
                }
                DownloadProgressState::InProgress => {
                    trace!(
                        received = event.received_bytes,
                        total = event.total_bytes,
                        "download progress"
                    );
                }
            }
        }

        Err(FetchError::engine("download progress stream closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_path_exists() {
        if let Some(path) = find_chromium() {
            assert!(path.exists());
        }
    }

    /// Scripted process: how `close` and `wait` behave, and whether it was killed.
    #[derive(Default)]
    struct StubProcess {
        close_fails: bool,
        close_hangs: bool,
        never_exits: bool,
        killed: bool,
    }

    #[async_trait]
    impl BrowserProcess for StubProcess {
        async fn request_close(&mut self) -> Result<()> {
            if self.close_hangs {
                std::future::pending::<()>().await;
            }
            if self.close_fails {
                return Err(FetchError::engine("Request timed out."));
            }
            Ok(())
        }

        async fn reap(&mut self) -> std::io::Result<()> {
            if self.never_exits && !self.killed {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn force_kill(&mut self) -> std::io::Result<()> {
            self.killed = true;
            Ok(())
        }
    }

    const GRACE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn clean_close_does_not_kill() {
        let mut process = StubProcess::default();
        shut_down(&mut process, GRACE).await.unwrap();
        assert!(!process.killed);
    }

    #[tokio::test]
    async fn failed_close_kills_instead_of_waiting() {
        let mut process = StubProcess {
            close_fails: true,
            never_exits: true,
            ..StubProcess::default()
        };
        let start = std::time::Instant::now();
        let err = shut_down(&mut process, GRACE).await.unwrap_err();

        assert!(matches!(err, FetchError::Engine(_)));
        assert!(process.killed);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unanswered_close_is_bounded() {
        let mut process = StubProcess {
            close_hangs: true,
            never_exits: true,
            ..StubProcess::default()
        };
        let err = tokio::time::timeout(Duration::from_secs(2), shut_down(&mut process, GRACE))
            .await
            .expect("shutdown must not hang")
            .unwrap_err();

        assert!(err.to_string().contains("close request"));
        assert!(process.killed);
    }

    #[tokio::test]
    async fn lingering_process_is_killed_after_grace() {
        let mut process = StubProcess {
            never_exits: true,
            ..StubProcess::default()
        };
        let closed = tokio::time::timeout(Duration::from_secs(2), shut_down(&mut process, GRACE))
            .await
            .expect("shutdown must not hang");

        assert!(closed.is_ok());
        assert!(process.killed);
    }

    #[tokio::test]
    async fn missing_executable_is_an_engine_error() {
        let options = LaunchOptions {
            executable: Some(PathBuf::from("/nonexistent/munchkin/chrome")),
            headed: false,
            navigation_timeout: Duration::from_secs(1),
        };
        let err = ChromiumRenderer::launch(&options).await.err().unwrap();
        assert!(matches!(err, FetchError::Engine(_)), "got {err:?}");
    }
}
