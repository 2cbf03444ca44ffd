//! WebKit and Firefox driven through the Playwright driver.
//!
//! Neither engine serves the DevTools protocol, so these go through
//! playwright-rs, which talks to the Playwright server it bundles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use playwright_rs::{
    Browser, BrowserContext, BrowserContextOptions, GotoOptions,
    LaunchOptions as DriverLaunchOptions, Page, Playwright, Response, WaitUntil,
};
use playwright_rs::protocol::Download;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use super::{
    bounded_navigation, BrowserKind, DownloadStarted, NavigationResponse, PendingDownload,
    RenderContext, Renderer,
};
use crate::config::{ContextProfile, LaunchOptions};
use crate::error::{FetchError, Result};

/// Name the payload is saved under before it is moved to its suggested name.
const STAGING_NAME: &str = ".munchkin-download";

/// How long a closing browser gets before the driver is dropped under it.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Where page download events are forwarded once a capture is armed.
type DownloadSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Download>>>>;

/// A WebKit or Firefox browser launched by Playwright.
pub struct PlaywrightRenderer {
    kind: BrowserKind,
    browser: Browser,
    navigation_timeout: Duration,
    downloads: DownloadSlot,
    // Keeps the driver process alive for as long as the browser.
    _playwright: Playwright,
}

impl PlaywrightRenderer {
    /// Start the Playwright driver and launch `kind` through it.
    pub async fn launch(kind: BrowserKind, options: &LaunchOptions) -> Result<Self> {
        let playwright = Playwright::launch()
            .await
            .map_err(|e| FetchError::engine(format!("failed to launch {kind}: {e}")))?;

        let browser_type = match kind {
            BrowserKind::Chromium => playwright.chromium(),
            BrowserKind::Webkit => playwright.webkit(),
            BrowserKind::Firefox => playwright.firefox(),
        };

        let mut launch = DriverLaunchOptions::default().headless(!options.headed);
        if let Some(path) = &options.executable {
            launch = launch.executable_path(path.to_string_lossy().into_owned());
        }
        debug!(browser = %kind, headed = options.headed, "launching through playwright");

        let browser = browser_type
            .launch_with_options(launch)
            .await
            .map_err(|e| FetchError::engine(format!("failed to launch {kind}: {e}")))?;

        Ok(Self {
            kind,
            browser,
            navigation_timeout: options.navigation_timeout,
            downloads: Arc::new(Mutex::new(None)),
            _playwright: playwright,
        })
    }
}

#[async_trait]
impl Renderer for PlaywrightRenderer {
    async fn new_context(&self, profile: &ContextProfile) -> Result<Box<dyn RenderContext>> {
        let headers: HashMap<String, String> = profile.extra_headers().into_iter().collect();
        let options = BrowserContextOptions::builder()
            .user_agent(profile.user_agent().to_string())
            .extra_http_headers(headers)
            .accept_downloads(true)
            .build();
        let context = self.browser.new_context_with_options(options).await?;

        for script in profile.init_scripts() {
            context.add_init_script(script).await?;
        }

        let page = context.new_page().await?;
        let slot = Arc::clone(&self.downloads);
        page.on_download(move |download| {
            let sender = slot.lock().ok().and_then(|armed| armed.clone());
            async move {
                if let Some(sender) = sender {
                    let _ = sender.send(download);
                }
                Ok::<(), playwright_rs::Error>(())
            }
        })
        .await?;
        debug!(browser = %self.kind, user_agent = profile.user_agent(), "browsing context ready");

        Ok(Box::new(PlaywrightContext {
            context,
            page,
            navigation_timeout: self.navigation_timeout,
            last_response: None,
        }))
    }

    async fn expect_download(&self, dir: &Path) -> Result<Box<dyn PendingDownload>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self
            .downloads
            .lock()
            .map_err(|_| FetchError::engine("download slot poisoned"))? = Some(sender);
        debug!(dir = %dir.display(), "download capture armed");

        Ok(Box::new(PlaywrightDownload {
            dir: dir.to_path_buf(),
            receiver,
            download: None,
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the driver afterwards takes down anything it still runs.
        match tokio::time::timeout(CLOSE_GRACE, self.browser.close()).await {
            Ok(closed) => Ok(closed?),
            Err(_) => Err(FetchError::engine(format!(
                "{} did not close within {CLOSE_GRACE:?}",
                self.kind
            ))),
        }
    }
}

/// One Playwright browser context with its single page.
pub struct PlaywrightContext {
    context: BrowserContext,
    page: Page,
    navigation_timeout: Duration,
    last_response: Option<Response>,
}

impl PlaywrightContext {
    async fn goto(&self, url: &Url) -> Result<Option<Response>> {
        let options = GotoOptions::new()
            .wait_until(WaitUntil::DomContentLoaded)
            .timeout(self.navigation_timeout);
        self.page
            .goto(url.as_str(), Some(options))
            .await
            .map_err(|e| FetchError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl RenderContext for PlaywrightContext {
    async fn navigate(&mut self, url: &Url) -> Result<NavigationResponse> {
        let response = bounded_navigation(url, self.navigation_timeout, async {
            let response = self.goto(url).await?;
            // about:blank and data: URLs answer without an HTTP response.
            let navigation = match &response {
                Some(response) => NavigationResponse {
                    url: response.url().to_string(),
                    status: response.status(),
                    request_id: response.url().to_string(),
                },
                None => NavigationResponse {
                    url: url.to_string(),
                    status: 0,
                    request_id: String::new(),
                },
            };
            Ok::<_, FetchError>((navigation, response))
        })
        .await?;

        let (navigation, response) = response;
        self.last_response = response;
        Ok(navigation)
    }

    async fn response_body(&self, response: &NavigationResponse) -> Result<Vec<u8>> {
        match &self.last_response {
            Some(last) if last.url() == response.request_id => Ok(last.body().await?),
            Some(_) => Err(FetchError::engine(format!(
                "no body retained for {}",
                response.url
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<()> {
        self.page.evaluate_expression(script).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await?;
        self.context.close().await?;
        Ok(())
    }
}

/// Download capture fed by the page's download events.
struct PlaywrightDownload {
    dir: PathBuf,
    receiver: mpsc::UnboundedReceiver<Download>,
    download: Option<Download>,
}

#[async_trait]
impl PendingDownload for PlaywrightDownload {
    async fn started(&mut self) -> Result<DownloadStarted> {
        let download = self
            .receiver
            .recv()
            .await
            .ok_or_else(|| FetchError::engine("download event stream closed"))?;

        let started = DownloadStarted {
            guid: STAGING_NAME.to_string(),
            url: download.url().to_string(),
            suggested_filename: download.suggested_filename().to_string(),
        };
        self.download = Some(download);
        Ok(started)
    }

    async fn finished(self: Box<Self>) -> Result<PathBuf> {
        let PlaywrightDownload { dir, download, .. } = *self;
        let download = download.ok_or_else(|| FetchError::engine("download has not started"))?;

        // save_as resolves once the payload is complete and fails if it was canceled.
        let staged = dir.join(STAGING_NAME);
        download.save_as(&staged).await?;
        Ok(staged)
    }
}
