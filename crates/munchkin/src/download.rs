//! Download-triggering fetch.
//!
//! Visits the listing page for a ticker, then points `window.location` at the
//! target URL from inside the page and captures the download that the
//! redirect triggers. The payload lands in a fresh `munchkin*` temp directory
//! under the name the server suggested.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{
    default_listing_template, listing_url, ContextProfile, LaunchOptions,
    DEFAULT_DOWNLOAD_TIMEOUT_MS, DEFAULT_TICKER, TEMP_DIR_PREFIX,
};
use crate::engine::{BrowserKind, Launcher};
use crate::error::{FetchError, Result};
use crate::report::DownloadReport;
use crate::session::BrowserSession;

/// Filename used when the engine suggests nothing usable.
const FALLBACK_FILENAME: &str = "download";

/// Everything a download fetch needs.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// URL assigned to `window.location` once the listing page is up.
    pub url: Url,
    /// Substituted into `listing_template`.
    pub ticker: String,
    /// Listing page template containing `{ticker}`.
    pub listing_template: String,
    pub browser: BrowserKind,
    pub profile: ContextProfile,
    /// How long to wait for the download to start.
    pub timeout: Duration,
    pub launch: LaunchOptions,
}

impl DownloadRequest {
    /// Request with the default ticker, listing page, browser and timeout.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            ticker: DEFAULT_TICKER.to_string(),
            listing_template: default_listing_template(),
            browser: BrowserKind::default(),
            profile: ContextProfile::default(),
            timeout: Duration::from_millis(DEFAULT_DOWNLOAD_TIMEOUT_MS),
            launch: LaunchOptions::default(),
        }
    }

    /// The listing page this request visits first.
    pub fn listing_url(&self) -> Result<Url> {
        listing_url(&self.listing_template, &self.ticker)
    }
}

/// Run a download fetch and return the report to print.
///
/// The browser is released on every path. Configuration problems are caught
/// before it is launched.
pub async fn download(
    launcher: &dyn Launcher,
    request: &DownloadRequest,
) -> Result<DownloadReport> {
    let listing = request.listing_url()?;
    info!(
        url = %request.url,
        listing = %listing,
        browser = %request.browser,
        "starting download fetch"
    );

    let session = BrowserSession::launch(launcher, request.browser, &request.launch).await?;
    let outcome = drive(&session, request, &listing).await;
    session.release(outcome).await
}

async fn drive(
    session: &BrowserSession,
    request: &DownloadRequest,
    listing: &Url,
) -> Result<DownloadReport> {
    let mut context = session.new_context(&request.profile).await?;

    let response = context.navigate(listing).await?;
    if !response.is_ok() {
        let body = match context.response_body(&response).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(error = %e, "could not read listing response body");
                String::new()
            }
        };
        error!(
            url = %response.url,
            status = response.status,
            text = %body,
            "listing page could not be loaded"
        );
        return Err(FetchError::PageNotOk {
            url: response.url,
            status: response.status,
            body,
        });
    }
    debug!(status = response.status, "listing page loaded");

    let target = DownloadDir::create()?;
    let mut pending = session.expect_download(target.path()).await?;

    if let Err(e) = context.evaluate(&redirect_script(&request.url)?).await {
        // The redirect may tear down the execution context before the
        // evaluation answers; the download wait decides the outcome.
        debug!(error = %e, "redirect script did not complete");
    }

    let started = match tokio::time::timeout(request.timeout, pending.started()).await {
        Ok(started) => started?,
        Err(_) => {
            return Err(FetchError::DownloadTimeout {
                timeout: request.timeout,
            })
        }
    };
    info!(url = %started.url, filename = %started.suggested_filename, "download started");

    let staged = pending.finished().await?;
    let file = target.persist(&staged, &started.suggested_filename).await?;

    if let Err(e) = context.close().await {
        debug!(error = %e, "failed to close browsing context");
    }

    Ok(DownloadReport::new(file))
}

/// Page script sending the browser to `url`.
pub fn redirect_script(url: &Url) -> Result<String> {
    Ok(format!("window.location = {};", serde_json::to_string(url.as_str())?))
}

/// Reduce a suggested filename to a single safe path component.
pub fn sanitize_filename(suggested: &str) -> String {
    let name = suggested
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    match name {
        "" | "." | ".." => FALLBACK_FILENAME.to_string(),
        name => name.to_string(),
    }
}

/// A uniquely named temp directory receiving one download.
///
/// Removed on drop unless [`DownloadDir::persist`] succeeds.
pub struct DownloadDir {
    dir: TempDir,
}

impl DownloadDir {
    /// Create `<tmp>/munchkin<random>`.
    pub fn create() -> Result<Self> {
        let root = std::path::absolute(std::env::temp_dir())?;
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Move the staged payload to `<dir>/<suggested filename>` and keep the directory.
    pub async fn persist(self, staged: &Path, suggested: &str) -> Result<PathBuf> {
        let destination = self.dir.path().join(sanitize_filename(suggested));

        if staged != destination.as_path() {
            if tokio::fs::rename(staged, &destination).await.is_err() {
                tokio::fs::copy(staged, &destination).await?;
                tokio::fs::remove_file(staged).await?;
            }
        }

        let _ = self.dir.keep();
        debug!(path = %destination.display(), "download saved");
        Ok(destination)
    }
}
