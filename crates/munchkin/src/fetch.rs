//! Text fetch: navigate, wait for DOMContentLoaded, return the decoded body.

use tracing::{debug, info};
use url::Url;

use crate::config::{ContextProfile, LaunchOptions};
use crate::engine::{BrowserKind, Launcher};
use crate::error::Result;
use crate::report::TextReport;
use crate::session::BrowserSession;

/// Everything a text fetch needs.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub browser: BrowserKind,
    pub profile: ContextProfile,
    pub launch: LaunchOptions,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            browser: BrowserKind::default(),
            profile: ContextProfile::default(),
            launch: LaunchOptions::default(),
        }
    }
}

/// Fetch the main document body of `request.url` as text.
///
/// The status is reported but does not gate the result: error pages come
/// back with their body like any other page.
pub async fn fetch_text(launcher: &dyn Launcher, request: &FetchRequest) -> Result<TextReport> {
    info!(url = %request.url, browser = %request.browser, "starting text fetch");

    let session = BrowserSession::launch(launcher, request.browser, &request.launch).await?;
    let outcome = drive(&session, request).await;
    session.release(outcome).await
}

async fn drive(session: &BrowserSession, request: &FetchRequest) -> Result<TextReport> {
    let mut context = session.new_context(&request.profile).await?;

    let response = context.navigate(&request.url).await?;
    let body = context.response_body(&response).await?;
    let text = String::from_utf8_lossy(&body).into_owned();
    debug!(status = response.status, bytes = body.len(), "response body read");

    if let Err(e) = context.close().await {
        debug!(error = %e, "failed to close browsing context");
    }

    Ok(TextReport {
        url: response.url,
        status: response.status,
        text,
    })
}
