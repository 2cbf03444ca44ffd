//! Defaults and environment overrides.
//!
//! Every fetch opens its browsing context from a [`ContextProfile`]: the fixed
//! header set, the user agent and the init scripts. Launch-time knobs live in
//! [`LaunchOptions`] and can be overridden through `MUNCHKIN_*` variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use url::Url;

use crate::error::{FetchError, Result};

/// Desktop Chrome user agent sent unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/123.0.0.0 Safari/537.36";

/// Ticker substituted into the listing template by default.
pub const DEFAULT_TICKER: &str = "BBCA";

/// Download-start wait, in milliseconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 10_000;

/// Navigation wait (until DOMContentLoaded), in milliseconds.
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

/// Listing page visited before the redirect. `{ticker}` is replaced.
pub const DEFAULT_LISTING_URL: &str =
    "https://www.idx.co.id/id/perusahaan-tercatat/profil-perusahaan-tercatat/{ticker}";

/// Placeholder replaced in listing templates.
pub const TICKER_PLACEHOLDER: &str = "{ticker}";

/// Prefix of the per-download temp directory.
pub const TEMP_DIR_PREFIX: &str = "munchkin";

/// Message attached to a successful download report.
pub const DOWNLOAD_SUCCESS_MESSAGE: &str = "Successfully downloaded";

/// Makes `navigator.webdriver` report `false` instead of the automation default.
pub const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => false });";

/// Headers every browsing context sends, in addition to `User-Agent`.
pub const BASE_HTTP_HEADERS: [(&str, &str); 4] = [
    ("Accept-Language", "en-US,en;q=0.9"),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
];

/// How a browsing context presents itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextProfile {
    headers: BTreeMap<String, String>,
    user_agent: String,
    init_scripts: Vec<String>,
}

impl ContextProfile {
    /// Build the profile from the base headers with `User-Agent` set to `user_agent`.
    ///
    /// Fails if the user agent is not a valid header value.
    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        let user_agent = user_agent.into();
        validate_header("User-Agent", &user_agent)?;
        Ok(Self {
            user_agent,
            ..Self::default()
        })
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        validate_header(name, value)?;
        if name.eq_ignore_ascii_case("user-agent") {
            self.user_agent = value.to_string();
        } else {
            self.headers.insert(name.to_string(), value.to_string());
        }
        Ok(self)
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The full header map sent with every request, `User-Agent` included.
    pub fn extra_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        headers.insert("User-Agent".to_string(), self.user_agent.clone());
        headers
    }

    /// Scripts evaluated in every new document before any page script runs.
    pub fn init_scripts(&self) -> &[String] {
        &self.init_scripts
    }
}

impl Default for ContextProfile {
    fn default() -> Self {
        let headers = BASE_HTTP_HEADERS
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self {
            headers,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            init_scripts: vec![HIDE_WEBDRIVER_SCRIPT.to_string()],
        }
    }
}

/// Check `name: value` against the HTTP header grammar.
pub fn validate_header(name: &str, value: &str) -> Result<()> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FetchError::config(format!("invalid header name '{name}'")))?;
    HeaderValue::from_str(value).map_err(|_| {
        FetchError::config(format!("header '{name}' contains control characters"))
    })?;
    Ok(())
}

/// Resolve the listing page for `ticker` from a template containing `{ticker}`.
pub fn listing_url(template: &str, ticker: &str) -> Result<Url> {
    if !template.contains(TICKER_PLACEHOLDER) {
        return Err(FetchError::config(format!(
            "listing url '{template}' has no {TICKER_PLACEHOLDER} placeholder"
        )));
    }
    if ticker.is_empty()
        || !ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(FetchError::config(format!("invalid ticker '{ticker}'")));
    }

    let raw = template.replace(TICKER_PLACEHOLDER, ticker);
    Url::parse(&raw).map_err(|source| FetchError::InvalidUrl { input: raw, source })
}

/// Listing template from `MUNCHKIN_LISTING_URL`, else the built-in default.
pub fn default_listing_template() -> String {
    std::env::var("MUNCHKIN_LISTING_URL").unwrap_or_else(|_| DEFAULT_LISTING_URL.to_string())
}

/// Parse a user-supplied URL. Relative or malformed input is rejected.
pub fn parse_target_url(input: &str) -> Result<Url> {
    Url::parse(input).map_err(|source| FetchError::InvalidUrl {
        input: input.to_string(),
        source,
    })
}

/// Browser launch configuration.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Browser executable overriding discovery. Chromium is otherwise found
    /// through `MUNCHKIN_CHROMIUM_PATH` and the usual install locations; the
    /// Playwright engines use the browsers Playwright installed.
    pub executable: Option<PathBuf>,
    /// Show the browser window instead of running headless.
    pub headed: bool,
    /// Upper bound on a single navigation.
    pub navigation_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headed: std::env::var("MUNCHKIN_HEADED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            navigation_timeout: Duration::from_millis(
                std::env::var("MUNCHKIN_NAVIGATION_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_MS),
            ),
        }
    }
}
