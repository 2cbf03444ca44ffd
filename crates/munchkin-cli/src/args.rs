//! Command-line arguments for both fetchers.

use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use url::Url;

use munchkin::config::{
    default_listing_template, parse_target_url, ContextProfile, LaunchOptions,
    DEFAULT_DOWNLOAD_TIMEOUT_MS, DEFAULT_TICKER, DEFAULT_USER_AGENT,
};
use munchkin::{BrowserKind, DownloadRequest, FetchRequest};

/// Browser engine to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrowserArg {
    Chromium,
    Webkit,
    Firefox,
}

impl From<BrowserArg> for BrowserKind {
    fn from(arg: BrowserArg) -> Self {
        match arg {
            BrowserArg::Chromium => BrowserKind::Chromium,
            BrowserArg::Webkit => BrowserKind::Webkit,
            BrowserArg::Firefox => BrowserKind::Firefox,
        }
    }
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Options shared by both programs.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// User-Agent header sent with every request.
    #[arg(short = 'u', long = "user", default_value = DEFAULT_USER_AGENT)]
    pub user: String,

    /// Browser engine to use.
    #[arg(short, long, value_enum, default_value_t = BrowserArg::Chromium)]
    pub browser: BrowserArg,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Log format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl CommonArgs {
    fn profile(&self) -> munchkin::Result<ContextProfile> {
        ContextProfile::new(self.user.clone())
    }
}

/// Visit a listing page, redirect to URL and save the file it downloads.
#[derive(Parser, Debug, Clone)]
#[command(name = "munchkin-download", version)]
pub struct DownloadCli {
    /// URL that triggers the download.
    #[arg(value_parser = parse_url)]
    pub url: Url,

    /// Ticker substituted into the listing page URL.
    #[arg(short, long, default_value = DEFAULT_TICKER)]
    pub ticker: String,

    /// Milliseconds to wait for the download to start.
    #[arg(short = 'o', long, default_value_t = DEFAULT_DOWNLOAD_TIMEOUT_MS)]
    pub timeout: u64,

    /// Listing page template; `{ticker}` is replaced.
    /// Defaults to MUNCHKIN_LISTING_URL when set.
    #[arg(long)]
    pub listing_url: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl DownloadCli {
    /// Build the library request. Header problems surface here, before launch.
    pub fn into_request(self) -> munchkin::Result<DownloadRequest> {
        let profile = self.common.profile()?;
        Ok(DownloadRequest {
            url: self.url,
            ticker: self.ticker,
            listing_template: self.listing_url.unwrap_or_else(default_listing_template),
            browser: self.common.browser.into(),
            profile,
            timeout: Duration::from_millis(self.timeout),
            launch: LaunchOptions::default(),
        })
    }
}

/// Print the text of the page at URL once its DOM is parsed.
#[derive(Parser, Debug, Clone)]
#[command(name = "munchkin-fetch", version)]
pub struct FetchCli {
    /// URL to fetch.
    #[arg(value_parser = parse_url)]
    pub url: Url,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl FetchCli {
    pub fn into_request(self) -> munchkin::Result<FetchRequest> {
        let profile = self.common.profile()?;
        Ok(FetchRequest {
            url: self.url,
            browser: self.common.browser.into(),
            profile,
            launch: LaunchOptions::default(),
        })
    }
}

fn parse_url(input: &str) -> Result<Url, String> {
    parse_target_url(input).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_defaults() {
        let cli = DownloadCli::try_parse_from(["munchkin-download", "http://localhost:8080/download"])
            .unwrap();
        assert_eq!(cli.ticker, "BBCA");
        assert_eq!(cli.timeout, 10_000);
        assert_eq!(cli.common.browser, BrowserArg::Chromium);
        assert_eq!(cli.common.user, DEFAULT_USER_AGENT);
        assert!(cli.listing_url.is_none());
    }

    #[test]
    fn download_short_flags() {
        let cli = DownloadCli::try_parse_from([
            "munchkin-download",
            "-u",
            "agent/1.0",
            "-t",
            "TLKM",
            "-b",
            "firefox",
            "-o",
            "2500",
            "https://example.com/file",
        ])
        .unwrap();
        assert_eq!(cli.common.user, "agent/1.0");
        assert_eq!(cli.ticker, "TLKM");
        assert_eq!(cli.common.browser, BrowserArg::Firefox);
        assert_eq!(cli.timeout, 2500);

        let request = cli.into_request().unwrap();
        assert_eq!(request.browser, BrowserKind::Firefox);
        assert_eq!(request.timeout, Duration::from_millis(2500));
        assert_eq!(request.profile.user_agent(), "agent/1.0");
    }

    #[test]
    fn malformed_url_is_rejected_by_parser() {
        let err = DownloadCli::try_parse_from(["munchkin-download", "not-a-url"]).unwrap_err();
        assert!(err.to_string().contains("not-a-url"));
        assert!(FetchCli::try_parse_from(["munchkin-fetch", "not-a-url"]).is_err());
    }

    #[test]
    fn unknown_browser_is_rejected() {
        assert!(FetchCli::try_parse_from(["munchkin-fetch", "-b", "opera", "http://localhost/"]).is_err());
    }

    #[test]
    fn non_numeric_timeout_is_rejected() {
        assert!(DownloadCli::try_parse_from([
            "munchkin-download",
            "-o",
            "soon",
            "http://localhost/"
        ])
        .is_err());
    }

    #[test]
    fn listing_url_flag_overrides_template() {
        let cli = DownloadCli::try_parse_from([
            "munchkin-download",
            "--listing-url",
            "http://127.0.0.1:9000/listing/{ticker}",
            "http://127.0.0.1:9000/download",
        ])
        .unwrap();
        let request = cli.into_request().unwrap();
        assert_eq!(
            request.listing_url().unwrap().as_str(),
            "http://127.0.0.1:9000/listing/BBCA"
        );
    }

    #[test]
    fn user_agent_with_newline_fails_before_launch() {
        let cli = FetchCli::try_parse_from(["munchkin-fetch", "-u", "a\nb", "http://localhost/"])
            .unwrap();
        assert!(cli.into_request().is_err());
    }

    #[test]
    fn fetch_defaults() {
        let cli = FetchCli::try_parse_from(["munchkin-fetch", "http://localhost/page"]).unwrap();
        let request = cli.into_request().unwrap();
        assert_eq!(request.url.as_str(), "http://localhost/page");
        assert_eq!(request.browser, BrowserKind::Chromium);
        assert_eq!(request.profile.user_agent(), DEFAULT_USER_AGENT);
    }
}
