//! Munchkin: headless browser fetchers.
//!
//! Two flows share one browser layer:
//!
//! - [`download::download`] visits a listing page, redirects the page to a
//!   target URL from a page script and captures the triggered download into a
//!   fresh temp directory.
//! - [`fetch::fetch_text`] navigates to a URL and returns the decoded main
//!   document body once the DOM is parsed.
//!
//! Both open their browsing context from a [`ContextProfile`] (fixed headers,
//! user agent, `navigator.webdriver` patch) and hold the browser in a
//! [`BrowserSession`] that is released on every exit path.

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod report;
pub mod session;

pub use config::{ContextProfile, LaunchOptions};
pub use download::{download, DownloadRequest};
pub use engine::{BrowserKind, EngineLauncher, Launcher};
pub use error::{FailureKind, FetchError, Result};
pub use fetch::{fetch_text, FetchRequest};
pub use report::{DownloadReport, TextReport};
pub use session::BrowserSession;
