//! Munchkin command-line fetchers.
//!
//! Argument parsing, logging setup and program bodies shared by the
//! `munchkin-download` and `munchkin-fetch` binaries.

pub mod args;
pub mod commands;
pub mod logging;

pub use args::{BrowserArg, DownloadCli, FetchCli, LogFormat};
