//! Results printed by the fetchers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::DOWNLOAD_SUCCESS_MESSAGE;
use crate::error::Result;

/// Outcome of a successful download fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReport {
    /// Absolute path of the saved file.
    pub file: PathBuf,
    pub message: String,
}

impl DownloadReport {
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            message: DOWNLOAD_SUCCESS_MESSAGE.to_string(),
        }
    }

    /// Single-line JSON, as written to stdout.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome of a text fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReport {
    /// Final URL of the main document.
    pub url: String,
    pub status: u16,
    /// Body decoded as UTF-8; invalid sequences are replaced.
    pub text: String,
}
