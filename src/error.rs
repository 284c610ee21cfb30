//! Custom error types for paperbot.
//!
//! Only run-level failures live here. Per-provider download failures are
//! ordinary values (see [`crate::paper::ProviderFailure`]) recorded on each
//! paper, because they drive the download state machine instead of aborting it.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for paperbot operations.
#[derive(Debug, Error)]
pub enum PaperbotError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML or API payload could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Search backend answered with a bot-detection page
    #[error("CAPTCHA detected, search backend refused the request")]
    Captcha,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Destination directory or file could not be written
    #[error("Cannot write to {}: {source}", path.display())]
    Destination {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Invalid filter policy combination
    #[error("Invalid filter policy: {0}")]
    Policy(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PaperbotError {
    /// Wrap an I/O failure on the destination path.
    pub fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Destination {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using `PaperbotError`
pub type Result<T> = std::result::Result<T, PaperbotError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PaperbotError::Parse(msg.to_string()))
    }
}
