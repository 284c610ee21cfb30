//! The paper record that flows through every stage of a run, and the
//! per-paper download state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One bibliographic item under consideration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paper {
    /// Article title (empty only for placeholder records)
    pub title: String,
    /// Authors in byline order
    pub authors: Vec<String>,
    /// Publication year
    pub year: Option<i32>,
    /// Journal/Conference venue
    pub venue: Option<String>,
    /// DOI, the identity key when present
    pub doi: Option<String>,
    /// Number of citations
    pub citations: Option<u64>,
    /// Abstract or result snippet
    pub snippet: String,
    /// Links found during resolution, in discovery order
    pub source_urls: Vec<String>,
    /// Name the downloaded file after the DOI instead of the title
    pub use_doi_as_filename: bool,
    /// False for placeholder records whose lookup failed
    pub metadata_available: bool,
    /// Download progress
    #[serde(skip)]
    pub state: DownloadState,
}

impl Paper {
    /// Record produced when an identifier could not be resolved.
    pub fn placeholder(identifier: &str) -> Self {
        Self {
            doi: Some(identifier.to_string()),
            metadata_available: false,
            ..Default::default()
        }
    }

    /// Best link for providers that need a URL when there is no DOI.
    pub fn best_url(&self) -> Option<&str> {
        self.source_urls.first().map(String::as_str)
    }

    /// Local file, once downloaded.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.state {
            DownloadState::Downloaded { path, .. } => Some(path.as_path()),
            _ => None,
        }
    }

    /// Whether the record carries a usable DOI.
    pub fn has_doi(&self) -> bool {
        self.doi.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}

/// Why a provider did not deliver a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    /// Request exceeded the run's timeout
    Timeout,
    /// Connection or transport failure
    Network(String),
    /// Provider has no document for this paper
    NotFound,
    /// Any other non-success HTTP status
    HttpStatus(u16),
    /// Response was not a well-formed document
    Malformed(String),
    /// Landing page held no document link
    NoLink,
    /// Paper has neither a DOI nor a URL the provider can use
    NoTarget,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network(msg) => write!(f, "network error ({msg})"),
            Self::NotFound => write!(f, "not found"),
            Self::HttpStatus(code) => write!(f, "http {code}"),
            Self::Malformed(msg) => write!(f, "malformed content ({msg})"),
            Self::NoLink => write!(f, "no document link"),
            Self::NoTarget => write!(f, "no usable identifier"),
        }
    }
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::NOT_FOUND {
                Self::NotFound
            } else {
                Self::HttpStatus(status.as_u16())
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One provider tried for one paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Provider name
    pub provider: String,
    /// `None` on success
    pub failure: Option<ProviderFailure>,
}

impl Attempt {
    pub fn failed(provider: &str, failure: ProviderFailure) -> Self {
        Self {
            provider: provider.to_string(),
            failure: Some(failure),
        }
    }

    pub fn succeeded(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            failure: None,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Some(failure) => write!(f, "{}: {}", self.provider, failure),
            None => write!(f, "{}: ok", self.provider),
        }
    }
}

/// Per-paper download state.
///
/// `Pending → Trying(0) → … → Trying(n) → Downloaded | Exhausted`. A paper
/// that stays `Pending` after a run was never attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DownloadState {
    #[default]
    Pending,
    Trying {
        /// Index into the run's priority-ordered provider list
        provider: usize,
        attempts: Vec<Attempt>,
    },
    Downloaded {
        provider: String,
        path: PathBuf,
        attempts: Vec<Attempt>,
    },
    Exhausted {
        attempts: Vec<Attempt>,
    },
}

impl DownloadState {
    /// Label used in the manifest.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending | Self::Trying { .. } => "unattempted",
            Self::Downloaded { .. } => "downloaded",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Pending => &[],
            Self::Trying { attempts, .. }
            | Self::Downloaded { attempts, .. }
            | Self::Exhausted { attempts } => attempts,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }
}
