//! # paperbot
//!
//! Scientific paper acquisition: resolve a search query or a DOI list into
//! paper records, filter and rank them, download full texts through an
//! ordered list of fallback providers, and report the outcome.
//!
//! ## Modules
//!
//! - [`scholar`] - Google Scholar result page resolver
//! - [`crossref`] - Crossref DOI resolution and title enrichment
//! - [`filter`] - Venue/year filtering and limiting
//! - [`download`] - Multi-provider download orchestrator
//! - [`report`] - CSV manifest and BibTeX output
//! - [`pipeline`] - One full run
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use paperbot::pipeline::{self, RunRequest};
//! use paperbot::query::{PageRange, Query, Source};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let query = Query::text("machine learning", PageRange::new(1, 2)?);
//!     let summary = pipeline::run(RunRequest::new(Source::Search(query), "./papers")).await?;
//!     println!("Downloaded {} of {} papers", summary.downloaded, summary.total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crossref;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod paper;
pub mod pipeline;
pub mod provider;
pub mod query;
pub mod report;
pub mod scholar;

pub use error::{PaperbotError, Result};
pub use paper::{DownloadState, Paper};
pub use pipeline::{run, RunRequest, RunSummary};
