//! One acquisition run: resolve, filter, download, report.

use crate::config::{build_http_client, RunConfig};
use crate::crossref::CrossrefClient;
use crate::download::{validate_retrieval_cap, DownloadOptions, Downloader};
use crate::error::{PaperbotError, Result};
use crate::fetcher::{HttpPageFetcher, PageFetcher};
use crate::filter::FilterPolicy;
use crate::paper::{DownloadState, Paper};
use crate::provider::{default_providers, ProviderDescriptor};
use crate::query::{QueryKind, Source};
use crate::report;
use crate::scholar::{ScholarResolver, SearchOptions, BACKEND_PAGE_SIZE};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Limit what a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restrict {
    /// Resolve and report, download nothing
    BibtexOnly,
    /// Download and write the manifest, skip the bibliography
    PdfOnly,
}

/// Everything a run needs, as plain values.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: Source,
    /// Output directory for documents and reports
    pub destination: PathBuf,
    pub policy: FilterPolicy,
    /// Overrides the default provider order entirely
    pub providers: Option<Vec<ProviderDescriptor>>,
    /// Base URL of the SciDB mirror in the default order
    pub scidb_mirror: Option<String>,
    /// Base URL of the Sci-Hub mirror in the default order
    pub scihub_mirror: Option<String>,
    /// Stop once this many documents are downloaded
    pub retrieval_cap: Option<usize>,
    pub use_doi_as_filename: bool,
    pub skip_words: Vec<String>,
    /// Search rows kept per page
    pub page_capacity: usize,
    pub restrict: Option<Restrict>,
    pub network: RunConfig,
}

impl RunRequest {
    pub fn new(source: Source, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            destination: destination.into(),
            policy: FilterPolicy::default(),
            providers: None,
            scidb_mirror: None,
            scihub_mirror: None,
            retrieval_cap: None,
            use_doi_as_filename: false,
            skip_words: Vec::new(),
            page_capacity: BACKEND_PAGE_SIZE as usize,
            restrict: None,
            network: RunConfig::default(),
        }
    }

    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            page_capacity: self.page_capacity,
            skip_words: self.skip_words.clone(),
            min_year: self.policy.min_year,
        }
    }

    fn provider_list(&self) -> Vec<ProviderDescriptor> {
        self.providers.clone().unwrap_or_else(|| {
            default_providers(self.scidb_mirror.as_deref(), self.scihub_mirror.as_deref())
        })
    }

    /// Reject bad input before any network activity.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.network.validate()?;
        self.search_options().validate()?;
        validate_retrieval_cap(self.retrieval_cap)?;
        if let Source::Search(query) = &self.source {
            let empty = match &query.kind {
                QueryKind::Text(text) | QueryKind::CitedBy(text) => text.trim().is_empty(),
            };
            if empty {
                return Err(PaperbotError::Validation("search query is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub downloaded: usize,
    pub exhausted: usize,
    pub unattempted: usize,
    /// Records kept as placeholders
    pub metadata_unavailable: usize,
    pub manifest: PathBuf,
    pub bibliography: Option<PathBuf>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Final records, in report order
    pub papers: Vec<Paper>,
}

/// Run with plain HTTP page fetching.
pub async fn run(request: RunRequest) -> Result<RunSummary> {
    request.validate()?;
    let client = build_http_client(&request.network)?;
    let fetcher = Arc::new(HttpPageFetcher::new(client.clone()));
    run_with(request, client, fetcher).await
}

/// Run with a caller-supplied page fetcher for the search backend.
pub async fn run_with(
    request: RunRequest,
    client: reqwest::Client,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<RunSummary> {
    let started_at = Local::now();
    request.validate()?;

    let downloader = Downloader::new(
        client.clone(),
        request.provider_list(),
        DownloadOptions {
            destination: request.destination.clone(),
            retrieval_cap: request.retrieval_cap,
            workers: request.network.workers,
        },
    )?;

    tokio::fs::create_dir_all(&request.destination)
        .await
        .map_err(|e| PaperbotError::destination(&request.destination, e))?;

    let crossref = CrossrefClient::new(client, &request.network);
    let mut papers = match &request.source {
        Source::Search(query) => {
            let resolver = ScholarResolver::new(fetcher, &request.network, request.search_options());
            let mut papers = resolver.resolve(query).await;
            crossref.enrich(&mut papers).await;
            papers
        }
        Source::Identifiers(identifiers) => crossref.resolve_identifiers(identifiers).await,
    };
    for paper in &mut papers {
        paper.use_doi_as_filename = request.use_doi_as_filename;
    }

    let papers = request.policy.apply(papers);

    let papers = match request.restrict {
        Some(Restrict::BibtexOnly) => {
            info!(count = papers.len(), "Downloads disabled, reporting only");
            papers
        }
        _ => downloader.download_all(papers).await?,
    };

    let with_bibliography = request.restrict != Some(Restrict::PdfOnly);
    let reports = report::write_reports(&papers, &request.destination, with_bibliography)?;

    let count = |f: fn(&DownloadState) -> bool| papers.iter().filter(|p| f(&p.state)).count();
    let summary = RunSummary {
        total: papers.len(),
        downloaded: count(DownloadState::is_downloaded),
        exhausted: count(|s| matches!(s, DownloadState::Exhausted { .. })),
        unattempted: count(|s| s.label() == "unattempted"),
        metadata_unavailable: papers.iter().filter(|p| !p.metadata_available).count(),
        manifest: reports.manifest,
        bibliography: reports.bibliography,
        started_at,
        finished_at: Local::now(),
        papers,
    };

    info!(
        total = summary.total,
        downloaded = summary.downloaded,
        exhausted = summary.exhausted,
        unattempted = summary.unattempted,
        metadata_unavailable = summary.metadata_unavailable,
        elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
        "Run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{PageRange, Query};
    use tempfile::TempDir;

    #[test]
    fn test_default_request() {
        let request = RunRequest::new(Source::Identifiers(vec![]), "out");
        assert_eq!(request.page_capacity, 10);
        assert!(request.validate().is_ok());
        let names: Vec<_> = request.provider_list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["scidb", "scihub", "origin"]);
    }

    #[test]
    fn test_mirror_overrides_apply_to_default_order() {
        let mut request = RunRequest::new(Source::Identifiers(vec![]), "out");
        request.scihub_mirror = Some("https://sci-hub.ru".to_string());
        let providers = request.provider_list();
        assert_eq!(providers[1].base_url.as_deref(), Some("https://sci-hub.ru"));
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let range = PageRange::new(1, 1).expect("valid range");
        let request = RunRequest::new(Source::Search(Query::text("  ", range)), "out");
        assert!(matches!(request.validate(), Err(PaperbotError::Validation(_))));

        let mut request = RunRequest::new(Source::Search(Query::text("rust", range)), "out");
        request.page_capacity = 11;
        assert!(request.validate().is_err());

        let mut request = RunRequest::new(Source::Identifiers(vec![]), "out");
        request.retrieval_cap = Some(usize::MAX);
        assert!(matches!(request.validate(), Err(PaperbotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_policy_error_aborts_before_touching_destination() {
        let dir = TempDir::new().expect("temp dir");
        let destination = dir.path().join("never-created");
        let mut request = RunRequest::new(Source::Identifiers(vec!["10.1/aaa".to_string()]), &destination);
        request.policy.limit = Some(3);

        let result = run(request).await;
        assert!(matches!(result, Err(PaperbotError::Policy(_))));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_empty_provider_list_is_config_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut request = RunRequest::new(Source::Identifiers(vec![]), dir.path().join("out"));
        request.providers = Some(vec![]);
        assert!(matches!(run(request).await, Err(PaperbotError::Config(_))));
    }
}
