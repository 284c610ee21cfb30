//! Download orchestrator.
//!
//! Papers are processed by a bounded pool of workers. Each worker walks one
//! paper's provider list to completion, strictly in priority order, before it
//! takes the next paper. Results come back in input order.

use crate::error::{PaperbotError, Result};
use crate::paper::{Attempt, DownloadState, Paper, ProviderFailure};
use crate::provider::{self, extract_document_link, ProviderDescriptor, ProviderKind};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};
use url::Url;

/// Smallest body accepted as a document
pub const MIN_DOCUMENT_BYTES: usize = 1024;

const PDF_SIGNATURE: &[u8] = b"%PDF";

/// Longest title-derived file stem, in characters
const MAX_STEM_CHARS: usize = 120;

/// Longest stem in bytes. Leaves room for ` (n)` and `.pdf.part` under the
/// usual 255-byte file name limit.
const MAX_STEM_BYTES: usize = 200;

/// Where and how much to download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Created if absent
    pub destination: PathBuf,
    /// Stop starting new papers once this many are downloaded
    pub retrieval_cap: Option<usize>,
    /// Papers processed concurrently
    pub workers: usize,
}

/// Walks each paper through the provider list.
pub struct Downloader {
    client: reqwest::Client,
    providers: Vec<ProviderDescriptor>,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(
        client: reqwest::Client,
        providers: Vec<ProviderDescriptor>,
        options: DownloadOptions,
    ) -> Result<Self> {
        if options.workers == 0 {
            return Err(PaperbotError::Config(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        validate_retrieval_cap(options.retrieval_cap)?;
        Ok(Self {
            client,
            providers: provider::ordered(providers)?,
            options,
        })
    }

    /// Try to download every paper and record each outcome.
    ///
    /// Provider failures are recorded on the paper. Only local write failures
    /// abort the run.
    pub async fn download_all(&self, papers: Vec<Paper>) -> Result<Vec<Paper>> {
        let destination = &self.options.destination;
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| PaperbotError::destination(destination, e))?;

        info!(
            papers = papers.len(),
            providers = ?self.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            cap = ?self.options.retrieval_cap,
            workers = self.options.workers,
            "Starting downloads"
        );

        let stems = assign_file_stems(&papers);
        let budget = RetrievalBudget::new(self.options.retrieval_cap);
        let budget = &budget;

        let mut done: Vec<(usize, Paper)> = stream::iter(papers.into_iter().zip(stems).enumerate())
            .map(move |(index, (paper, stem))| async move {
                let paper = self.process(paper, &stem, budget).await?;
                Ok::<_, PaperbotError>((index, paper))
            })
            .buffer_unordered(self.options.workers)
            .try_collect()
            .await?;

        done.sort_by_key(|(index, _)| *index);
        let papers: Vec<Paper> = done.into_iter().map(|(_, paper)| paper).collect();

        let downloaded = papers.iter().filter(|p| p.state.is_downloaded()).count();
        let exhausted = papers
            .iter()
            .filter(|p| matches!(p.state, DownloadState::Exhausted { .. }))
            .count();
        info!(
            downloaded,
            exhausted,
            unattempted = papers.len() - downloaded - exhausted,
            "Downloads complete"
        );
        Ok(papers)
    }

    async fn process(&self, mut paper: Paper, stem: &str, budget: &RetrievalBudget) -> Result<Paper> {
        let Some(reservation) = budget.reserve().await else {
            debug!(title = %paper.title, "Retrieval cap reached, not attempting");
            return Ok(paper);
        };

        let state = self.run_providers(&paper, stem).await?;
        match &state {
            DownloadState::Downloaded { provider, path, .. } => {
                reservation.commit();
                info!(title = %paper.title, provider = %provider, path = %path.display(), "Downloaded");
            }
            _ => warn!(title = %paper.title, doi = ?paper.doi, "All providers failed"),
        }
        paper.state = state;
        Ok(paper)
    }

    /// Per-paper state machine. Returns a terminal state.
    async fn run_providers(&self, paper: &Paper, stem: &str) -> Result<DownloadState> {
        let mut state = DownloadState::Pending;
        loop {
            state = match state {
                DownloadState::Pending => DownloadState::Trying {
                    provider: 0,
                    attempts: Vec::new(),
                },
                DownloadState::Trying {
                    provider,
                    mut attempts,
                } => {
                    let Some(desc) = self.providers.get(provider) else {
                        return Ok(DownloadState::Exhausted { attempts });
                    };
                    match self.fetch_document(desc, paper).await {
                        Ok(bytes) => {
                            let path = self.persist(stem, &bytes).await?;
                            attempts.push(Attempt::succeeded(&desc.name));
                            DownloadState::Downloaded {
                                provider: desc.name.clone(),
                                path,
                                attempts,
                            }
                        }
                        Err(failure) => {
                            debug!(title = %paper.title, provider = %desc.name, %failure, "Provider failed");
                            attempts.push(Attempt::failed(&desc.name, failure));
                            DownloadState::Trying {
                                provider: provider + 1,
                                attempts,
                            }
                        }
                    }
                }
                terminal => return Ok(terminal),
            };
        }
    }

    async fn fetch_document(
        &self,
        desc: &ProviderDescriptor,
        paper: &Paper,
    ) -> std::result::Result<Vec<u8>, ProviderFailure> {
        let target = desc.target_url(paper).ok_or(ProviderFailure::NoTarget)?;
        let target = Url::parse(&target).map_err(|_| ProviderFailure::NoTarget)?;

        let bytes = match desc.kind {
            ProviderKind::Direct => self.get(&target).await?,
            ProviderKind::Mirror => {
                let landing = self.get(&target).await?;
                // Some mirrors answer with the document itself
                if verify_document(&landing).is_ok() {
                    return Ok(landing);
                }
                let html = String::from_utf8_lossy(&landing);
                let link = extract_document_link(&html, &target).map_err(|_| ProviderFailure::NoLink)?;
                debug!(provider = %desc.name, link = %link, "Resolved document link");
                self.get(&link).await?
            }
        };

        verify_document(&bytes)?;
        Ok(bytes)
    }

    async fn get(&self, url: &Url) -> std::result::Result<Vec<u8>, ProviderFailure> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderFailure::NotFound);
        }
        if !status.is_success() {
            return Err(ProviderFailure::HttpStatus(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Write to `<stem>.pdf.part`, then rename into place.
    async fn persist(&self, stem: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = &self.options.destination;
        let final_path = dir.join(format!("{stem}.pdf"));
        let part_path = dir.join(format!("{stem}.pdf.part"));

        if let Err(e) = tokio::fs::write(&part_path, bytes).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(PaperbotError::destination(part_path, e));
        }
        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| PaperbotError::destination(&final_path, e))?;
        Ok(final_path)
    }
}

/// Reject caps the budget semaphore cannot hold.
pub fn validate_retrieval_cap(cap: Option<usize>) -> Result<()> {
    match cap {
        Some(cap) if cap > Semaphore::MAX_PERMITS => Err(PaperbotError::Validation(format!(
            "download limit {} exceeds the maximum of {}",
            cap,
            Semaphore::MAX_PERMITS
        ))),
        _ => Ok(()),
    }
}

/// Check size and signature of a fetched body.
pub fn verify_document(bytes: &[u8]) -> std::result::Result<(), ProviderFailure> {
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(ProviderFailure::Malformed("missing PDF signature".to_string()));
    }
    if bytes.len() < MIN_DOCUMENT_BYTES {
        return Err(ProviderFailure::Malformed(format!("only {} bytes", bytes.len())));
    }
    Ok(())
}

/// Shared cap on successful downloads.
///
/// A worker reserves a slot before it starts a paper. A failed paper hands
/// its slot back, a downloaded one consumes it, so no more than `cap` papers
/// are ever downloaded regardless of pool size.
struct RetrievalBudget {
    slots: Option<Semaphore>,
    remaining: AtomicUsize,
}

struct Reservation<'a> {
    budget: &'a RetrievalBudget,
    permit: Option<SemaphorePermit<'a>>,
}

impl RetrievalBudget {
    fn new(cap: Option<usize>) -> Self {
        let slots = cap.map(Semaphore::new);
        if let (Some(sem), Some(0)) = (&slots, cap) {
            sem.close();
        }
        Self {
            slots,
            remaining: AtomicUsize::new(cap.unwrap_or(usize::MAX)),
        }
    }

    /// `None` once the cap has been reached.
    async fn reserve(&self) -> Option<Reservation<'_>> {
        let Some(slots) = &self.slots else {
            return Some(Reservation {
                budget: self,
                permit: None,
            });
        };
        if self.remaining.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let permit = slots.acquire().await.ok()?;
        Some(Reservation {
            budget: self,
            permit: Some(permit),
        })
    }
}

impl Reservation<'_> {
    fn commit(self) {
        let Some(permit) = self.permit else { return };
        permit.forget();
        let left = self.budget.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
        if left == 0 {
            if let Some(slots) = &self.budget.slots {
                slots.close();
            }
        }
    }
}

/// Derive one file stem per paper, in list order, unique within the run.
pub fn assign_file_stems(papers: &[Paper]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    papers
        .iter()
        .enumerate()
        .map(|(index, paper)| {
            let base = file_stem(paper, index);
            let mut candidate = base.clone();
            let mut n = 2;
            while !taken.insert(candidate.to_lowercase()) {
                candidate = format!("{base} ({n})");
                n += 1;
            }
            candidate
        })
        .collect()
}

/// DOI or title, per the paper's flag, falling back to the other.
pub fn file_stem(paper: &Paper, index: usize) -> String {
    let doi = paper
        .doi
        .as_deref()
        .filter(|_| paper.has_doi())
        .map(|d| truncate_stem(&sanitize_file_stem(&d.replace('/', "_")), MAX_STEM_BYTES))
        .filter(|s| !s.is_empty());
    let title = Some(sanitize_file_stem(&paper.title))
        .map(|t| t.chars().take(MAX_STEM_CHARS).collect::<String>())
        .map(|t| truncate_stem(&t, MAX_STEM_BYTES))
        .filter(|s| !s.is_empty());

    let (first, second) = if paper.use_doi_as_filename {
        (doi, title)
    } else {
        (title, doi)
    };
    first
        .or(second)
        .unwrap_or_else(|| format!("paper-{}", index + 1))
}

/// Cut to at most `max_bytes`, on a char boundary.
fn truncate_stem(value: &str, max_bytes: usize) -> String {
    let mut end = value.len().min(max_bytes);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].trim_end_matches(|c| c == '.' || c == ' ').to_string()
}

fn sanitize_file_stem(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    mapped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c| c == '.' || c == ' ')
        .to_string()
}
