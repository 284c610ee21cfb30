//! Content providers tried when downloading a paper.

use crate::error::{OptionExt, PaperbotError, Result};
use crate::paper::Paper;
use scraper::{Html, Selector};
use url::Url;

/// Anna's Archive SciDB mirror
pub const DEFAULT_SCIDB_URL: &str = "https://annas-archive.se/scidb";

/// Sci-Hub mirror
pub const DEFAULT_SCIHUB_URL: &str = "https://sci-hub.se";

/// How a provider turns a paper into document bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// The target URL serves the document itself
    Direct,
    /// The target URL is a landing page holding a link to the document
    Mirror,
}

/// One download source. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Endpoint the DOI (or paper URL) is appended to. `None` means the
    /// paper's own first discovered link.
    pub base_url: Option<String>,
    /// Higher is tried first
    pub priority: u32,
    pub kind: ProviderKind,
}

impl ProviderDescriptor {
    pub fn mirror(name: &str, base_url: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            base_url: Some(base_url.to_string()),
            priority,
            kind: ProviderKind::Mirror,
        }
    }

    pub fn direct(name: &str, base_url: Option<&str>, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.map(str::to_string),
            priority,
            kind: ProviderKind::Direct,
        }
    }

    /// The URL to request for `paper`, or `None` if it offers nothing usable.
    pub fn target_url(&self, paper: &Paper) -> Option<String> {
        match &self.base_url {
            Some(base) => {
                let key = if paper.has_doi() {
                    paper.doi.as_deref()
                } else {
                    paper.best_url()
                };
                let key = key?;
                Some(format!("{}/{}", base.trim_end_matches('/'), key.trim()))
            }
            None => paper.best_url().map(str::to_string),
        }
    }
}

/// Fallback order used when a run configures no providers.
pub fn default_providers(scidb_url: Option<&str>, scihub_url: Option<&str>) -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::mirror("scidb", scidb_url.unwrap_or(DEFAULT_SCIDB_URL), 30),
        ProviderDescriptor::mirror("scihub", scihub_url.unwrap_or(DEFAULT_SCIHUB_URL), 20),
        ProviderDescriptor::direct("origin", None, 10),
    ]
}

/// Sort by descending priority, keeping configuration order on ties.
pub fn ordered(mut providers: Vec<ProviderDescriptor>) -> Result<Vec<ProviderDescriptor>> {
    if providers.is_empty() {
        return Err(PaperbotError::Config("no content providers configured".to_string()));
    }
    for p in &providers {
        if let Some(base) = &p.base_url {
            Url::parse(base).map_err(|e| {
                PaperbotError::Config(format!("provider '{}' has invalid URL '{}': {}", p.name, base, e))
            })?;
        }
    }
    providers.sort_by_key(|p| std::cmp::Reverse(p.priority));
    Ok(providers)
}

/// Find the document link on a mirror landing page.
///
/// Candidates, in order: `embed`, `iframe`, `citation_pdf_url` meta tag,
/// then the first anchor pointing at a `.pdf`.
pub fn extract_document_link(html: &str, page_url: &Url) -> Result<Url> {
    let document = Html::parse_document(html);

    let attr_candidates = [
        ("embed[src]", "src"),
        ("iframe[src]", "src"),
        ("meta[name=citation_pdf_url]", "content"),
    ];
    for (css, attr) in attr_candidates {
        let sel = Selector::parse(css).map_err(|e| PaperbotError::Parse(e.to_string()))?;
        if let Some(link) = document
            .select(&sel)
            .filter_map(|e| e.value().attr(attr))
            .find(|v| !v.trim().is_empty())
        {
            return absolutize(link, page_url);
        }
    }

    let anchors = Selector::parse("a[href]").map_err(|e| PaperbotError::Parse(e.to_string()))?;
    let link = document
        .select(&anchors)
        .filter_map(|e| e.value().attr("href"))
        .find(|href| href.to_ascii_lowercase().contains(".pdf"))
        .ok_or_parse("landing page has no document link")?;
    absolutize(link, page_url)
}

fn absolutize(link: &str, page_url: &Url) -> Result<Url> {
    let mut url = page_url
        .join(link.trim())
        .map_err(|e| PaperbotError::Parse(format!("bad document link '{}': {}", link, e)))?;
    url.set_fragment(None);
    Ok(url)
}
