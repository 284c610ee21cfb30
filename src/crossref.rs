//! Crossref API client: identifier resolution and title-based enrichment.
//!
//! Lookups never fail a batch. A DOI that cannot be resolved becomes a
//! placeholder record, and a title without a confident match leaves the
//! scraped record untouched.

use crate::config::RunConfig;
use crate::error::{PaperbotError, Result};
use crate::paper::Paper;
use futures::future::join_all;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Minimum normalized similarity between a scraped title and a Crossref title
const TITLE_MATCH_THRESHOLD: f64 = 0.8;

/// Crossref API client with rate limiting and concurrency control
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
}

impl CrossrefClient {
    /// Create a client sharing the run's HTTP client and worker limit.
    pub fn new(client: reqwest::Client, config: &RunConfig) -> Self {
        Self {
            client,
            base_url: config.crossref_url.trim_end_matches('/').to_string(),
            mailto: config.mailto.clone(),
            semaphore: Arc::new(Semaphore::new(config.workers.max(1))),
            max_retries: 3,
        }
    }

    /// Resolve one identifier into a record, or a placeholder.
    pub async fn resolve_doi(&self, identifier: &str) -> Paper {
        let doi = normalize_doi(identifier);
        if !is_doi(&doi) {
            warn!(identifier, "Not a DOI, keeping placeholder");
            return Paper::placeholder(identifier);
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return Paper::placeholder(&doi);
        };

        let url = format!("{}/works/{}", self.base_url, doi);
        let query = [("mailto", self.mailto.as_str())];
        match self.get_json::<WorkResponse>(&url, &query).await {
            Ok(Some(response)) => match paper_from_item(response.message) {
                Some(mut paper) => {
                    if !paper.has_doi() {
                        paper.doi = Some(doi);
                    }
                    debug!(doi = ?paper.doi, title = %paper.title, "Resolved DOI");
                    paper
                }
                None => {
                    warn!(doi = %doi, "Crossref record has no title");
                    Paper::placeholder(&doi)
                }
            },
            Ok(None) => {
                warn!(doi = %doi, "DOI not found");
                Paper::placeholder(&doi)
            }
            Err(e) => {
                warn!(doi = %doi, error = %e, "DOI lookup failed");
                Paper::placeholder(&doi)
            }
        }
    }

    /// Resolve identifiers concurrently; output keeps input order.
    pub async fn resolve_identifiers(&self, identifiers: &[String]) -> Vec<Paper> {
        info!(count = identifiers.len(), "Resolving identifiers");
        let papers = join_all(identifiers.iter().map(|id| self.resolve_doi(id))).await;
        let resolved = papers.iter().filter(|p| p.metadata_available).count();
        info!(
            total = identifiers.len(),
            resolved,
            placeholders = identifiers.len() - resolved,
            "Identifier resolution complete"
        );
        papers
    }

    /// Lookup the best Crossref match for a title.
    ///
    /// Returns `None` when nothing matches closely enough.
    pub async fn lookup_by_title(&self, title: &str) -> Option<Paper> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }

        let _permit = self.semaphore.acquire().await.ok()?;

        let url = format!("{}/works", self.base_url);
        let query = [
            ("query.bibliographic", title),
            ("rows", "1"),
            ("mailto", self.mailto.as_str()),
        ];
        let response = match self.get_json::<SearchResponse>(&url, &query).await {
            Ok(response) => response?,
            Err(e) => {
                debug!(title = short(title), error = %e, "Title lookup failed");
                return None;
            }
        };

        let candidate = paper_from_item(response.message.items.into_iter().next()?)?;
        let score = title_similarity(title, &candidate.title);
        if score < TITLE_MATCH_THRESHOLD {
            debug!(title = short(title), score, "Crossref match too weak");
            return None;
        }
        Some(candidate)
    }

    /// Fill missing DOI, venue, year and authors of scraped records.
    ///
    /// Citation counts stay as scraped: a missing count ranks below zero.
    pub async fn enrich(&self, papers: &mut [Paper]) {
        info!(count = papers.len(), "Starting batch Crossref enrichment");

        let titles: Vec<String> = papers.iter().map(|p| p.title.clone()).collect();
        let matches = join_all(titles.iter().map(|t| self.lookup_by_title(t))).await;

        let mut matched = 0;
        for (paper, found) in papers.iter_mut().zip(matches) {
            let Some(found) = found else { continue };
            matched += 1;
            if !paper.has_doi() {
                paper.doi = found.doi;
            }
            if paper.venue.is_none() {
                paper.venue = found.venue;
            }
            if paper.year.is_none() {
                paper.year = found.year;
            }
            if paper.authors.is_empty() {
                paper.authors = found.authors;
            }
        }

        info!(total = papers.len(), matched, "Batch enrichment complete");
    }

    /// GET with exponential backoff on rate limiting. `Ok(None)` means 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let mut backoff = Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            let response = match self.client.get(url).query(query).send().await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url, attempt = attempt + 1, error = %e, "Request failed");
                    last_error = Some(PaperbotError::Network(e));
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(url, attempt = attempt + 1, wait_ms = backoff.as_millis() as u64, "Rate limited, waiting");
                last_error = Some(PaperbotError::Parse(format!("rate limited: {}", status)));
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }
            if !status.is_success() {
                return Err(PaperbotError::Parse(format!("Crossref API error: {}", status)));
            }

            let body = response.text().await?;
            return Ok(Some(serde_json::from_str(&body)?));
        }

        Err(last_error.unwrap_or_else(|| PaperbotError::Parse("no attempt made".to_string())))
    }
}

fn short(title: &str) -> &str {
    match title.char_indices().nth(30) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

/// Strip resolver prefixes and whitespace from an identifier.
pub fn normalize_doi(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let lower = trimmed.to_ascii_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"] {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Whether an identifier is shaped like a DOI (`10.<digits>/<suffix>`).
pub fn is_doi(identifier: &str) -> bool {
    Regex::new(r"^10\.\d+/\S+$")
        .map(|re| re.is_match(identifier))
        .unwrap_or(false)
}

/// Normalized Levenshtein similarity of two titles, case and spacing ignored.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let norm = |s: &str| {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    };
    strsim::normalized_levenshtein(&norm(a), &norm(b))
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: CrossrefItem,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(rename = "DOI", default)]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(default)]
    published: Option<CrossrefDate>,
    #[serde(default)]
    issued: Option<CrossrefDate>,
    #[serde(rename = "is-referenced-by-count", default)]
    referenced_by: Option<u64>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(default)]
    link: Vec<CrossrefLink>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: String,
    #[serde(default)]
    family: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "content-type", default)]
    content_type: String,
}

/// Convert a Crossref item into a record. `None` if it has no title.
fn paper_from_item(item: CrossrefItem) -> Option<Paper> {
    let title = item.title.into_iter().next()?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let authors = item
        .author
        .iter()
        .map(|a| {
            if a.name.is_empty() {
                format!("{} {}", a.given, a.family).trim().to_string()
            } else {
                a.name.trim().to_string()
            }
        })
        .filter(|s| !s.is_empty())
        .collect();

    let year = item
        .published
        .as_ref()
        .and_then(CrossrefDate::year)
        .or_else(|| item.issued.as_ref().and_then(CrossrefDate::year));

    let venue = item
        .container_title
        .into_iter()
        .next()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let mut source_urls: Vec<String> = item
        .link
        .into_iter()
        .filter(|l| l.content_type == "application/pdf")
        .map(|l| l.url)
        .collect();
    source_urls.extend(item.url);

    let doi = Some(item.doi.trim().to_string()).filter(|d| !d.is_empty());

    Some(Paper {
        title,
        authors,
        year,
        venue,
        doi,
        citations: item.referenced_by,
        snippet: item
            .abstract_text
            .map(|s| strip_html_tags(&s))
            .unwrap_or_default(),
        source_urls,
        metadata_available: true,
        ..Default::default()
    })
}

/// Strip HTML tags from text
fn strip_html_tags(text: &str) -> String {
    match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, "").trim().to_string(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CrossrefClient {
        let config = RunConfig {
            crossref_url: server.uri(),
            ..Default::default()
        };
        CrossrefClient::new(reqwest::Client::new(), &config)
    }

    fn work_json(doi: &str, title: &str) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "message": {
                "DOI": doi,
                "title": [title],
                "author": [{"given": "John", "family": "Doe"}, {"name": "ACME Consortium"}],
                "container-title": ["Nature"],
                "published": {"date-parts": [[2021, 3]]},
                "is-referenced-by-count": 17,
                "URL": format!("https://doi.org/{doi}"),
                "link": [{"URL": "https://pub.example/paper.pdf", "content-type": "application/pdf"}],
                "abstract": "<jats:p>Short abstract</jats:p>"
            }
        })
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html_tags("No tags"), "No tags");
        assert_eq!(
            strip_html_tags("<b>Bold</b> and <i>italic</i>"),
            "Bold and italic"
        );
    }

    #[test]
    fn test_normalize_and_validate_doi() {
        assert_eq!(normalize_doi(" https://doi.org/10.1/aaa "), "10.1/aaa");
        assert_eq!(normalize_doi("DOI:10.1000/xyz"), "10.1000/xyz");
        assert!(is_doi("10.1/aaa"));
        assert!(is_doi("10.1038/nature14539"));
        assert!(!is_doi("bad-doi"));
        assert!(!is_doi("10.abc/x"));
        assert!(!is_doi("10.1/"));
    }

    #[test]
    fn test_title_similarity() {
        assert!(title_similarity("Deep  Learning", "deep learning") > 0.99);
        assert!(title_similarity("Deep learning", "Shallow cooking") < TITLE_MATCH_THRESHOLD);
    }

    #[test]
    fn test_paper_from_item_without_title_is_none() {
        let item: CrossrefItem =
            serde_json::from_value(serde_json::json!({"DOI": "10.1/x", "title": []}))
                .expect("valid item");
        assert!(paper_from_item(item).is_none());
    }

    #[tokio::test]
    async fn test_resolve_doi_full_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/aaa"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json("10.1/aaa", "A Title")))
            .mount(&server)
            .await;

        let paper = client_for(&server).resolve_doi("10.1/aaa").await;
        assert!(paper.metadata_available);
        assert_eq!(paper.title, "A Title");
        assert_eq!(paper.doi.as_deref(), Some("10.1/aaa"));
        assert_eq!(paper.authors, vec!["John Doe".to_string(), "ACME Consortium".to_string()]);
        assert_eq!(paper.year, Some(2021));
        assert_eq!(paper.venue.as_deref(), Some("Nature"));
        assert_eq!(paper.citations, Some(17));
        assert_eq!(paper.snippet, "Short abstract");
        assert_eq!(
            paper.source_urls,
            vec![
                "https://pub.example/paper.pdf".to_string(),
                "https://doi.org/10.1/aaa".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_not_found_and_malformed_become_placeholders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        for doi in ["10.1/missing", "10.1/garbled"] {
            let paper = client.resolve_doi(doi).await;
            assert!(!paper.metadata_available, "{doi} should be a placeholder");
            assert_eq!(paper.doi.as_deref(), Some(doi));
            assert!(paper.title.is_empty());
        }
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_skips_network_for_bad_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1/aaa"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json("10.1/aaa", "A Title")))
            .expect(1)
            .mount(&server)
            .await;

        let ids = vec!["10.1/aaa".to_string(), "bad-doi".to_string()];
        let papers = client_for(&server).resolve_identifiers(&ids).await;
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].title, "A Title");
        assert!(!papers[1].metadata_available);
        assert_eq!(papers[1].doi.as_deref(), Some("bad-doi"));
    }

    #[tokio::test]
    async fn test_enrich_fills_only_missing_fields() {
        let server = MockServer::start().await;
        let search = serde_json::json!({
            "message": {"items": [work_json("10.5/deep", "Deep Nets")["message"].clone()]}
        });
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("query.bibliographic", "Deep Nets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("query.bibliographic", "Unrelated"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"items": [work_json("10.5/other", "Something else entirely")["message"].clone()]}
            })))
            .mount(&server)
            .await;

        let mut papers = vec![
            Paper {
                title: "Deep Nets".to_string(),
                year: Some(2019),
                metadata_available: true,
                ..Default::default()
            },
            Paper {
                title: "Unrelated".to_string(),
                metadata_available: true,
                ..Default::default()
            },
        ];
        client_for(&server).enrich(&mut papers).await;

        assert_eq!(papers[0].doi.as_deref(), Some("10.5/deep"));
        assert_eq!(papers[0].year, Some(2019), "scraped year must win");
        assert_eq!(papers[0].venue.as_deref(), Some("Nature"));
        assert!(papers[0].citations.is_none(), "uncited row must stay uncited");
        assert!(papers[1].doi.is_none());
    }
}
