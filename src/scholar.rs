//! Search resolver over Google Scholar style result pages.
//!
//! Pages are requested through a [`PageFetcher`] so the same parser serves
//! plain HTTP and browser-rendered HTML alike.

use crate::config::RunConfig;
use crate::error::{PaperbotError, Result};
use crate::fetcher::PageFetcher;
use crate::paper::Paper;
use crate::query::{Query, QueryKind};
use futures::stream::{self, Stream, StreamExt};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Results the backend serves per page.
pub const BACKEND_PAGE_SIZE: u32 = 10;

/// Per-query search settings.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Rows kept per page, 1..=10
    pub page_capacity: usize,
    /// Rows whose title or snippet contains one of these are dropped
    pub skip_words: Vec<String>,
    /// Forwarded to the backend as the lower year bound
    pub min_year: Option<i32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page_capacity: BACKEND_PAGE_SIZE as usize,
            skip_words: Vec::new(),
            min_year: None,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<()> {
        if self.page_capacity == 0 || self.page_capacity > BACKEND_PAGE_SIZE as usize {
            return Err(PaperbotError::Validation(format!(
                "results per page must be between 1 and {}, got {}",
                BACKEND_PAGE_SIZE, self.page_capacity
            )));
        }
        Ok(())
    }
}

/// Turns a [`Query`] into a lazy sequence of papers.
pub struct ScholarResolver {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
    config: RunConfig,
    options: SearchOptions,
}

impl ScholarResolver {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &RunConfig, options: SearchOptions) -> Self {
        Self {
            fetcher,
            base_url: config.scholar_url.trim_end_matches('/').to_string(),
            config: config.clone(),
            options,
        }
    }

    /// Stream papers page by page. Ends early at the first page that has no
    /// parseable rows, fails to load, or is a bot-detection page.
    pub fn stream<'a>(&'a self, query: &'a Query) -> impl Stream<Item = Paper> + 'a {
        let pages = query.pages.pages();
        stream::unfold((pages, true), move |(mut pages, first)| async move {
            let page = pages.next()?;
            if !first && !self.config.page_delay.1.is_zero() {
                tokio::time::sleep(self.config.jittered_page_delay()).await;
            }
            let papers = self.fetch_page(&query.kind, page).await?;
            Some((stream::iter(papers), (pages, false)))
        })
        .flatten()
    }

    /// Collect the whole sequence.
    pub async fn resolve(&self, query: &Query) -> Vec<Paper> {
        info!(
            query = ?query.kind,
            url = %self.base_url,
            pages = ?query.pages.pages(),
            "Starting search"
        );
        let papers: Vec<Paper> = self.stream(query).collect().await;
        info!(total = papers.len(), "Search complete");
        papers
    }

    /// `None` ends the sequence.
    async fn fetch_page(&self, kind: &QueryKind, page: u32) -> Option<Vec<Paper>> {
        let url = match self.build_page_url(kind, page) {
            Ok(url) => url,
            Err(e) => {
                warn!(page, error = %e, "Cannot build search URL");
                return None;
            }
        };
        debug!(page, url = %url, "Fetching page");

        let html = match self.fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(page, error = %e, "Failed to fetch page, ending search");
                return None;
            }
        };

        if html.contains("Solving the above CAPTCHA") || html.contains("unusual traffic") {
            warn!(page, "CAPTCHA detected, ending search");
            return None;
        }

        let rows = match parse_result_items(&html) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(page, error = %e, "Failed to parse page, ending search");
                return None;
            }
        };
        if rows.is_empty() {
            info!(page, "Page has no results, search exhausted");
            return None;
        }

        let total = rows.len();
        let kept = select_rows(rows, self.options.page_capacity, &self.options.skip_words);
        info!(page, parsed = total, kept = kept.len(), "Parsed results");
        Some(kept)
    }

    /// Build the result page URL for a query kind and 1-indexed page.
    pub fn build_page_url(&self, kind: &QueryKind, page: u32) -> Result<Url> {
        let start = page
            .saturating_sub(1)
            .checked_mul(BACKEND_PAGE_SIZE)
            .ok_or_else(|| PaperbotError::Validation(format!("page {} is out of range", page)))?
            .to_string();

        if let QueryKind::Text(text) = kind {
            if text.starts_with("http://") || text.starts_with("https://") {
                return rewrite_start(text, &start);
            }
        }

        let mut url = Url::parse(&format!("{}/scholar", self.base_url))
            .map_err(|e| PaperbotError::Config(format!("Invalid base URL: {}", e)))?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("hl", "en");
            match kind {
                QueryKind::Text(text) => {
                    params.append_pair("q", text);
                    params.append_pair("as_vis", "1");
                    params.append_pair("as_sdt", "1,5");
                }
                QueryKind::CitedBy(id) => {
                    params.append_pair("as_sdt", "0,5");
                    params.append_pair("cites", id);
                }
            }
            params.append_pair("start", &start);
            if let Some(year) = self.options.min_year {
                params.append_pair("as_ylo", &year.to_string());
            }
        }
        Ok(url)
    }
}

/// Reuse a full search URL given as the query, replacing its `start` offset.
fn rewrite_start(template: &str, start: &str) -> Result<Url> {
    let mut url = Url::parse(template)
        .map_err(|e| PaperbotError::Validation(format!("Invalid search URL: {}", e)))?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| *k != "start")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut params = url.query_pairs_mut();
        params.clear();
        for (k, v) in &pairs {
            params.append_pair(k, v);
        }
        params.append_pair("start", start);
    }
    Ok(url)
}

/// Drop skipped rows, then keep at most `capacity` of the rest.
fn select_rows(rows: Vec<Paper>, capacity: usize, skip_words: &[String]) -> Vec<Paper> {
    let skip: Vec<String> = skip_words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    rows.into_iter()
        .filter(|paper| {
            let title = paper.title.to_lowercase();
            let snippet = paper.snippet.to_lowercase();
            let hit = skip
                .iter()
                .find(|w| title.contains(w.as_str()) || snippet.contains(w.as_str()));
            if let Some(word) = hit {
                debug!(title = %paper.title, word = %word, "Skipping row");
            }
            hit.is_none()
        })
        .take(capacity)
        .collect()
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PaperbotError::Parse(e.to_string()))
}

fn text_of(elem: ElementRef<'_>) -> String {
    elem.text().collect::<String>().trim().to_string()
}

/// Parse a result page into papers with best-effort field extraction.
///
/// Rows without a title are not counted as results.
pub fn parse_result_items(html: &str) -> Result<Vec<Paper>> {
    let document = Html::parse_document(html);

    let item_selector = selector("div.gs_r.gs_or.gs_scl")?;
    let title_selector = selector("h3.gs_rt")?;
    let link_selector = selector("h3.gs_rt a")?;
    let side_link_selector = selector("div.gs_ggs a")?;
    let meta_selector = selector("div.gs_a")?;
    let snippet_selector = selector("div.gs_rs")?;
    let cite_selector = selector("div.gs_fl a")?;

    let year_regex =
        Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| PaperbotError::Parse(e.to_string()))?;
    let cite_regex =
        Regex::new(r"Cited by\s*(\d+)").map_err(|e| PaperbotError::Parse(e.to_string()))?;
    let tag_regex =
        Regex::new(r"^(\[[^\]]*\]\s*)+").map_err(|e| PaperbotError::Parse(e.to_string()))?;

    let mut results = Vec::new();

    for item in document.select(&item_selector) {
        let mut paper = Paper {
            metadata_available: true,
            ..Default::default()
        };

        // Side "[PDF]" link comes first in the DOM
        for link in item.select(&side_link_selector) {
            if let Some(href) = link.value().attr("href") {
                paper.source_urls.push(href.to_string());
            }
        }

        if let Some(link) = item.select(&link_selector).next() {
            paper.title = text_of(link);
            if let Some(href) = link.value().attr("href") {
                if !paper.source_urls.iter().any(|u| u == href) {
                    paper.source_urls.push(href.to_string());
                }
            }
        } else if let Some(title_elem) = item.select(&title_selector).next() {
            paper.title = tag_regex.replace(&text_of(title_elem), "").trim().to_string();
        }

        if let Some(meta_elem) = item.select(&meta_selector).next() {
            let meta_text = meta_elem.text().collect::<String>().replace('\u{a0}', " ");
            let parts: Vec<&str> = meta_text.split(" - ").collect();

            if let Some(byline) = parts.first() {
                paper.authors = byline
                    .split(',')
                    .map(|a| a.trim().trim_end_matches('…').trim())
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect();
            }

            if let Some(venue_year) = parts.get(1) {
                let venue = match year_regex.find(venue_year) {
                    Some(m) => {
                        paper.year = m.as_str().parse().ok();
                        venue_year[..m.start()].trim().trim_end_matches(',').trim()
                    }
                    None => venue_year.trim(),
                };
                if !venue.is_empty() {
                    paper.venue = Some(venue.to_string());
                }
            }
        }

        if let Some(snippet_elem) = item.select(&snippet_selector).next() {
            paper.snippet = text_of(snippet_elem);
        }

        for link in item.select(&cite_selector) {
            let href = link.value().attr("href").unwrap_or("");
            if !href.contains("cites=") {
                continue;
            }
            let text = link.text().collect::<String>();
            if let Some(count) = cite_regex.captures(&text).and_then(|c| c.get(1)) {
                paper.citations = count.as_str().parse().ok();
                break;
            }
        }

        if !paper.title.is_empty() {
            results.push(paper);
        }
    }

    Ok(results)
}
