//! Filter/rank policy applied to resolved papers.
//!
//! Order is fixed: venue allow-list, then minimum year, then sort-and-limit.
//! Steps only remove or reorder records, never change their fields.

use crate::error::{PaperbotError, Result};
use crate::paper::Paper;
use serde::Deserialize;
use std::cmp::Reverse;
use std::path::Path;
use tracing::{debug, info};

/// Default similarity a venue must reach against an allowed name
pub const DEFAULT_VENUE_THRESHOLD: f64 = 0.8;

/// Field used to rank papers before truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitBy {
    /// Newest first
    Year,
    /// Most cited first
    Citations,
}

/// Filter and ranking options for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPolicy {
    /// Normalized venue names; `None` disables venue filtering
    pub allowed_venues: Option<Vec<String>>,
    /// Similarity needed to count as a venue match, 0.0..=1.0
    pub venue_threshold: f64,
    /// Inclusive lower bound on publication year
    pub min_year: Option<i32>,
    /// Keep at most this many papers
    pub limit: Option<usize>,
    /// Ranking used with `limit`
    pub limit_by: Option<LimitBy>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            allowed_venues: None,
            venue_threshold: DEFAULT_VENUE_THRESHOLD,
            min_year: None,
            limit: None,
            limit_by: None,
        }
    }
}

impl FilterPolicy {
    /// Set the limit from the two mutually exclusive "max by" options.
    pub fn with_limits(mut self, by_year: Option<usize>, by_citations: Option<usize>) -> Result<Self> {
        match (by_year, by_citations) {
            (Some(_), Some(_)) => {
                return Err(PaperbotError::Policy(
                    "limit by year and limit by citations cannot both be set".to_string(),
                ))
            }
            (Some(n), None) => {
                self.limit = Some(n);
                self.limit_by = Some(LimitBy::Year);
            }
            (None, Some(n)) => {
                self.limit = Some(n);
                self.limit_by = Some(LimitBy::Citations);
            }
            (None, None) => {}
        }
        Ok(self)
    }

    /// Reject inconsistent combinations before any network activity.
    pub fn validate(&self) -> Result<()> {
        match (self.limit, self.limit_by) {
            (Some(_), None) => {
                return Err(PaperbotError::Policy(
                    "limit is set but no ranking field was chosen".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(PaperbotError::Policy(
                    "ranking field is set but no limit was given".to_string(),
                ))
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.venue_threshold) {
            return Err(PaperbotError::Policy(format!(
                "venue similarity threshold must be within 0..=1, got {}",
                self.venue_threshold
            )));
        }
        Ok(())
    }

    /// Apply the policy. Deterministic, and a no-op on its own output.
    pub fn apply(&self, papers: Vec<Paper>) -> Vec<Paper> {
        let before = papers.len();
        let mut papers = papers;

        if let Some(allowed) = &self.allowed_venues {
            papers.retain(|p| venue_allowed(p.venue.as_deref(), allowed, self.venue_threshold));
            debug!(kept = papers.len(), "Venue filter applied");
        }

        if let Some(min_year) = self.min_year {
            papers.retain(|p| p.year.map_or(true, |y| y >= min_year));
            debug!(kept = papers.len(), min_year, "Year filter applied");
        }

        if let (Some(limit), Some(by)) = (self.limit, self.limit_by) {
            // Stable: ties keep resolver order. `None` sorts below every `Some`.
            match by {
                LimitBy::Year => papers.sort_by_key(|p| Reverse(p.year)),
                LimitBy::Citations => papers.sort_by_key(|p| Reverse(p.citations)),
            }
            papers.truncate(limit);
        }

        info!(before, after = papers.len(), "Filter policy applied");
        papers
    }
}

/// Lower-case and collapse whitespace.
pub fn normalize_venue(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn venue_allowed(venue: Option<&str>, allowed: &[String], threshold: f64) -> bool {
    let Some(venue) = venue.map(normalize_venue).filter(|v| !v.is_empty()) else {
        return false;
    };
    allowed
        .iter()
        .any(|a| strsim::normalized_levenshtein(&venue, a) >= threshold)
}

#[derive(Debug, Deserialize)]
struct VenueRow {
    journal_list: String,
    include_list: u8,
}

/// Parse a `;`-separated venue list with `journal_list` and `include_list`
/// columns. Rows with `include_list = 1` are allowed.
pub fn parse_venue_list<R: std::io::Read>(reader: R) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut venues = Vec::new();
    for row in rdr.deserialize::<VenueRow>() {
        let row = row?;
        if row.include_list == 1 {
            let name = normalize_venue(&row.journal_list);
            if !name.is_empty() {
                venues.push(name);
            }
        }
    }
    Ok(venues)
}

/// Load the venue allow-list file.
pub fn load_venue_list(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path).map_err(|e| {
        PaperbotError::Config(format!("Cannot open venue list {}: {}", path.display(), e))
    })?;
    let venues = parse_venue_list(file)?;
    info!(path = %path.display(), count = venues.len(), "Loaded venue allow-list");
    Ok(venues)
}
