//! What a run looks for: a search query over a page range, or a list of
//! identifiers.

use crate::error::{PaperbotError, Result};
use std::ops::RangeInclusive;

/// Search input for the search resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Free-text query (or a full search page URL)
    Text(String),
    /// Works citing this search-backend paper id
    CitedBy(String),
}

/// Highest page a range may reach
pub const MAX_PAGE: u32 = 1000;

/// 1-indexed, inclusive page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    first: u32,
    last: u32,
}

impl PageRange {
    pub fn new(first: u32, last: u32) -> Result<Self> {
        if first == 0 {
            return Err(PaperbotError::Validation(
                "pages are 1-indexed, page 0 does not exist".to_string(),
            ));
        }
        if last > MAX_PAGE {
            return Err(PaperbotError::Validation(format!(
                "page {} is beyond the last searchable page {}",
                last, MAX_PAGE
            )));
        }
        if first > last {
            return Err(PaperbotError::Validation(format!(
                "page range {}-{} is empty",
                first, last
            )));
        }
        Ok(Self { first, last })
    }

    /// Parse `"N"` (pages 1 to N) or `"A-B"` (pages A to B, inclusive).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid =
            || PaperbotError::Validation(format!("invalid page range '{}': expected N or A-B", s));

        match s.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                Self::new(start, end)
            }
            None => {
                let count: u32 = s.parse().map_err(|_| invalid())?;
                Self::new(1, count)
            }
        }
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }
}

/// A search request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryKind,
    pub pages: PageRange,
}

impl Query {
    pub fn text(text: impl Into<String>, pages: PageRange) -> Self {
        Self {
            kind: QueryKind::Text(text.into()),
            pages,
        }
    }

    pub fn cited_by(id: impl Into<String>, pages: PageRange) -> Self {
        Self {
            kind: QueryKind::CitedBy(id.into()),
            pages,
        }
    }
}

/// Where a run's candidate records come from.
#[derive(Debug, Clone)]
pub enum Source {
    Search(Query),
    Identifiers(Vec<String>),
}

/// Read identifiers from a list file: one per line, blank lines ignored.
pub fn parse_identifier_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
