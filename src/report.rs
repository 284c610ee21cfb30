//! Manifest and bibliography output.
//!
//! Both files follow the final record order and contain nothing run-specific,
//! so identical inputs give byte-identical reports.

use crate::error::{PaperbotError, Result};
use crate::paper::{DownloadState, Paper};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "result.csv";
pub const BIBLIOGRAPHY_FILE: &str = "bibtex.bib";

const MANIFEST_COLUMNS: &[&str] = &[
    "title",
    "authors",
    "year",
    "venue",
    "doi",
    "citations",
    "metadata",
    "outcome",
    "provider",
    "attempts",
    "path",
];

/// Files written by [`write_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub manifest: PathBuf,
    pub bibliography: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ManifestRow<'a> {
    title: &'a str,
    authors: String,
    year: Option<i32>,
    venue: Option<&'a str>,
    doi: Option<&'a str>,
    citations: Option<u64>,
    metadata: &'static str,
    outcome: &'static str,
    provider: Option<&'a str>,
    attempts: String,
    path: Option<String>,
}

impl<'a> From<&'a Paper> for ManifestRow<'a> {
    fn from(paper: &'a Paper) -> Self {
        let provider = match &paper.state {
            DownloadState::Downloaded { provider, .. } => Some(provider.as_str()),
            _ => None,
        };
        Self {
            title: &paper.title,
            authors: paper.authors.join("; "),
            year: paper.year,
            venue: paper.venue.as_deref(),
            doi: paper.doi.as_deref(),
            citations: paper.citations,
            metadata: if paper.metadata_available { "ok" } else { "unavailable" },
            outcome: paper.state.label(),
            provider,
            attempts: paper
                .state
                .attempts()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | "),
            path: paper.local_path().map(|p| p.display().to_string()),
        }
    }
}

/// Write the manifest and, unless disabled, the bibliography into `dir`.
pub fn write_reports(papers: &[Paper], dir: &Path, with_bibliography: bool) -> Result<ReportPaths> {
    let manifest = dir.join(MANIFEST_FILE);
    write_manifest(papers, &manifest)?;

    let bibliography = if with_bibliography {
        let path = dir.join(BIBLIOGRAPHY_FILE);
        write_bibliography(papers, &path)?;
        Some(path)
    } else {
        None
    };

    Ok(ReportPaths {
        manifest,
        bibliography,
    })
}

/// One row per paper, header always present.
pub fn write_manifest(papers: &[Paper], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| PaperbotError::destination(path, e))?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    wtr.write_record(MANIFEST_COLUMNS)?;
    for paper in papers {
        wtr.serialize(ManifestRow::from(paper))?;
    }
    wtr.flush().map_err(|e| PaperbotError::destination(path, e))?;

    info!(path = %path.display(), rows = papers.len(), "Saved manifest");
    Ok(())
}

pub fn write_bibliography(papers: &[Paper], path: &Path) -> Result<()> {
    let rendered = render_bibliography(papers);
    std::fs::write(path, &rendered).map_err(|e| PaperbotError::destination(path, e))?;
    info!(path = %path.display(), "Saved bibliography");
    Ok(())
}

/// Whether a paper has enough to form an entry.
pub fn has_bib_entry(paper: &Paper) -> bool {
    !paper.title.trim().is_empty() || (paper.state.is_downloaded() && paper.has_doi())
}

/// Render every eligible paper as a BibTeX entry.
pub fn render_bibliography(papers: &[Paper]) -> String {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = String::new();

    for paper in papers.iter().filter(|p| has_bib_entry(p)) {
        let key = unique_key(&cite_key(paper), &mut used);
        let kind = if paper.venue.is_some() { "article" } else { "misc" };

        let mut fields: Vec<(&str, String)> = Vec::new();
        if !paper.title.trim().is_empty() {
            fields.push(("title", paper.title.clone()));
        }
        if !paper.authors.is_empty() {
            fields.push(("author", paper.authors.join(" and ")));
        }
        if let Some(year) = paper.year {
            fields.push(("year", year.to_string()));
        }
        if let Some(venue) = &paper.venue {
            fields.push(("journal", venue.clone()));
        }
        if let Some(doi) = paper.doi.as_deref().filter(|_| paper.has_doi()) {
            fields.push(("doi", doi.to_string()));
        }
        if let Some(url) = paper.best_url() {
            fields.push(("url", url.to_string()));
        }

        let _ = writeln!(out, "@{kind}{{{key},");
        for (name, value) in &fields {
            let _ = writeln!(out, "  {name} = {{{}}},", escape(value));
        }
        out.push_str("}\n\n");
    }
    out
}

/// Surname + year + first title word, lower-case ASCII.
fn cite_key(paper: &Paper) -> String {
    let surname = paper
        .authors
        .first()
        .and_then(|a| a.split_whitespace().last())
        .map(ascii_lower)
        .unwrap_or_default();
    let year = paper.year.map(|y| y.to_string()).unwrap_or_default();
    let word = paper
        .title
        .split_whitespace()
        .map(ascii_lower)
        .find(|w| !w.is_empty())
        .unwrap_or_default();

    let key = format!("{surname}{year}{word}");
    if key.is_empty() {
        "paper".to_string()
    } else {
        key
    }
}

fn unique_key(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 0usize;
    loop {
        let suffix = match u8::try_from(n) {
            Ok(i) if i < 26 => char::from(b'a' + i).to_string(),
            _ => n.to_string(),
        };
        let candidate = format!("{base}{suffix}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn ascii_lower(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn escape(value: &str) -> String {
    value.replace('{', "\\{").replace('}', "\\}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{Attempt, ProviderFailure};
    use tempfile::TempDir;

    fn full(title: &str) -> Paper {
        Paper {
            title: title.to_string(),
            authors: vec!["A Muller".to_string(), "B Jones".to_string()],
            year: Some(2021),
            venue: Some("Nature".to_string()),
            doi: Some("10.1/aaa".to_string()),
            citations: Some(7),
            metadata_available: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_manifest_has_one_row_per_paper() {
        let dir = TempDir::new().expect("temp dir");
        let mut downloaded = full("Deep {Nets}");
        downloaded.state = DownloadState::Downloaded {
            provider: "scihub".to_string(),
            path: dir.path().join("Deep {Nets}.pdf"),
            attempts: vec![
                Attempt::failed("scidb", ProviderFailure::NotFound),
                Attempt::succeeded("scihub"),
            ],
        };
        let exhausted = Paper {
            state: DownloadState::Exhausted {
                attempts: vec![Attempt::failed("origin", ProviderFailure::Timeout)],
            },
            ..Paper::placeholder("bad-doi")
        };
        let papers = vec![downloaded, exhausted, full("Never Tried")];

        let paths = write_reports(&papers, dir.path(), true).expect("reports written");

        let mut rdr = csv::Reader::from_path(&paths.manifest).expect("manifest");
        let headers = rdr.headers().expect("headers").clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), MANIFEST_COLUMNS);
        let rows: Vec<csv::StringRecord> = rdr.records().collect::<std::result::Result<_, _>>().expect("rows");
        assert_eq!(rows.len(), 3);

        assert_eq!(&rows[0][1], "A Muller; B Jones");
        assert_eq!(&rows[0][7], "downloaded");
        assert_eq!(&rows[0][8], "scihub");
        assert_eq!(&rows[0][9], "scidb: not found | scihub: ok");

        assert_eq!(&rows[1][0], "");
        assert_eq!(&rows[1][2], "");
        assert_eq!(&rows[1][4], "bad-doi");
        assert_eq!(&rows[1][6], "unavailable");
        assert_eq!(&rows[1][7], "exhausted");
        assert_eq!(&rows[1][9], "origin: timeout");

        assert_eq!(&rows[2][7], "unattempted");
        assert_eq!(&rows[2][10], "");

        assert!(paths.bibliography.expect("bib path").exists());
    }

    #[test]
    fn test_empty_manifest_keeps_header() {
        let dir = TempDir::new().expect("temp dir");
        let paths = write_reports(&[], dir.path(), false).expect("reports written");
        let text = std::fs::read_to_string(&paths.manifest).expect("manifest");
        assert_eq!(text.trim_end(), MANIFEST_COLUMNS.join(","));
        assert!(paths.bibliography.is_none());
        assert!(!dir.path().join(BIBLIOGRAPHY_FILE).exists());
    }

    #[test]
    fn test_bib_entries_and_keys() {
        let mut misc = full("The Second Paper");
        misc.venue = None;
        let bib = render_bibliography(&[full("Deep {Nets}"), full("Deep again"), misc]);

        assert!(bib.contains("@article{muller2021deep,"));
        assert!(bib.contains("@article{muller2021deepa,"));
        assert!(bib.contains("@misc{muller2021the,"));
        assert!(bib.contains("  title = {Deep \\{Nets\\}},"));
        assert!(bib.contains("  author = {A Muller and B Jones},"));
        assert!(bib.contains("  journal = {Nature},"));
    }

    #[test]
    fn test_bib_skips_records_without_title_or_downloaded_doi() {
        let placeholder = Paper::placeholder("10.1/zzz");
        assert!(!has_bib_entry(&placeholder));
        assert_eq!(render_bibliography(&[placeholder.clone()]), "");

        let downloaded = Paper {
            state: DownloadState::Downloaded {
                provider: "scihub".to_string(),
                path: PathBuf::from("10.1_zzz.pdf"),
                attempts: vec![Attempt::succeeded("scihub")],
            },
            ..placeholder
        };
        let bib = render_bibliography(&[downloaded]);
        assert!(bib.starts_with("@misc{paper,"));
        assert!(bib.contains("  doi = {10.1/zzz},"));
    }

    #[test]
    fn test_reports_are_deterministic() {
        let papers = vec![full("One"), full("Two"), Paper::placeholder("x")];
        let a = TempDir::new().expect("temp dir");
        let b = TempDir::new().expect("temp dir");
        write_reports(&papers, a.path(), true).expect("reports written");
        write_reports(&papers, b.path(), true).expect("reports written");
        for name in [MANIFEST_FILE, BIBLIOGRAPHY_FILE] {
            assert_eq!(
                std::fs::read(a.path().join(name)).expect("first"),
                std::fs::read(b.path().join(name)).expect("second")
            );
        }
    }
}
