//! paperbot - download scientific papers from a query or a DOI list
//!
//! ## Usage
//!
//! ```bash
//! paperbot --query "machine learning" --scholar-pages 1-3 --dwn-dir ./papers
//! paperbot --doi-file dois.txt --dwn-dir ./papers --use-doi-as-filename
//! paperbot --cites 1234567890 --scholar-pages 2 --max-dwn-cites 10 --dwn-dir ./papers
//! ```

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use paperbot::config::RunConfig;
use paperbot::filter::{load_venue_list, FilterPolicy};
use paperbot::pipeline::{self, Restrict, RunRequest};
use paperbot::query::{parse_identifier_list, PageRange, Query, Source};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Download scientific papers through fallback content providers
#[derive(Parser)]
#[command(name = "paperbot")]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["query", "cites", "doi", "doi_file"])
))]
struct Cli {
    /// Search query, or a full Google Scholar results URL
    #[arg(long)]
    query: Option<String>,

    /// Google Scholar id of a paper; searches the works citing it
    #[arg(long)]
    cites: Option<String>,

    /// Single DOI to download
    #[arg(long)]
    doi: Option<String>,

    /// File with one DOI per line
    #[arg(long)]
    doi_file: Option<PathBuf>,

    /// Pages to search: "N" for pages 1..=N, or "A-B"
    #[arg(long, default_value = "1")]
    scholar_pages: String,

    /// Results kept per search page (1-10)
    #[arg(long, default_value_t = 10)]
    scholar_results: usize,

    /// Output directory
    #[arg(long, default_value = "./papers")]
    dwn_dir: PathBuf,

    /// Drop papers published before this year
    #[arg(long)]
    min_year: Option<i32>,

    /// Keep the N most recent papers
    #[arg(long, conflicts_with = "max_dwn_cites")]
    max_dwn_year: Option<usize>,

    /// Keep the N most cited papers
    #[arg(long)]
    max_dwn_cites: Option<usize>,

    /// Venue allow-list (";"-separated, columns journal_list;include_list)
    #[arg(long)]
    journal_filter: Option<PathBuf>,

    /// Similarity a venue needs to match the allow-list (0-1)
    #[arg(long, default_value_t = paperbot::filter::DEFAULT_VENUE_THRESHOLD)]
    venue_threshold: f64,

    /// 0: bibliography only, no downloads; 1: downloads only, no bibliography
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    restrict: Option<u8>,

    /// Sci-Hub mirror base URL
    #[arg(long)]
    scihub_mirror: Option<String>,

    /// Anna's Archive SciDB base URL
    #[arg(long)]
    annas_archive_mirror: Option<String>,

    /// Google Scholar mirror base URL
    #[arg(long)]
    scholar_mirror: Option<String>,

    /// Skip results whose title or snippet contains any of these (comma-separated)
    #[arg(long, value_delimiter = ',')]
    skip_words: Vec<String>,

    /// Name files after the DOI instead of the title
    #[arg(long)]
    use_doi_as_filename: bool,

    /// Stop after this many successful downloads
    #[arg(long)]
    max_downloads: Option<usize>,

    /// Papers downloaded concurrently
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Proxy URL (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    proxy: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let request = build_request(cli)?;
    let destination = request.destination.clone();

    match pipeline::run(request).await {
        Ok(summary) => {
            println!(
                "\nDone: {} papers, {} downloaded, {} failed, {} not attempted",
                summary.total, summary.downloaded, summary.exhausted, summary.unattempted
            );
            println!("Manifest: {}", summary.manifest.display());
            if let Some(bib) = &summary.bibliography {
                println!("Bibliography: {}", bib.display());
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, destination = %destination.display(), "Run aborted");
            Err(e).context("Run failed")
        }
    }
}

// ============================================================================
// Request Assembly
// ============================================================================

fn build_request(cli: Cli) -> Result<RunRequest> {
    let pages = PageRange::parse(&cli.scholar_pages).context("Invalid --scholar-pages format")?;

    let source = if let Some(query) = cli.query {
        Source::Search(Query::text(query, pages))
    } else if let Some(id) = cli.cites {
        Source::Search(Query::cited_by(id, pages))
    } else if let Some(doi) = cli.doi {
        Source::Identifiers(vec![doi])
    } else if let Some(path) = cli.doi_file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read DOI file {}", path.display()))?;
        let ids = parse_identifier_list(&content);
        info!(path = %path.display(), count = ids.len(), "Loaded DOI list");
        Source::Identifiers(ids)
    } else {
        anyhow::bail!("one of --query, --cites, --doi or --doi-file is required");
    };

    let mut policy = FilterPolicy {
        min_year: cli.min_year,
        venue_threshold: cli.venue_threshold,
        ..Default::default()
    }
    .with_limits(cli.max_dwn_year, cli.max_dwn_cites)?;
    if let Some(path) = &cli.journal_filter {
        policy.allowed_venues = Some(load_venue_list(path).context("Invalid --journal-filter file")?);
    }

    let mut network = RunConfig {
        request_timeout: Duration::from_secs(cli.timeout),
        proxy: cli.proxy,
        workers: cli.workers,
        ..Default::default()
    };
    if let Some(mirror) = cli.scholar_mirror {
        network.scholar_url = mirror;
    }

    let restrict = cli.restrict.map(|r| match r {
        0 => Restrict::BibtexOnly,
        _ => Restrict::PdfOnly,
    });

    let mut request = RunRequest::new(source, cli.dwn_dir);
    request.policy = policy;
    request.scidb_mirror = cli.annas_archive_mirror;
    request.scihub_mirror = cli.scihub_mirror;
    request.retrieval_cap = cli.max_downloads;
    request.use_doi_as_filename = cli.use_doi_as_filename;
    request.skip_words = cli.skip_words;
    request.page_capacity = cli.scholar_results;
    request.restrict = restrict;
    request.network = network;
    Ok(request)
}
