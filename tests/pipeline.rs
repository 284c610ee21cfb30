//! Whole-run tests against mock search, Crossref and provider endpoints.

use paperbot::config::RunConfig;
use paperbot::filter::FilterPolicy;
use paperbot::pipeline::{self, Restrict, RunRequest};
use paperbot::provider::ProviderDescriptor;
use paperbot::query::{PageRange, Query, Source};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn result_row(title: &str, year: i32, cites: u64) -> String {
    format!(
        r#"<div class="gs_r gs_or gs_scl"><div class="gs_ri">
             <h3 class="gs_rt"><a href="https://example.org/{n}">{title}</a></h3>
             <div class="gs_a">A Writer, B Writer - Journal of Tests, {year} - example.org</div>
             <div class="gs_rs">snippet</div>
             <div class="gs_fl"><a href="/scholar?cites={n}">Cited by {cites}</a></div>
           </div></div>"#,
        n = cites,
    )
}

fn network_for(server: &MockServer) -> RunConfig {
    RunConfig {
        scholar_url: server.uri(),
        crossref_url: server.uri(),
        page_delay: (Duration::ZERO, Duration::ZERO),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn pdf_body() -> Vec<u8> {
    let mut body = b"%PDF-1.5\n".to_vec();
    body.resize(4096, b'0');
    body
}

fn manifest_rows(path: &std::path::Path) -> Vec<csv::StringRecord> {
    csv::Reader::from_path(path)
        .expect("manifest readable")
        .records()
        .collect::<Result<_, _>>()
        .expect("manifest rows")
}

#[tokio::test]
async fn test_search_filter_and_limit_scenario() {
    let server = MockServer::start().await;

    // 12 results over two pages; three are from 2018
    let rows: Vec<String> = (0..12u64)
        .map(|i| {
            let year = if i % 4 == 1 { 2018 } else { 2021 };
            result_row(&format!("Result {i}"), year, 100 + i * 7 % 13)
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows[..10].join("\n")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .and(query_param("start", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows[10..].join("\n")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": {"items": []}})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let query = Query::text("testing", PageRange::parse("2").expect("valid pages"));
    let mut request = RunRequest::new(Source::Search(query), dir.path());
    request.policy = FilterPolicy {
        min_year: Some(2020),
        ..FilterPolicy::default()
            .with_limits(None, Some(5))
            .expect("valid limits")
    };
    request.restrict = Some(Restrict::BibtexOnly);
    request.network = network_for(&server);

    let summary = pipeline::run(request).await.expect("run succeeds");

    assert_eq!(summary.total, 5);
    assert_eq!(summary.unattempted, 5);
    let citations: Vec<u64> = summary
        .papers
        .iter()
        .map(|p| p.citations.expect("scraped citations"))
        .collect();
    let mut sorted = citations.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(citations, sorted);
    assert!(summary.papers.iter().all(|p| p.year == Some(2021)));

    let rows = manifest_rows(&summary.manifest);
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| &r[7] == "unattempted"));
    assert!(summary.bibliography.expect("bibliography written").exists());
}

#[tokio::test]
async fn test_identifier_scenario_keeps_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/10.1/aaa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {
                "DOI": "10.1/aaa",
                "title": ["Resolved Paper"],
                "author": [{"given": "Ada", "family": "Lovelace"}],
                "container-title": ["Journal of Tests"],
                "issued": {"date-parts": [[2022, 3]]},
                "is-referenced-by-count": 4
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf/10.1/aaa"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf/bad-doi"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let ids = vec!["10.1/aaa".to_string(), "bad-doi".to_string()];
    let mut request = RunRequest::new(Source::Identifiers(ids), dir.path());
    let base = format!("{}/pdf", server.uri());
    request.providers = Some(vec![ProviderDescriptor::direct("mock", Some(base.as_str()), 1)]);
    request.use_doi_as_filename = true;
    request.network = network_for(&server);

    let summary = pipeline::run(request).await.expect("run succeeds");

    assert_eq!(summary.total, 2);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.exhausted, 1);
    assert_eq!(summary.metadata_unavailable, 1);
    assert!(dir.path().join("10.1_aaa.pdf").exists());

    let rows = manifest_rows(&summary.manifest);
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "Resolved Paper");
    assert_eq!(&rows[0][7], "downloaded");
    assert_eq!(&rows[1][0], "");
    assert_eq!(&rows[1][4], "bad-doi");
    assert_eq!(&rows[1][6], "unavailable");
    assert_eq!(&rows[1][9], "mock: not found");

    let bib = std::fs::read_to_string(summary.bibliography.expect("bibliography written"))
        .expect("bibliography readable");
    assert_eq!(bib.matches('@').count(), 1);
    assert!(bib.contains("@article{lovelace2022resolved,"));
}

#[tokio::test]
async fn test_pdf_only_skips_bibliography() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    let mut request = RunRequest::new(Source::Identifiers(vec!["not-a-doi".to_string()]), dir.path());
    request.providers = Some(vec![ProviderDescriptor::direct("origin", None, 1)]);
    request.restrict = Some(Restrict::PdfOnly);
    request.network = network_for(&server);

    let summary = pipeline::run(request).await.expect("run succeeds");

    assert!(summary.bibliography.is_none());
    assert!(!dir.path().join("bibtex.bib").exists());
    assert_eq!(manifest_rows(&summary.manifest).len(), 1);
    assert_eq!(summary.exhausted, 1);
}
