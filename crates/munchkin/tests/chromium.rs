//! End-to-end tests against a local fixture server.
//!
//! These drive a real Chromium, so they are ignored by default:
//! `cargo test -p munchkin -- --ignored`

use std::time::{Duration, Instant};

use assert_json_diff::assert_json_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use munchkin::{download, fetch_text, DownloadRequest, EngineLauncher, FetchError, FetchRequest};

const LISTING_HTML: &str = "<html><head><title>Listing</title></head><body><h1>BBCA</h1></body></html>";

async fn mount_listing(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/listing/BBCA"))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

fn download_request(server: &MockServer, target: &str, timeout_ms: u64) -> DownloadRequest {
    let mut request = DownloadRequest::new(Url::parse(&format!("{}{target}", server.uri())).unwrap());
    request.listing_template = format!("{}/listing/{{ticker}}", server.uri());
    request.timeout = Duration::from_millis(timeout_ms);
    request
}

#[tokio::test]
#[ignore] // Requires Chromium to be installed
async fn text_fetch_matches_fixture_body() {
    let server = MockServer::start().await;
    let body = "<html><body><p>Harga saham: 9.875</p><p>naïve café</p></body></html>";
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let request = FetchRequest::new(Url::parse(&format!("{}/page", server.uri())).unwrap());
    let report = fetch_text(&EngineLauncher, &request)
        .await
        .expect("text fetch failed");

    assert_eq!(report.status, 200);
    assert_eq!(report.text, body);
}

#[tokio::test]
#[ignore] // Requires Chromium to be installed
async fn attachment_is_saved_under_suggested_name() {
    let server = MockServer::start().await;
    mount_listing(&server, 200, LISTING_HTML).await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/csv")
                .insert_header("Content-Disposition", "attachment; filename=\"report.csv\"")
                .set_body_string("ticker,close\nBBCA,9875\n"),
        )
        .mount(&server)
        .await;

    let request = download_request(&server, "/download", 10_000);
    let report = download(&EngineLauncher, &request)
        .await
        .expect("download failed");

    let dir = report.file.parent().unwrap().to_path_buf();
    assert_json_eq!(
        serde_json::to_value(&report).unwrap(),
        json!({
            "file": dir.join("report.csv"),
            "message": "Successfully downloaded"
        })
    );
    assert_eq!(
        std::fs::read_to_string(&report.file).unwrap(),
        "ticker,close\nBBCA,9875\n"
    );
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
#[ignore] // Requires Chromium to be installed
async fn failing_listing_page_reports_body() {
    let server = MockServer::start().await;
    mount_listing(&server, 500, "upstream unavailable").await;

    let request = download_request(&server, "/download", 10_000);
    let err = download(&EngineLauncher, &request).await.unwrap_err();

    match err {
        FetchError::PageNotOk { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("expected PageNotOk, got {other:?}"),
    }
}

#[tokio::test]
#[ignore] // Requires Chromium to be installed
async fn page_without_download_times_out() {
    let server = MockServer::start().await;
    mount_listing(&server, 200, LISTING_HTML).await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string("<html><body>nothing to see</body></html>"),
        )
        .mount(&server)
        .await;

    let request = download_request(&server, "/plain", 1_500);
    let start = Instant::now();
    let err = download(&EngineLauncher, &request).await.unwrap_err();

    assert!(matches!(err, FetchError::DownloadTimeout { .. }), "got {err:?}");
    // Timeout plus browser launch and shutdown.
    assert!(start.elapsed() < Duration::from_secs(20));
}
