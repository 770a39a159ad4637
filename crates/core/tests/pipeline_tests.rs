//! End-to-end pipeline tests against a local mock server
use std::time::Duration;

use serde_json::json;
use stackpull_core::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a post page whose preload script carries `post` the way the platform does.
fn post_page(post: serde_json::Value) -> String {
    let literal = serde_json::to_string(&json!({ "post": post }).to_string()).unwrap();
    format!(
        "<!DOCTYPE html><html><head><title>post</title>\
         <script>window._preloads = JSON.parse({literal})</script></head>\
         <body><div class=\"available-content\"></div></body></html>"
    )
}

fn extractor(dir: &TempDir, force: bool, policy: MediaPolicy) -> Extractor {
    let config = ExtractorConfig::builder()
        .output_dir(dir.path().join("out"))
        .ledger_path(dir.path().join("downloaded_posts.log"))
        .force(force)
        .media_policy(policy)
        .build();
    Extractor::new(config).unwrap()
}

fn ledger_lines(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("downloaded_posts.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn mount_page(server: &MockServer, slug: &str, body_html: &str) {
    let page = post_page(json!({ "id": 1, "slug": slug, "title": slug, "body_html": body_html }));
    Mock::given(method("GET"))
        .and(path(format!("/p/{slug}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discover_applies_date_window() {
    let server = MockServer::start().await;
    let base = server.uri();
    let sitemap = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/about</loc><lastmod>2023-02-01</lastmod></url>
  <url><loc>{base}/p/early</loc><lastmod>2023-01-01</lastmod></url>
  <url><loc>{base}/p/middle</loc><lastmod>2023-02-01</lastmod></url>
  <url><loc>{base}/p/late</loc><lastmod>2023-03-01</lastmod></url>
</urlset>"#
    );
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sitemap))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
    let cancel = CancellationToken::new();

    let all = discover(&fetcher, &base, None, &cancel).await.unwrap();
    assert_eq!(all, vec![format!("{base}/p/early"), format!("{base}/p/middle"), format!("{base}/p/late")]);

    let filter = DateFilter::new(Some("2023-03-01"), Some("2023-01-01"));
    let window = discover(&fetcher, &base, filter.as_ref(), &cancel).await.unwrap();
    assert_eq!(window, vec![format!("{base}/p/middle")]);
}

#[tokio::test]
async fn test_discover_missing_sitemap_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
    let err = discover(&fetcher, &server.uri(), None, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, StackpullError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_extract_downloads_media_and_writes_post() {
    let server = MockServer::start().await;
    let base = server.uri();
    let body = format!(r#"<p>Intro</p><img src="{base}/img/one.png"><p>Middle</p><img src="{base}/img/two">"#);
    mount_page(&server, "abc", &body).await;
    Mock::given(method("GET"))
        .and(path("/img/one.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/two"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpg-bytes".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let extractor = extractor(&dir, false, MediaPolicy::FailFast);
    let extraction = extractor.extract_post(&format!("{base}/p/abc"), &CancellationToken::new()).await.unwrap();

    let post = match extraction {
        Extraction::Extracted(post) => post,
        other => panic!("expected an extracted post, got {other:?}"),
    };
    assert!(post.body_html.contains(r#"src="one.png""#));
    assert!(post.body_html.contains(r#"src="two.jpg""#));
    assert!(!post.body_html.contains(&base));

    let post_dir = dir.path().join("out").join("abc");
    assert_eq!(std::fs::read(post_dir.join("one.png")).unwrap(), b"png-bytes");
    assert_eq!(std::fs::read(post_dir.join("two.jpg")).unwrap(), b"jpg-bytes");

    let target = post.output_path(&dir.path().join("out"), OutputFormat::Markdown);
    assert_eq!(target, post_dir.join("abc.md"));
    post.write_to_file(&target, OutputFormat::Markdown).unwrap();
    let markdown = std::fs::read_to_string(&target).unwrap();
    assert!(markdown.starts_with("# abc"));
    assert!(markdown.contains("](one.png)"));

    assert_eq!(ledger_lines(&dir), vec!["abc"]);
}

#[tokio::test]
async fn test_second_run_skips_and_force_refetches() {
    let server = MockServer::start().await;
    let page = post_page(json!({ "slug": "abc", "body_html": "<p>Hi</p>" }));
    Mock::given(method("GET"))
        .and(path("/p/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/p/abc", server.uri());
    let cancel = CancellationToken::new();

    let first = extractor(&dir, false, MediaPolicy::FailFast).extract_post(&url, &cancel).await.unwrap();
    assert!(matches!(first, Extraction::Extracted(_)));

    let second = extractor(&dir, false, MediaPolicy::FailFast).extract_post(&url, &cancel).await.unwrap();
    assert_eq!(second, Extraction::Skipped(SkipReason::AlreadyProcessed));

    let forced = extractor(&dir, true, MediaPolicy::FailFast).extract_post(&url, &cancel).await.unwrap();
    assert!(matches!(forced, Extraction::Extracted(_)));

    assert_eq!(ledger_lines(&dir), vec!["abc"]);
}

#[tokio::test]
async fn test_truncated_payload_fails_to_decode() {
    let server = MockServer::start().await;
    let page = r#"<html><head><script>window._preloads = JSON.parse("{\"post\":{\"slug\":\"ab")</script></head></html>"#;
    Mock::given(method("GET"))
        .and(path("/p/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/p/broken", server.uri());
    let err = extractor(&dir, false, MediaPolicy::FailFast)
        .extract_post(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StackpullError::Decode { stage: DecodeStage::Inner, .. }));
    assert!(ledger_lines(&dir).is_empty());
}

#[tokio::test]
async fn test_page_without_post_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_string(post_page(json!({ "title": "no slug" }))))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/p/empty", server.uri());
    let result = extractor(&dir, false, MediaPolicy::FailFast)
        .extract_post(&url, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result, Extraction::Skipped(SkipReason::NoPost));
    assert!(ledger_lines(&dir).is_empty());
}

#[tokio::test]
async fn test_media_failure_policies() {
    let server = MockServer::start().await;
    let base = server.uri();
    let missing = format!("{base}/img/missing.png");
    mount_page(&server, "pics", &format!(r#"<img src="{missing}">"#)).await;
    Mock::given(method("GET"))
        .and(path("/img/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{base}/p/pics");
    let cancel = CancellationToken::new();

    let strict_dir = TempDir::new().unwrap();
    let err = extractor(&strict_dir, false, MediaPolicy::FailFast)
        .extract_post(&url, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StackpullError::Media { ref url, .. } if *url == missing));
    assert!(ledger_lines(&strict_dir).is_empty());

    let lenient_dir = TempDir::new().unwrap();
    let result = extractor(&lenient_dir, false, MediaPolicy::BestEffort)
        .extract_post(&url, &cancel)
        .await
        .unwrap();
    let post = match result {
        Extraction::Extracted(post) => post,
        other => panic!("expected an extracted post, got {other:?}"),
    };
    assert!(post.body_html.contains(&missing));
    assert_eq!(ledger_lines(&lenient_dir), vec!["pics"]);
}

#[tokio::test]
async fn test_batch_skips_ledger_hits_without_fetching() {
    let server = MockServer::start().await;
    let base = server.uri();
    for slug in ["one", "two", "three", "four", "five"] {
        let expected_hits = if slug == "one" || slug == "two" { 0 } else { 1 };
        let page = post_page(json!({ "slug": slug, "body_html": "<p>body</p>" }));
        Mock::given(method("GET"))
            .and(path(format!("/p/{slug}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .expect(expected_hits)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("downloaded_posts.log"), "one\ntwo\n").unwrap();
    let config = ExtractorConfig::builder()
        .output_dir(dir.path().join("out"))
        .ledger_path(dir.path().join("downloaded_posts.log"))
        .concurrency(2)
        .build();
    let extractor = Extractor::new(config).unwrap();

    let urls: Vec<String> =
        ["one", "two", "three", "four", "five"].iter().map(|slug| format!("{base}/p/{slug}")).collect();
    let (results, summary) = extractor.run_all(urls, CancellationToken::new()).collect().await.unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(summary, BatchSummary { completed: 3, skipped: 2, failed: 0, recorded: 3 });

    let skipped: Vec<&str> = results
        .iter()
        .filter_map(|r| match r {
            ExtractResult::Skipped { url, reason: SkipReason::AlreadyProcessed } => Some(url.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|url| url.ends_with("/p/one") || url.ends_with("/p/two")));

    let mut ledger = ledger_lines(&dir);
    ledger.sort();
    assert_eq!(ledger, vec!["five", "four", "one", "three", "two"]);
}

#[tokio::test]
async fn test_batch_reports_failures_and_records_only_successes() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "good", "<p>ok</p>").await;
    Mock::given(method("GET"))
        .and(path("/p/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let urls = vec![format!("{base}/p/good"), format!("{base}/p/gone")];
    let (results, summary) = extractor(&dir, false, MediaPolicy::FailFast)
        .run_all(urls, CancellationToken::new())
        .collect()
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        ExtractResult::Failed { url, error: StackpullError::HttpStatus { status: 404, .. } } if url.ends_with("/p/gone")
    )));
    assert_eq!(ledger_lines(&dir), vec!["good"]);
}

#[tokio::test]
async fn test_batch_writes_rendered_posts() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "first", "<p>one</p>").await;
    mount_page(&server, "second", "<p>two</p>").await;

    let dir = TempDir::new().unwrap();
    let config = ExtractorConfig::builder()
        .output_dir(dir.path().join("out"))
        .ledger_path(dir.path().join("downloaded_posts.log"))
        .output_format(OutputFormat::Text)
        .build();
    let urls = vec![format!("{base}/p/first"), format!("{base}/p/second")];
    let (_, summary) = Extractor::new(config)
        .unwrap()
        .run_all(urls, CancellationToken::new())
        .collect()
        .await
        .unwrap();

    assert_eq!(summary.recorded, 2);
    let first = std::fs::read_to_string(dir.path().join("out/first/first.txt")).unwrap();
    assert_eq!(first, "first\n=====\n\none");
    assert!(dir.path().join("out/second/second.txt").exists());
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_fetch() {
    let server = MockServer::start().await;
    let page = post_page(json!({ "slug": "slow", "body_html": "<p>late</p>" }));
    Mock::given(method("GET"))
        .and(path("/p/slow"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let urls = vec![format!("{}/p/slow", server.uri())];
    let run = extractor(&dir, false, MediaPolicy::FailFast).run_all(urls, cancel.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let (results, summary) = tokio::time::timeout(Duration::from_secs(5), run.collect())
        .await
        .expect("cancelled batch should finish promptly")
        .unwrap();

    assert!(matches!(results.as_slice(), [ExtractResult::Failed { error: StackpullError::Cancelled, .. }]));
    assert_eq!(summary.failed, 1);
    assert!(ledger_lines(&dir).is_empty());
    assert!(!dir.path().join("out").join("slow").exists());
}
