//! HTTP executor against local servers: captured metadata, redirects,
//! failures and both deadlines.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crawl_scheduler::error::ContentError;
use crawl_scheduler::executor::{ExecutorConfig, HttpCrawlExecutor};
use crawl_scheduler::stores::{content_hash, FsContentStore};
use crawl_scheduler::traits::{ContentStore, CrawlExecutor};
use crawl_scheduler::types::{ContentArtifact, FetchOutcome, FetchRequest, FetchSuccess, Route};
use tokio::net::TcpListener;

const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) test";

fn request(url: String) -> FetchRequest {
    FetchRequest {
        url,
        route: Route::Direct,
        user_agent: UA.to_string(),
        headers: BTreeMap::new(),
    }
}

fn short_deadlines() -> ExecutorConfig {
    ExecutorConfig {
        request_timeout: Duration::from_secs(10),
        soft_timeout: Duration::from_millis(200),
        hard_timeout: Duration::from_millis(600),
        ..Default::default()
    }
}

fn success(outcome: FetchOutcome) -> FetchSuccess {
    match outcome {
        FetchOutcome::Success(success) => success,
        FetchOutcome::Failure { diagnostic } => panic!("expected success, got: {diagnostic}"),
    }
}

fn diagnostic(outcome: FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Failure { diagnostic } => diagnostic,
        FetchOutcome::Success(s) => panic!("expected failure, got {s:?}"),
    }
}

/// Accepts connections and never answers.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}/")
}

/// Blocks its thread while storing, ignoring cancellation.
struct StuckStore;

#[async_trait]
impl ContentStore for StuckStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentArtifact, ContentError> {
        std::thread::sleep(Duration::from_millis(1500));
        Ok(ContentArtifact {
            hash: content_hash(&bytes),
            byte_length: bytes.len() as u64,
        })
    }

    async fn contains(&self, _hash: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn test_success_captures_metadata_and_stores_body() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/page")
        .match_header("user-agent", UA)
        .with_status(200)
        .with_header("X-Frame-Options", "DENY")
        .with_header("Set-Cookie", "a=1; Secure")
        .with_body("hello")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsContentStore::new(dir.path()));
    let executor = HttpCrawlExecutor::new(ExecutorConfig::default(), store.clone());

    let outcome = executor.fetch(&request(format!("{}/page", server.url()))).await;
    page.assert_async().await;

    let success = success(outcome);
    assert_eq!(success.status, 200);
    assert_eq!(success.end_url, format!("{}/page", server.url()));
    assert!(success.peer.unwrap().starts_with("127.0.0.1:"));
    assert_eq!(success.artifact.hash, content_hash(b"hello"));
    assert_eq!(success.response_headers["x-frame-options"], "DENY");
    assert_eq!(success.response_headers["set-cookie"], "a=1; Secure");
    assert_eq!(success.response_headers["status_code"], 200);
    assert!(store.contains(&success.artifact.hash).await);
}

#[tokio::test]
async fn test_variant_headers_are_sent() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/")
        .match_header("accept-language", "de")
        .with_status(200)
        .with_body("hallo")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let executor = HttpCrawlExecutor::new(
        ExecutorConfig::default(),
        Arc::new(FsContentStore::new(dir.path())),
    );
    let mut req = request(format!("{}/", server.url()));
    req.headers.insert("Accept-Language".into(), "de".into());

    assert!(executor.fetch(&req).await.is_success());
    page.assert_async().await;
}

#[tokio::test]
async fn test_redirects_are_followed_to_end_url() {
    let mut server = mockito::Server::new_async().await;
    let _old = server
        .mock("GET", "/old")
        .with_status(301)
        .with_header("Location", "/new")
        .create_async()
        .await;
    let _new = server
        .mock("GET", "/new")
        .with_status(200)
        .with_body("moved")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let executor = HttpCrawlExecutor::new(
        ExecutorConfig::default(),
        Arc::new(FsContentStore::new(dir.path())),
    );

    let outcome = executor.fetch(&request(format!("{}/old", server.url()))).await;
    let success = success(outcome);
    assert!(success.end_url.ends_with("/new"));
    assert_eq!(success.artifact.hash, content_hash(b"moved"));
}

#[tokio::test]
async fn test_error_status_is_still_a_measurement() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/missing")
        .with_status(404)
        .with_body("not here")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let executor = HttpCrawlExecutor::new(
        ExecutorConfig::default(),
        Arc::new(FsContentStore::new(dir.path())),
    );

    let outcome = executor.fetch(&request(format!("{}/missing", server.url()))).await;
    let success = success(outcome);
    assert_eq!(success.status, 404);
    assert_eq!(success.response_headers["status_code"], 404);
}

#[tokio::test]
async fn test_refused_connection_is_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let executor = HttpCrawlExecutor::new(
        ExecutorConfig::default(),
        Arc::new(FsContentStore::new(dir.path())),
    );

    let outcome = executor.fetch(&request(format!("http://{addr}/"))).await;
    assert!(!diagnostic(outcome).is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _big = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("x".repeat(1024))
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = ExecutorConfig {
        max_body_bytes: 100,
        ..Default::default()
    };
    let executor = HttpCrawlExecutor::new(config, Arc::new(FsContentStore::new(dir.path())));

    let outcome = executor.fetch(&request(format!("{}/", server.url()))).await;
    assert!(diagnostic(outcome).contains("exceeds 100 bytes"));
}

#[tokio::test]
async fn test_soft_deadline_reports_partial_progress() {
    let url = silent_server().await;
    let dir = tempfile::tempdir().unwrap();
    let executor = HttpCrawlExecutor::new(short_deadlines(), Arc::new(FsContentStore::new(dir.path())));

    let started = Instant::now();
    let text = diagnostic(executor.fetch(&request(url)).await);

    assert!(text.starts_with("soft timeout"), "got: {text}");
    assert!(text.contains("connecting"));
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hard_deadline_aborts_uncooperative_attempt() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("body")
        .create_async()
        .await;

    let executor = HttpCrawlExecutor::new(short_deadlines(), Arc::new(StuckStore));

    let started = Instant::now();
    let text = diagnostic(executor.fetch(&request(format!("{}/", server.url()))).await);

    assert!(text.starts_with("hard timeout"), "got: {text}");
    assert!(text.contains("storing content"));
    assert!(started.elapsed() < Duration::from_millis(1400));
}
