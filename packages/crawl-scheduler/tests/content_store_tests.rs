//! Content-addressed storage on a real filesystem.

use std::io::Read;
use std::sync::Arc;

use crawl_scheduler::stores::{content_hash, FsContentStore};
use crawl_scheduler::traits::ContentStore;
use flate2::read::GzDecoder;

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_put_writes_compressed_body_under_fanned_out_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsContentStore::new(dir.path());
    let body = b"<html><body>hello</body></html>".to_vec();

    let artifact = store.put(body.clone()).await.unwrap();
    assert_eq!(artifact.hash, content_hash(&body));
    assert_eq!(artifact.byte_length, body.len() as u64);

    let path = store.path_for(&artifact.hash);
    let expected = dir
        .path()
        .join(&artifact.hash[..1])
        .join(&artifact.hash[1..2])
        .join(format!("{}.html.gz", artifact.hash));
    assert_eq!(path, expected);
    let stored = std::fs::read(&path).unwrap();
    assert_eq!(gunzip(&stored), body);
    assert!(store.contains(&artifact.hash).await);
}

#[tokio::test]
async fn test_identical_bodies_are_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsContentStore::new(dir.path());
    let body = b"same bytes".to_vec();

    let first = store.put(body.clone()).await.unwrap();
    let path = store.path_for(&first.hash);
    let written = std::fs::read(&path).unwrap();

    let second = store.put(body).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(std::fs::read(&path).unwrap(), written);

    let files = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_converge() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsContentStore::new(dir.path()));
    let body = vec![b'x'; 256 * 1024];

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move { store.put(body).await }));
    }
    let mut hashes = Vec::new();
    for handle in handles {
        hashes.push(handle.await.unwrap().unwrap().hash);
    }
    hashes.dedup();
    assert_eq!(hashes.len(), 1);

    let path = store.path_for(&hashes[0]);
    assert_eq!(gunzip(&std::fs::read(&path).unwrap()), body);
    let files = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(files, 1, "no temporary files left behind");
}

#[tokio::test]
async fn test_contains_unknown_hash() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsContentStore::new(dir.path());
    assert!(!store.contains("0123456789abcdef0123456789abcdef").await);
}

#[tokio::test]
async fn test_empty_body_is_a_valid_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsContentStore::new(dir.path());

    let artifact = store.put(Vec::new()).await.unwrap();
    assert_eq!(artifact.hash, "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(artifact.byte_length, 0);
    assert!(store.contains(&artifact.hash).await);
}
