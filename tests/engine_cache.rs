//! Integration tests for the cache gate: precedence over the network,
//! populate exclusions, the updated-entry rewrite, and degradation when no
//! store is installed.

mod common;

use common::http_server::{self, ServerOptions};
use common::{capture_completion, test_config, SharedCacheStore, UpdatingCacheStore};
use fetchpool::cache::CacheEntry;
use fetchpool::{DownloadRequest, DownloadStatus, Downloader, ThreadedWorkerPool};
use std::sync::Arc;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn served_body(len: usize) -> Vec<u8> {
    (1u8..=200).cycle().take(len).collect()
}

fn engine_with(store: impl fetchpool::CacheStore + 'static) -> Arc<Downloader> {
    let workers = Arc::new(ThreadedWorkerPool::new(2));
    Downloader::new(test_config(), workers, Some(Box::new(store)))
}

#[test]
fn successful_fetch_populates_cache() {
    let body = served_body(2048);
    let server = http_server::start(body.clone());
    let store = SharedCacheStore::new();
    let engine = engine_with(store.clone());

    let mut req = DownloadRequest::new(&server.url);
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert_eq!(outcome.status, DownloadStatus::Ok);
    assert!(store.contains(&server.url), "response was written to the store");
    engine.shutdown();
}

#[test]
fn cache_precedence_skips_network_on_second_fetch() {
    let body = served_body(2048);
    let server = http_server::start(body.clone());
    let store = SharedCacheStore::new();
    let engine = engine_with(store.clone());

    let mut first = DownloadRequest::new(&server.url);
    let rx = capture_completion(&mut first);
    engine.submit(first);
    rx.recv_timeout(RECV_TIMEOUT).expect("first completion");
    assert_eq!(server.hits(), 1);

    let mut second = DownloadRequest::new(&server.url);
    let rx = capture_completion(&mut second);
    engine.submit(second);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("second completion");

    assert_eq!(outcome.status, DownloadStatus::Ok);
    assert_eq!(outcome.http_status, 200);
    assert!(outcome.from_cache);
    assert_eq!(server.hits(), 1, "second fetch never touched the network");
    engine.shutdown();
}

#[test]
fn cache_disabled_request_always_uses_network() {
    let body = served_body(1024);
    let server = http_server::start(body.clone());
    let store = SharedCacheStore::new();
    let engine = engine_with(store.clone());

    for _ in 0..2 {
        let mut req = DownloadRequest::new(&server.url);
        req.cache_enabled = false;
        let rx = capture_completion(&mut req);
        engine.submit(req);
        rx.recv_timeout(RECV_TIMEOUT).expect("completion");
    }
    assert_eq!(server.hits(), 2);
    assert!(!store.contains(&server.url));
    engine.shutdown();
}

#[test]
fn partial_content_response_is_not_cached() {
    let body = served_body(2048);
    let server = http_server::start_with_options(
        body,
        ServerOptions {
            force_partial: true,
            ..ServerOptions::default()
        },
    );
    let store = SharedCacheStore::new();
    let engine = engine_with(store.clone());

    let mut req = DownloadRequest::new(&server.url);
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert_eq!(outcome.status, DownloadStatus::Ok);
    assert_eq!(outcome.http_status, 206);
    assert_eq!(store.len(), 0, "206 responses are never cached");
    engine.shutdown();
}

#[test]
fn redirect_status_is_not_cached_in_ranged_mode() {
    // The probe target redirects again, so the authoritative second attempt
    // finishes with HTTP 302.
    let second_hop = http_server::start_with_options(
        Vec::new(),
        ServerOptions {
            redirect_to: Some("http://127.0.0.1:1/elsewhere".to_string()),
            ..ServerOptions::default()
        },
    );
    let first_hop = http_server::start_with_options(
        Vec::new(),
        ServerOptions {
            redirect_to: Some(second_hop.url.clone()),
            ..ServerOptions::default()
        },
    );
    let store = SharedCacheStore::new();
    let engine = engine_with(store.clone());

    let mut req = DownloadRequest::new(&first_hop.url);
    req.byte_range_enabled = true;
    req.byte_range_interval = 4096;
    req.follow_redirects = false;
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert_eq!(outcome.http_status, 302);
    assert_eq!(outcome.url, first_hop.url, "logical URL restored");
    assert_eq!(store.len(), 0, "redirect responses are never cached");
    engine.shutdown();
}

#[test]
fn updated_entry_is_removed_and_rewritten() {
    let url = "http://127.0.0.1:1/updated";
    let store = UpdatingCacheStore::new();
    store.seed(CacheEntry {
        url: url.to_string(),
        header: b"HTTP/1.1 200 OK\r\n".to_vec(),
        body: b"fresh".to_vec(),
    });
    let engine = engine_with(store.clone());

    let mut req = DownloadRequest::new(url);
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert_eq!(outcome.status, DownloadStatus::Ok);
    assert!(outcome.from_cache);
    assert_eq!(outcome.body.as_deref(), Some(&b"fresh"[..]));
    assert_eq!(store.remove_count(), 1, "stale entry removed");
    assert_eq!(store.insert_count(), 1, "refreshed entry re-inserted");
    engine.shutdown();
}

#[test]
fn download_only_skips_updated_rewrite_in_ranged_mode() {
    let url = "http://127.0.0.1:1/download-only";
    let store = UpdatingCacheStore::new();
    store.seed(CacheEntry {
        url: url.to_string(),
        header: b"h".to_vec(),
        body: b"payload".to_vec(),
    });
    let engine = engine_with(store.clone());

    let mut req = DownloadRequest::new(url);
    req.byte_range_enabled = true;
    req.byte_range_interval = 4096;
    req.download_only = true;
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert!(outcome.from_cache);
    assert_eq!(store.remove_count(), 0);
    assert_eq!(store.insert_count(), 0);
    engine.shutdown();
}

#[test]
fn deferred_read_streams_from_file_backed_store() {
    use fetchpool::cache::{CacheStore, CachedResponse};

    // Store whose deferred lookups hand out a real file handle, the way an
    // on-disk store does: expiry prefix, `|` delimiter, then the payload.
    struct FileStore {
        path: std::path::PathBuf,
    }

    impl CacheStore for FileStore {
        fn lookup(&mut self, _url: &str, defer_body: bool) -> Option<CachedResponse> {
            let reader = if defer_body {
                Some(Box::new(std::fs::File::open(&self.path).ok()?)
                    as Box<dyn std::io::Read + Send>)
            } else {
                None
            };
            Some(CachedResponse {
                header: b"HTTP/1.1 200 OK\r\n".to_vec(),
                body: Vec::new(),
                updated: false,
                writable: true,
                reader,
            })
        }

        fn insert(&mut self, _entry: CacheEntry) -> anyhow::Result<()> {
            Ok(())
        }

        fn remove(&mut self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entry.bin");
    std::fs::write(&path, b"1714761600|file payload").unwrap();

    let engine = engine_with(FileStore { path });
    let mut req = DownloadRequest::new("http://127.0.0.1:1/file-backed");
    req.defer_cache_read = true;
    req.cached_read_chunk = 5;
    let sunk = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = Arc::clone(&sunk);
    req.set_external_write_callback(Box::new(move |chunk| {
        s.lock().unwrap().extend_from_slice(chunk);
        chunk.len()
    }));
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert!(outcome.from_cache);
    assert_eq!(sunk.lock().unwrap().as_slice(), b"file payload");
    // Size counts everything consumed from the file, prefix included.
    assert_eq!(outcome.size, "1714761600|file payload".len());
    engine.shutdown();
}

#[test]
fn no_store_degrades_to_network_only() {
    let body = served_body(1024);
    let server = http_server::start(body.clone());
    // cache_enabled is on in the config, but no store is installed.
    let engine = Downloader::with_defaults(test_config());

    let mut req = DownloadRequest::new(&server.url);
    let rx = capture_completion(&mut req);
    engine.submit(req);
    let outcome = rx.recv_timeout(RECV_TIMEOUT).expect("completion");

    assert_eq!(outcome.status, DownloadStatus::Ok);
    assert_eq!(outcome.body.as_deref(), Some(body.as_slice()));
    assert_eq!(server.hits(), 1);
    engine.shutdown();
}
