//! Shared fixtures for integration tests: a local HTTP server and
//! observable cache stores.
#![allow(dead_code)]

pub mod http_server;

use fetchpool::cache::{CacheEntry, CacheStore, CachedResponse};
use fetchpool::request::DownloadRequest;
use fetchpool::{DownloadMetrics, DownloadStatus, EngineConfig, MemoryCacheStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

/// Engine configuration for tests: small pool, sweeper effectively parked.
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.worker_threads = 2;
    cfg.sweep_interval_secs = 3600.0;
    cfg
}

/// Snapshot of a completed request, sent from its completion callback.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: DownloadStatus,
    pub http_status: u32,
    pub error: Option<String>,
    pub url: String,
    pub header: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
    pub size: usize,
    pub actual_size: u64,
    pub from_cache: bool,
    pub metrics: DownloadMetrics,
}

/// Installs a completion callback that snapshots the finished request into a
/// channel the test can block on.
pub fn capture_completion(req: &mut DownloadRequest) -> Receiver<Outcome> {
    let (tx, rx) = channel();
    req.set_completion_callback(Box::new(move |r| {
        let _ = tx.send(Outcome {
            status: r.status,
            http_status: r.http_status,
            error: r.error.clone(),
            url: r.url.clone(),
            header: r.header_data().map(<[u8]>::to_vec),
            body: r.downloaded_data().map(<[u8]>::to_vec),
            size: r.downloaded_data_size(),
            actual_size: r.actual_size,
            from_cache: r.from_cache,
            metrics: r.metrics,
        });
    }));
    rx
}

/// Cache store whose contents stay observable after the engine takes
/// ownership of its `Box<dyn CacheStore>`.
#[derive(Clone, Default)]
pub struct SharedCacheStore {
    inner: Arc<Mutex<MemoryCacheStore>>,
}

impl SharedCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.lock().unwrap().contains(url)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn seed(&self, entry: CacheEntry) {
        self.inner.lock().unwrap().insert(entry).unwrap();
    }
}

impl CacheStore for SharedCacheStore {
    fn lookup(&mut self, url: &str, defer_body: bool) -> Option<CachedResponse> {
        self.inner.lock().unwrap().lookup(url, defer_body)
    }

    fn insert(&mut self, entry: CacheEntry) -> anyhow::Result<()> {
        self.inner.lock().unwrap().insert(entry)
    }

    fn remove(&mut self, url: &str) -> anyhow::Result<()> {
        self.inner.lock().unwrap().remove(url)
    }
}

/// Store that reports every hit as updated+writable and counts mutations,
/// for exercising the updated-entry rewrite path.
#[derive(Clone, Default)]
pub struct UpdatingCacheStore {
    inner: Arc<Mutex<MemoryCacheStore>>,
    pub removes: Arc<AtomicUsize>,
    pub inserts: Arc<AtomicUsize>,
}

impl UpdatingCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entry: CacheEntry) {
        self.inner.lock().unwrap().insert(entry).unwrap();
    }

    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

impl CacheStore for UpdatingCacheStore {
    fn lookup(&mut self, url: &str, defer_body: bool) -> Option<CachedResponse> {
        let mut hit = self.inner.lock().unwrap().lookup(url, defer_body)?;
        hit.updated = true;
        hit.writable = true;
        Some(hit)
    }

    fn insert(&mut self, entry: CacheEntry) -> anyhow::Result<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().insert(entry)
    }

    fn remove(&mut self, url: &str) -> anyhow::Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().remove(url)
    }
}
