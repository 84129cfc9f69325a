//! Cache gate: consult an external response store before the network path,
//! populate it after successful fetches.
//!
//! The store itself (layout, eviction, TTL persistence) is a collaborator
//! behind [`CacheStore`]; the engine serializes every call to it under one
//! lock and degrades to network-only behavior when it is absent or failing.
//! A request is never failed solely because the cache is unavailable.

use crate::request::DownloadRequest;
use anyhow::Result;
use std::collections::HashMap;
use std::io::Read;

/// A response to be written into the store after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// A stored response produced by [`CacheStore::lookup`].
pub struct CachedResponse {
    pub header: Vec<u8>,
    /// Stored payload; left empty for deferred lookups.
    pub body: Vec<u8>,
    /// The store refreshed this entry during lookup; the engine rewrites it
    /// after delivery.
    pub updated: bool,
    /// The refreshed entry may be written back.
    pub writable: bool,
    /// Raw stream over the stored record for deferred reads. Includes the
    /// store's expiry prefix, terminated by `|`, ahead of the payload.
    pub reader: Option<Box<dyn Read + Send>>,
}

/// External response store. Lookup misses and store errors are equivalent
/// from the engine's point of view; mutation failures are logged and
/// otherwise ignored.
pub trait CacheStore: Send {
    /// Returns the stored response for `url`, or `None` on a miss. With
    /// `defer_body` the payload stays on disk and `reader` is populated
    /// instead of `body`.
    fn lookup(&mut self, url: &str, defer_body: bool) -> Option<CachedResponse>;

    fn insert(&mut self, entry: CacheEntry) -> Result<()>;

    fn remove(&mut self, url: &str) -> Result<()>;
}

/// Consults the store for `request`'s URL. On a hit the cached header/body
/// are copied onto the request, the HTTP status becomes 200 with a clean
/// download status, and the request is marked cache-sourced. The hit is
/// returned so the engine can run the deferred stream and the updated-entry
/// rewrite afterwards.
pub(crate) fn consult(
    store: &mut dyn CacheStore,
    request: &mut DownloadRequest,
) -> Option<CachedResponse> {
    let hit = store.lookup(&request.url, request.defer_cache_read)?;
    request.set_header_data(Some(hit.header.clone()));
    request.set_body_data(Some(hit.body.clone()));
    request.http_status = 200;
    request.status = crate::request::DownloadStatus::Ok;
    request.from_cache = true;
    tracing::debug!(url = %request.url, "cache hit");
    Some(hit)
}

/// Streams a stored record to the request's external write sink in chunks,
/// skipping the expiry prefix (everything up to and including the first
/// `|`). The request's reported size is the total number of bytes consumed
/// from the reader; no payload is materialized on the request.
pub(crate) fn stream_deferred(
    reader: &mut dyn Read,
    chunk_size: usize,
    request: &mut DownloadRequest,
) {
    let mut total = 0usize;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                total += 1;
                if byte[0] == b'|' {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache stream failed in expiry prefix");
                request.set_streamed_size(total);
                return;
            }
        }
    }

    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                request.execute_external_write(&buf[..n]);
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache stream failed");
                break;
            }
        }
    }
    request.set_streamed_size(total);
}

/// Whether a whole-body response with this HTTP status may be stored.
/// Partial content and redirects are never cached.
pub(crate) fn whole_body_status_cacheable(http_status: u32) -> bool {
    http_status != 206 && http_status != 302 && http_status != 307
}

/// Whether a completed byte-range transfer may be stored: the full resource
/// must have been retrieved and the status must not be a redirect.
pub(crate) fn ranged_response_cacheable(request: &DownloadRequest) -> bool {
    request.actual_size == request.downloaded_data_size() as u64
        && request.http_status != 302
        && request.http_status != 307
}

/// In-memory [`CacheStore`] for tests and small embedders. Stored records
/// carry a `0|` expiry prefix in deferred-read streams, the same framing an
/// on-disk store uses.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }
}

impl CacheStore for MemoryCacheStore {
    fn lookup(&mut self, url: &str, defer_body: bool) -> Option<CachedResponse> {
        let entry = self.entries.get(url)?;
        let (body, reader) = if defer_body {
            let mut record = b"0|".to_vec();
            record.extend_from_slice(&entry.body);
            (
                Vec::new(),
                Some(Box::new(std::io::Cursor::new(record)) as Box<dyn Read + Send>),
            )
        } else {
            (entry.body.clone(), None)
        };
        Some(CachedResponse {
            header: entry.header.clone(),
            body,
            updated: false,
            writable: true,
            reader,
        })
    }

    fn insert(&mut self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.url.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, url: &str) -> Result<()> {
        self.entries.remove(url);
        Ok(())
    }
}
