//! Download request value object: configuration, callbacks, result fields.
//!
//! A request is configured by the caller, submitted to the engine, and then
//! owned by a worker thread for its whole lifecycle. Two pieces are shared
//! across threads after submission and live behind their own
//! synchronization: the cancellation token and the completion-callback slot.
//! Both are also held by the request registry so owner-scoped cancellation
//! and callback rebinding work without a reference to the request itself.

use crate::handle_pool::HandleTtl;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default chunk size for streaming a deferred cache read to the caller's sink.
const DEFAULT_CACHED_READ_CHUNK: usize = 8 * 1024;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a request, valid for registry operations while
/// the request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Opaque token identifying the subsystem that submitted a request. Registry
/// operations that take an owner only act on requests carrying the same
/// token, so one subsystem cannot cancel or rebind another's fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OwnerToken(pub u64);

/// Advisory cancellation flag, shared between the request, the registry and
/// any caller thread. Observed only at defined checkpoints (submission time
/// and entry to the download drivers); it never interrupts a transfer that
/// has already started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Completion callback, invoked with the finished request.
pub type CompletionFn = Box<dyn FnOnce(&mut DownloadRequest) + Send>;

/// Streaming sink for received chunks, independent of the engine's own
/// buffering. Returns the number of bytes it consumed.
pub type WriteSink = Box<dyn FnMut(&[u8]) -> usize + Send>;

/// Progress callback: (download total, downloaded, upload total, uploaded).
/// Returning false aborts the transfer.
pub type ProgressFn = Box<dyn FnMut(f64, f64, f64, f64) -> bool + Send>;

/// Reassignable at-most-once completion slot.
///
/// The callback is taken out of the slot to run, so it can fire at most once
/// per request; replacing it swaps under the same lock, so a rebind either
/// fully wins or fully loses against a concurrent completion.
#[derive(Clone, Default)]
pub struct CompletionSlot(Arc<Mutex<Option<CompletionFn>>>);

impl CompletionSlot {
    /// Installs `f`, replacing any previously registered callback.
    pub fn replace(&self, f: Option<CompletionFn>) {
        *self.0.lock().unwrap() = f;
    }

    /// Removes and returns the registered callback, if any.
    fn take(&self) -> Option<CompletionFn> {
        self.0.lock().unwrap().take()
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().unwrap().is_some()
    }
}

/// Terminal state of a request, distinct from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadStatus {
    /// Not yet completed.
    #[default]
    Pending,
    /// Transfer finished (network success or cache hit).
    Ok,
    /// Cancellation was observed before any network attempt.
    Canceled,
    /// Transport failure; carries the transport's numeric result code.
    Failed(u32),
}

impl DownloadStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DownloadStatus::Ok)
    }
}

/// Timing metrics recorded after a successful transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadMetrics {
    pub connect_time_ms: u32,
    /// TLS handshake share: app-connect minus connect, clamped at zero.
    pub ssl_connect_time_ms: u32,
    pub total_time_ms: u32,
    pub download_speed_bytes_per_sec: u64,
}

/// One fetch: immutable-enough configuration plus mutable result fields.
///
/// Configuration fields are plain writes and are only meaningful before
/// submission; after submission the engine's worker is the sole writer,
/// except for [`CancelToken`] and the completion slot which are designed for
/// cross-thread use.
pub struct DownloadRequest {
    id: RequestId,
    /// Owner token for registry-scoped operations.
    pub owner: OwnerToken,
    /// Free-form identifier carried through logs.
    pub tag: String,
    /// Target URL. Byte-range redirects rewrite this transiently; the
    /// logical URL is restored before completion.
    pub url: String,
    /// HTTP method; `None`/"GET" issue a plain GET, "POST"/"PUT" upload
    /// `read_data`, anything else becomes a custom request.
    pub method: Option<String>,
    /// Proxy server, e.g. `http://proxy:3128`. `None` disables proxying.
    pub proxy: Option<String>,
    /// Additional header lines, sent in order.
    pub additional_headers: Vec<String>,
    /// User agent; a library default is used when unset.
    pub user_agent: Option<String>,
    /// Request body for POST/PUT.
    pub read_data: Vec<u8>,
    /// Fetch headers only (no response body).
    pub header_only: bool,
    /// When true, skip the engine's overall timeout and let the transport
    /// apply its own default.
    pub use_default_timeout: bool,
    /// Connection timeout override.
    pub connection_timeout: Option<Duration>,
    /// Pool lifetime for the transport handle once this request releases
    /// it. `None` takes the engine default.
    pub handle_ttl: Option<HandleTtl>,
    /// Fetch via successive byte-range segments instead of one transfer.
    pub byte_range_enabled: bool,
    /// Segment size for byte-range mode, in bytes.
    pub byte_range_interval: u64,
    /// Connection-refused retry bound for byte-range mode (0 = no retry).
    /// `None` takes the engine default.
    pub max_retries: Option<u32>,
    /// Consult/populate the cache store for this request.
    pub cache_enabled: bool,
    /// On a cache hit, stream the stored payload to the external write sink
    /// instead of materializing it in memory.
    pub defer_cache_read: bool,
    /// Chunk size for deferred cache streaming.
    pub cached_read_chunk: usize,
    /// Fetch for side effects only: skip deferred cache streaming and the
    /// updated-entry rewrite.
    pub download_only: bool,
    /// When false the transport's progress meter is forced off even if a
    /// progress callback is set.
    pub progress_enabled: bool,
    /// Treat HTTP errors (>= 400) as transport failures.
    pub fail_on_error: bool,
    /// Offer all built-in content encodings to the server.
    pub use_encoding: bool,
    /// Follow redirects inside the transport (byte-range probe redirects
    /// are additionally re-resolved by the engine).
    pub follow_redirects: bool,
    /// Keep TCP keepalive probes on pooled connections.
    pub tcp_keepalive: bool,
    /// Apply access-control request headers and response validation.
    pub cors_required: bool,
    /// Optional access-control collaborator.
    pub cors: Option<Arc<dyn crate::cors::AccessControl>>,
    /// Record timing metrics on success.
    pub metrics_enabled: bool,
    /// Transport consumes the external sink's return value instead of the
    /// buffered size, letting the sink throttle or abort the transfer.
    pub use_callback_data_size: bool,

    pub(crate) external_write: Option<WriteSink>,
    pub(crate) progress: Option<ProgressFn>,
    completion: CompletionSlot,
    cancel: CancelToken,

    // Result fields, written by the engine.
    pub status: DownloadStatus,
    pub http_status: u32,
    pub error: Option<String>,
    /// Transport-level error detail captured in fail-on-error mode.
    pub transport_detail: Option<String>,
    pub(crate) header_data: Option<Vec<u8>>,
    pub(crate) body_data: Option<Vec<u8>>,
    pub(crate) downloaded_size: usize,
    pub metrics: DownloadMetrics,
    /// Total resource size discovered by a byte-range probe.
    pub actual_size: u64,
    /// The result came from the cache store, not the network.
    pub from_cache: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)),
            owner: OwnerToken::default(),
            tag: String::new(),
            url: url.into(),
            method: None,
            proxy: None,
            additional_headers: Vec::new(),
            user_agent: None,
            read_data: Vec::new(),
            header_only: false,
            use_default_timeout: false,
            connection_timeout: None,
            handle_ttl: None,
            byte_range_enabled: false,
            byte_range_interval: 0,
            max_retries: None,
            cache_enabled: true,
            defer_cache_read: false,
            cached_read_chunk: DEFAULT_CACHED_READ_CHUNK,
            download_only: false,
            progress_enabled: true,
            fail_on_error: false,
            use_encoding: true,
            follow_redirects: true,
            tcp_keepalive: true,
            cors_required: true,
            cors: None,
            metrics_enabled: true,
            use_callback_data_size: false,
            external_write: None,
            progress: None,
            completion: CompletionSlot::default(),
            cancel: CancelToken::default(),
            status: DownloadStatus::Pending,
            http_status: 0,
            error: None,
            transport_detail: None,
            header_data: None,
            body_data: None,
            downloaded_size: 0,
            metrics: DownloadMetrics::default(),
            actual_size: 0,
            from_cache: false,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Installs the completion callback, replacing any previous one.
    pub fn set_completion_callback(&self, f: CompletionFn) {
        self.completion.replace(Some(f));
    }

    /// Installs the streaming sink chunks are forwarded to as they arrive.
    pub fn set_external_write_callback(&mut self, f: WriteSink) {
        self.external_write = Some(f);
    }

    /// Installs the transfer progress callback.
    pub fn set_progress_callback(&mut self, f: ProgressFn) {
        self.progress = Some(f);
    }

    /// Shared handle to the completion slot (held by the registry so
    /// callbacks can be rebound while the request is in flight).
    pub(crate) fn completion_slot(&self) -> CompletionSlot {
        self.completion.clone()
    }

    /// Shared handle to the cancellation flag.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests cancellation; observed at the next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// Records `status` and invokes the registered completion callback, if
    /// any. Returns whether a callback existed, so the engine can fall back
    /// to its default handler. The callback can fire at most once.
    pub fn execute_callback(&mut self, status: DownloadStatus) -> bool {
        self.status = status;
        match self.completion.take() {
            Some(f) => {
                f(self);
                true
            }
            None => false,
        }
    }

    /// Forwards a received chunk to the external sink, returning how many
    /// bytes it consumed (0 when no sink is installed).
    pub fn execute_external_write(&mut self, data: &[u8]) -> usize {
        match self.external_write.as_mut() {
            Some(f) => f(data),
            None => 0,
        }
    }

    /// Response header bytes, when any were received.
    pub fn header_data(&self) -> Option<&[u8]> {
        self.header_data.as_deref()
    }

    /// Downloaded body bytes. `None` for header-only requests, failures and
    /// deferred cache reads.
    pub fn downloaded_data(&self) -> Option<&[u8]> {
        self.body_data.as_deref()
    }

    /// Size of the downloaded payload. For deferred cache reads this counts
    /// bytes streamed to the sink rather than bytes held in memory.
    pub fn downloaded_data_size(&self) -> usize {
        self.downloaded_size
    }

    /// Takes ownership of the downloaded body, leaving the request empty.
    pub fn take_downloaded_data(&mut self) -> Option<Vec<u8>> {
        self.downloaded_size = 0;
        self.body_data.take()
    }

    pub(crate) fn set_header_data(&mut self, data: Option<Vec<u8>>) {
        self.header_data = data;
    }

    pub(crate) fn set_body_data(&mut self, data: Option<Vec<u8>>) {
        self.downloaded_size = data.as_ref().map_or(0, Vec::len);
        self.body_data = data;
    }

    /// Records a streamed payload size without materializing the bytes.
    pub(crate) fn set_streamed_size(&mut self, size: usize) {
        self.body_data = None;
        self.downloaded_size = size;
    }
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("http_status", &self.http_status)
            .field("downloaded_size", &self.downloaded_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn callback_fires_at_most_once_and_reports_existence() {
        let mut req = DownloadRequest::new("http://example.com/a");
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = Arc::clone(&hits);
        req.set_completion_callback(Box::new(move |_r| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(req.execute_callback(DownloadStatus::Ok));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Slot is empty now; a second completion reports no callback.
        assert!(!req.execute_callback(DownloadStatus::Ok));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_observes_recorded_status() {
        let mut req = DownloadRequest::new("http://example.com/a");
        let seen = Arc::new(Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        req.set_completion_callback(Box::new(move |r| {
            *seen2.lock().unwrap() = Some(r.status);
        }));
        req.execute_callback(DownloadStatus::Canceled);
        assert_eq!(*seen.lock().unwrap(), Some(DownloadStatus::Canceled));
    }

    #[test]
    fn rebinding_replaces_the_previous_callback() {
        let mut req = DownloadRequest::new("http://example.com/a");
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&first);
        req.set_completion_callback(Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        req.set_completion_callback(Box::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        req.execute_callback(DownloadStatus::Ok);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_visible_through_shared_token() {
        let req = DownloadRequest::new("http://example.com/a");
        let token = req.cancel_token();
        assert!(!req.is_canceled());
        token.cancel();
        assert!(req.is_canceled());
    }

    #[test]
    fn external_write_reports_consumed_bytes() {
        let mut req = DownloadRequest::new("http://example.com/a");
        assert_eq!(req.execute_external_write(b"data"), 0);
        let collected = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&collected);
        req.set_external_write_callback(Box::new(move |chunk| {
            c.lock().unwrap().extend_from_slice(chunk);
            chunk.len()
        }));
        assert_eq!(req.execute_external_write(b"data"), 4);
        assert_eq!(collected.lock().unwrap().as_slice(), b"data");
    }

    #[test]
    fn body_setters_track_size() {
        let mut req = DownloadRequest::new("http://example.com/a");
        req.set_body_data(Some(vec![1, 2, 3]));
        assert_eq!(req.downloaded_data_size(), 3);
        assert_eq!(req.downloaded_data(), Some(&[1u8, 2, 3][..]));

        req.set_streamed_size(4096);
        assert_eq!(req.downloaded_data_size(), 4096);
        assert!(req.downloaded_data().is_none());

        req.set_body_data(Some(vec![9]));
        assert_eq!(req.take_downloaded_data(), Some(vec![9]));
        assert_eq!(req.downloaded_data_size(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let a = DownloadRequest::new("http://example.com/a");
        let b = DownloadRequest::new("http://example.com/b");
        assert_ne!(a.id(), b.id());
    }
}
