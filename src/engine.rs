//! The download engine: submission, lifecycle drivers, cache gating and
//! shutdown.
//!
//! A `Downloader` is constructed explicitly with its collaborators (worker
//! pool, optional cache store) and a resolved [`EngineConfig`]. Hosts that
//! want one shared engine wrap it in their own `OnceLock` at the composition
//! boundary; nothing here is global. `shutdown` joins the expiry sweeper and
//! drains pooled handles, and also runs on drop.

use crate::cache::{self, CacheEntry, CacheStore, CachedResponse};
use crate::config::EngineConfig;
use crate::handle_pool::{HandlePool, HandleTtl};
use crate::registry::RequestRegistry;
use crate::request::{
    CompletionFn, DownloadRequest, DownloadStatus, OwnerToken, RequestId,
};
use crate::transfer;
use crate::worker::{ThreadedWorkerPool, WorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Assumed CA bundle name when the environment does not override it. TLS
/// verification itself uses the system trust store; the path is kept for
/// transports that need an explicit file.
const DEFAULT_CA_CERTIFICATE: &str = "cacert.pem";

type DefaultCallback = Arc<dyn Fn(&mut DownloadRequest) + Send + Sync>;

/// Download-orchestration engine. See the crate docs for the lifecycle.
pub struct Downloader {
    config: EngineConfig,
    pool: Arc<HandlePool>,
    workers: Arc<dyn WorkerPool>,
    cache: Option<Mutex<Box<dyn CacheStore>>>,
    registry: RequestRegistry,
    default_callback: Mutex<Option<DefaultCallback>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
    ca_cert_file: String,
}

impl Downloader {
    /// Builds an engine over an injected worker pool and cache store.
    pub fn new(
        config: EngineConfig,
        workers: Arc<dyn WorkerPool>,
        cache: Option<Box<dyn CacheStore>>,
    ) -> Arc<Self> {
        curl::init();
        let pool = Arc::new(HandlePool::new(
            config.handle_reuse_enabled,
            config.pool_capacity(),
        ));
        let sweeper = if config.handle_reuse_enabled {
            tracing::debug!(
                capacity = config.pool_capacity(),
                "handle reuse enabled, starting expiry sweeper"
            );
            Some(pool.spawn_sweeper(config.sweep_interval()))
        } else {
            None
        };
        let ca_cert_file = std::env::var("CA_CERTIFICATE_FILE")
            .unwrap_or_else(|_| DEFAULT_CA_CERTIFICATE.to_string());
        Arc::new(Self {
            config,
            pool,
            workers,
            cache: cache.map(Mutex::new),
            registry: RequestRegistry::new(),
            default_callback: Mutex::new(None),
            sweeper: Mutex::new(sweeper),
            shut_down: AtomicBool::new(false),
            ca_cert_file,
        })
    }

    /// Builds an engine with its own threaded worker pool and no cache store.
    pub fn with_defaults(config: EngineConfig) -> Arc<Self> {
        let workers = Arc::new(ThreadedWorkerPool::new(config.worker_threads));
        Self::new(config, workers, None)
    }

    /// Registers `request` and schedules it on the worker pool, keyed by its
    /// URL. The engine owns the request from here; interact with it through
    /// the returned id (plus the request's owner token) and its callbacks.
    pub fn submit(self: &Arc<Self>, mut request: DownloadRequest) -> RequestId {
        if request.handle_ttl.is_none() {
            request.handle_ttl = Some(self.default_ttl());
        }
        let id = request.id();
        tracing::debug!(url = %request.url, tag = %request.tag, "request submitted");
        self.registry.insert(&request);
        let engine = Arc::clone(self);
        let key = request.url.clone();
        self.workers.execute(
            key,
            Box::new(move || {
                if request.byte_range_enabled {
                    engine.download_file_as_byte_range(request);
                } else {
                    engine.download_file(request);
                }
            }),
        );
        id
    }

    /// Asks the worker pool to run the pending request for `url` sooner.
    pub fn raise_priority(&self, url: &str) {
        self.workers.raise_priority(url);
    }

    /// Installs the fallback invoked for requests completing without a
    /// callback of their own.
    pub fn set_default_callback(&self, f: impl Fn(&mut DownloadRequest) + Send + Sync + 'static) {
        *self.default_callback.lock().unwrap() = Some(Arc::new(f));
    }

    /// Cancels the in-flight request matching `id` and `owner`.
    pub fn cancel_request(&self, id: RequestId, owner: OwnerToken) -> bool {
        self.registry.cancel(id, owner)
    }

    /// Cancels every in-flight request.
    pub fn cancel_all_requests(&self) {
        self.registry.cancel_all();
    }

    /// Rebinds the completion callback of an in-flight request.
    pub fn set_completion_callback(
        &self,
        id: RequestId,
        owner: OwnerToken,
        f: CompletionFn,
    ) -> bool {
        self.registry.set_completion(id, owner, f)
    }

    /// Cancellation status of an in-flight request.
    pub fn is_request_canceled(&self, id: RequestId, owner: OwnerToken) -> bool {
        self.registry.is_canceled(id, owner)
    }

    /// Number of requests between submission and completion.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Idle transport handles currently pooled.
    pub fn idle_handles(&self) -> usize {
        self.pool.idle_count()
    }

    /// CA bundle path from `CA_CERTIFICATE_FILE`, read once at construction.
    pub fn ca_cert_file(&self) -> &str {
        &self.ca_cert_file
    }

    /// Runs the whole-body lifecycle for `request` on the current thread:
    /// cancellation checkpoint, cache gate, network transfer, completion
    /// callback, cache populate, deregistration.
    pub fn download_file(&self, mut request: DownloadRequest) {
        if self.finish_if_canceled(&mut request) {
            return;
        }

        let use_cache = self.config.cache_enabled && request.cache_enabled;
        let mut cache_hit = if use_cache {
            self.consult_cache(&mut request)
        } else {
            None
        };

        let mut nw_success = false;
        if let Some(hit) = cache_hit.as_mut() {
            if request.defer_cache_read {
                if let Some(mut reader) = hit.reader.take() {
                    tracing::info!(url = %request.url, "reading from cache start");
                    cache::stream_deferred(
                        reader.as_mut(),
                        request.cached_read_chunk,
                        &mut request,
                    );
                    tracing::info!(url = %request.url, "reading from cache end");
                }
            }
        } else {
            nw_success = transfer::whole::download_from_network(
                &self.pool,
                &mut request,
                self.default_ttl(),
                self.config.transfer_timeout_secs,
            );
        }

        let status = request.status;
        self.run_completion(&mut request, status);
        self.store_results(&mut request, nw_success, cache_hit, use_cache, false);
        self.registry.remove(request.id());
    }

    /// Runs the segmented lifecycle for `request` on the current thread. On
    /// a probe redirect the executor runs twice (once against the original
    /// URL, once against the resolved target); the second outcome is
    /// authoritative and the logical URL is restored before completion.
    pub fn download_file_as_byte_range(&self, mut request: DownloadRequest) {
        if self.finish_if_canceled(&mut request) {
            return;
        }

        let use_cache = self.config.cache_enabled && request.cache_enabled;
        let mut cache_hit = if use_cache {
            self.consult_cache(&mut request)
        } else {
            None
        };

        let mut nw_success = false;
        if let Some(hit) = cache_hit.as_mut() {
            if !request.download_only && request.defer_cache_read {
                if let Some(mut reader) = hit.reader.take() {
                    tracing::info!(url = %request.url, "reading from cache start");
                    cache::stream_deferred(
                        reader.as_mut(),
                        request.cached_read_chunk,
                        &mut request,
                    );
                    tracing::info!(url = %request.url, "reading from cache end");
                }
            }
        } else {
            let actual_url = request.url.clone();
            let (ok, redirect) = transfer::ranged::download_byte_range_from_network(
                &self.pool,
                &mut request,
                self.default_ttl(),
                self.config.transfer_timeout_secs,
                self.config.max_retries,
            );
            nw_success = ok;
            if redirect {
                let (ok, _) = transfer::ranged::download_byte_range_from_network(
                    &self.pool,
                    &mut request,
                    self.default_ttl(),
                    self.config.transfer_timeout_secs,
                    self.config.max_retries,
                );
                nw_success = ok;
                request.url = actual_url;
            }
        }

        let status = request.status;
        self.run_completion(&mut request, status);
        self.store_results(&mut request, nw_success, cache_hit, use_cache, true);
        self.registry.remove(request.id());
    }

    /// Stops the sweeper, joins it and drains pooled handles. Idempotent;
    /// also invoked on drop. The worker pool belongs to whoever injected it.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.stop_sweeper();
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            if handle.join().is_err() {
                tracing::error!("handle sweeper thread panicked");
            }
        }
        self.pool.drain();
        tracing::debug!("downloader shut down");
    }

    fn default_ttl(&self) -> HandleTtl {
        HandleTtl::from_secs(self.config.handle_reuse_ttl_secs)
    }

    /// Cancellation checkpoint at driver entry: completes the request with
    /// the canceled status before any network work.
    fn finish_if_canceled(&self, request: &mut DownloadRequest) -> bool {
        if !request.is_canceled() {
            return false;
        }
        request.set_header_data(None);
        request.set_body_data(None);
        request.error = Some("canceled request".to_string());
        self.run_completion(request, DownloadStatus::Canceled);
        self.registry.remove(request.id());
        true
    }

    fn consult_cache(&self, request: &mut DownloadRequest) -> Option<CachedResponse> {
        let store = self.cache.as_ref()?;
        let mut store = store.lock().unwrap();
        cache::consult(&mut **store, request)
    }

    fn run_completion(&self, request: &mut DownloadRequest, status: DownloadStatus) {
        if !request.execute_callback(status) {
            let default = self.default_callback.lock().unwrap().clone();
            match default {
                Some(cb) => cb(request),
                None => tracing::debug!(url = %request.url, "request completed with no callback"),
            }
        }
    }

    /// Cache writes after delivery: populate from a successful network
    /// fetch (excluding partial/redirect responses), rewrite a
    /// store-reported updated entry, and drop in-memory copies of
    /// cache-sourced data.
    fn store_results(
        &self,
        request: &mut DownloadRequest,
        nw_success: bool,
        cache_hit: Option<CachedResponse>,
        use_cache: bool,
        ranged: bool,
    ) {
        if nw_success && use_cache {
            let cacheable = if ranged {
                cache::ranged_response_cacheable(request)
            } else {
                cache::whole_body_status_cacheable(request.http_status)
            };
            if cacheable {
                match self.cache.as_ref() {
                    Some(store) => {
                        let entry = CacheEntry {
                            url: request.url.clone(),
                            header: request.header_data().map(<[u8]>::to_vec).unwrap_or_default(),
                            body: request
                                .downloaded_data()
                                .map(<[u8]>::to_vec)
                                .unwrap_or_default(),
                        };
                        if let Err(e) = store.lock().unwrap().insert(entry) {
                            tracing::warn!(url = %request.url, error = %e, "cache data not added");
                        }
                    }
                    None => tracing::warn!(url = %request.url, "cache data not added"),
                }
            }
        }

        if let Some(hit) = cache_hit {
            if hit.updated && !(ranged && request.download_only) {
                if let Some(store) = self.cache.as_ref() {
                    let mut store = store.lock().unwrap();
                    if let Err(e) = store.remove(&request.url) {
                        tracing::warn!(url = %request.url, error = %e, "removing stale cache entry failed");
                    }
                    if hit.writable {
                        let entry = CacheEntry {
                            url: request.url.clone(),
                            header: hit.header,
                            body: hit.body,
                        };
                        if let Err(e) = store.insert(entry) {
                            tracing::warn!(url = %request.url, error = %e, "adding url to cache failed");
                        }
                    }
                }
            }
            // The payload was already delivered from the cache (directly or
            // via streaming); the request must not keep a second copy.
            request.set_header_data(None);
            request.set_body_data(None);
        }
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
