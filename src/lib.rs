//! fetchpool: origin-pooled HTTP download engine.
//!
//! Callers build a [`DownloadRequest`], submit it to a [`Downloader`], and
//! receive the outcome through the request's completion callback on a worker
//! thread. Transport handles are pooled per origin with time-based expiry,
//! byte-range mode fetches large resources as ordered segments with bounded
//! retry and redirect re-resolution, and an optional cache store is
//! consulted before (and populated after) the network path.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod cors;
pub mod engine;
pub mod handle_pool;
pub mod logging;
pub mod origin;
pub mod registry;
pub mod request;
mod transfer;
pub mod worker;

pub use cache::{CacheEntry, CacheStore, CachedResponse, MemoryCacheStore};
pub use config::EngineConfig;
pub use engine::Downloader;
pub use handle_pool::{HandlePool, HandleTtl};
pub use request::{
    DownloadMetrics, DownloadRequest, DownloadStatus, OwnerToken, RequestId,
};
pub use worker::{ThreadedWorkerPool, WorkerPool};
