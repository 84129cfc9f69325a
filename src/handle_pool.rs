//! Origin-keyed pool of reusable transport handles with time-based expiry.
//!
//! Connection setup (DNS, TLS handshake) dominates the cost of small fetches
//! against one origin, so released handles are kept warm and handed back to
//! later requests for the same origin. A background sweeper destroys handles
//! whose expiry has passed; it holds the pool lock only while scanning.

use curl::easy::Easy;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Pool lifetime granted to a handle on release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandleTtl {
    /// Destroy the handle instead of pooling it.
    Drop,
    /// Pool the handle without an expiry; only shutdown reclaims it.
    Never,
    /// Pool the handle until `now + duration`.
    After(Duration),
}

impl HandleTtl {
    /// Maps the sign convention used in configuration: zero destroys,
    /// negative pools forever, positive pools for that many seconds.
    pub fn from_secs(secs: f64) -> Self {
        if secs == 0.0 {
            HandleTtl::Drop
        } else if secs < 0.0 {
            HandleTtl::Never
        } else {
            HandleTtl::After(Duration::from_secs_f64(secs))
        }
    }
}

struct PooledHandle {
    easy: Easy,
    origin: String,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

/// Bounded pool of idle transport handles.
///
/// A handle is removed from the pool before it is handed out, so no two
/// callers ever share one; `release` returns it (or destroys it, depending
/// on TTL and capacity).
pub struct HandlePool {
    idle: Mutex<Vec<PooledHandle>>,
    reuse_enabled: bool,
    capacity: usize,
    sweeper_stop: Mutex<bool>,
    sweeper_cv: Condvar,
}

impl HandlePool {
    pub fn new(reuse_enabled: bool, capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            reuse_enabled,
            capacity,
            sweeper_stop: Mutex::new(false),
            sweeper_cv: Condvar::new(),
        }
    }

    /// Returns a handle ready for configuration.
    ///
    /// Prefers the most-recently-released handle matching `origin`; with no
    /// match, evicts the least-recently-released handle for cross-origin
    /// reuse (the executor resets it and clears cookies before use). Creates
    /// a fresh handle when reuse is disabled or the pool is empty.
    pub fn acquire(&self, origin: &str) -> Easy {
        if self.reuse_enabled {
            let mut idle = self.idle.lock().unwrap();
            if let Some(pos) = idle.iter().rposition(|h| h.origin == origin) {
                return idle.remove(pos).easy;
            }
            if !idle.is_empty() {
                return idle.remove(0).easy;
            }
        }
        Easy::new()
    }

    /// Returns `easy` to the pool under `ttl`, or destroys it when reuse is
    /// disabled, the TTL is `Drop`, or the pool is at capacity.
    pub fn release(&self, easy: Easy, ttl: HandleTtl, origin: &str) {
        if !self.reuse_enabled {
            return;
        }
        let expires_at = match ttl {
            HandleTtl::Drop => return,
            HandleTtl::Never => None,
            HandleTtl::After(d) => Some(Instant::now() + d),
        };
        let mut idle = self.idle.lock().unwrap();
        if idle.len() >= self.capacity {
            tracing::debug!(origin, "handle pool full, destroying handle");
            return;
        }
        idle.push(PooledHandle {
            easy,
            origin: origin.to_string(),
            expires_at,
        });
    }

    /// Destroys every pooled handle whose expiry has passed. Returns how
    /// many were destroyed; running it again with no intervening releases
    /// destroys nothing further.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut idle = self.idle.lock().unwrap();
        let before = idle.len();
        idle.retain(|h| match h.expires_at {
            Some(deadline) => deadline > now,
            None => true,
        });
        before - idle.len()
    }

    /// Number of idle handles currently pooled.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Destroys every pooled handle. Used at engine shutdown.
    pub fn drain(&self) {
        self.idle.lock().unwrap().clear();
    }

    /// Starts the background expiry sweeper. The thread scans every
    /// `interval` until [`HandlePool::stop_sweeper`] is called; stopping is
    /// condvar-signalled so shutdown never waits out the interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> thread::JoinHandle<()> {
        let pool = Arc::clone(self);
        thread::spawn(move || {
            let mut stop = pool.sweeper_stop.lock().unwrap();
            loop {
                let (guard, _) = pool
                    .sweeper_cv
                    .wait_timeout(stop, interval)
                    .unwrap();
                stop = guard;
                if *stop {
                    break;
                }
                drop(stop);
                let removed = pool.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "expired transport handles destroyed");
                }
                stop = pool.sweeper_stop.lock().unwrap();
            }
        })
    }

    /// Signals the sweeper thread to exit. Idempotent.
    pub fn stop_sweeper(&self) {
        *self.sweeper_stop.lock().unwrap() = true;
        self.sweeper_cv.notify_all();
    }

    #[cfg(test)]
    fn idle_origins(&self) -> Vec<String> {
        self.idle
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.origin.clone())
            .collect()
    }
}
