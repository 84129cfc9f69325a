use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default TTL applied when a request does not override its handle's
/// pool lifetime (5 minutes).
pub const DEFAULT_HANDLE_TTL_SECS: f64 = 5.0 * 60.0;

/// Default overall transfer timeout applied unless a request opts into the
/// transport's own default.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 30;

/// Interval between expiry sweeps over the handle pool.
pub const DEFAULT_SWEEP_INTERVAL_SECS: f64 = 30.0;

/// Engine configuration, resolved once at engine construction.
///
/// Every optional behavior of the engine (cache gate, handle reuse, retry
/// bound) is a runtime field here rather than a build-time switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consult/populate the installed cache store. Requests can still opt
    /// out individually; with no store installed this has no effect.
    pub cache_enabled: bool,
    /// Keep transport handles pooled between requests sharing an origin.
    /// When false every request creates and destroys its own handle.
    pub handle_reuse_enabled: bool,
    /// Pool lifetime granted to a released handle when its request did not
    /// override it. 0 destroys handles on release; negative pools them
    /// without expiry.
    pub handle_reuse_ttl_secs: f64,
    /// Maximum number of idle handles kept in the pool; releases beyond
    /// this destroy the handle. Defaults to `worker_threads`.
    #[serde(default)]
    pub pool_capacity: Option<usize>,
    /// Interval between expiry sweeps of the handle pool, in seconds.
    pub sweep_interval_secs: f64,
    /// Worker threads for the default worker pool.
    pub worker_threads: usize,
    /// Retry bound for connection-refused failures in byte-range mode when
    /// the request does not override it (0 = no retry).
    pub max_retries: u32,
    /// Overall transfer timeout in seconds for requests that do not opt
    /// into the transport default.
    pub transfer_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            handle_reuse_enabled: true,
            handle_reuse_ttl_secs: DEFAULT_HANDLE_TTL_SECS,
            pool_capacity: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            worker_threads: 4,
            max_retries: 0,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Resolved idle-handle capacity.
    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity.unwrap_or(self.worker_threads)
    }

    /// Resolved sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sweep_interval_secs.max(0.001))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchpool")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
