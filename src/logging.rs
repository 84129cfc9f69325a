//! Logging init for hosts that want the engine's default setup: a log file
//! under the XDG state dir, falling back to stderr when the file (or the
//! directory) is unusable.
//!
//! Embedders with their own `tracing` subscriber should skip this entirely;
//! the engine only emits events and never installs a subscriber on its own.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Per-event writer: the shared log file when it can be cloned, stderr
/// otherwise.
enum LogWriter {
    File(fs::File),
    Stderr,
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::File(f) => f.write(buf),
            LogWriter::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::File(f) => f.flush(),
            LogWriter::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct LogFile(fs::File);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(LogWriter::File)
            .unwrap_or(LogWriter::Stderr)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fetchpool=debug"))
}

/// Installs a `tracing` subscriber writing to
/// `$XDG_STATE_HOME/fetchpool/fetchpool.log` and returns the log path.
///
/// When the state dir cannot be prepared, logs go to stderr instead and
/// `None` is returned. Installing over an existing subscriber is not an
/// error; the existing one stays in effect.
pub fn init_logging() -> Result<Option<PathBuf>> {
    match open_log_file() {
        Ok((file, path)) => {
            let installed = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(LogFile(file))
                .with_ansi(false)
                .try_init()
                .is_ok();
            if installed {
                tracing::info!("fetchpool logging initialized at {}", path.display());
            }
            Ok(Some(path))
        }
        Err(e) => {
            tracing::debug!(error = %e, "log file unavailable, using stderr");
            init_logging_stderr();
            Ok(None)
        }
    }
}

/// Installs a stderr-only subscriber. No effect if one is already set.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn open_log_file() -> Result<(fs::File, PathBuf)> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchpool")?;
    let log_dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let path = log_dir.join("fetchpool.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    Ok((file, path))
}
