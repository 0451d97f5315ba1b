//! Shared logging utilities for Archivist binaries.
//!
//! Console output always goes to stderr. Mutating commands that really touch an
//! archive also append to `<root>/_metadata/logs/<app>.log`. Commands are short,
//! so the file is rotated when a command opens it rather than while writing:
//! once it passes [`MAX_LOG_FILE_SIZE`] it becomes `<app>.log.1`, older files
//! shift up, and at most [`KEPT_LOG_FILES`] old files remain.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "archivist=info,archivist_db=warn";
const VERBOSE_LOG_FILTER: &str = "archivist=debug,archivist_db=debug";
pub const KEPT_LOG_FILES: usize = 4;
pub const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by Archivist binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Directory for the archive log. `None` disables the file layer.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with stderr output and, when configured, the archive log file.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match config.log_dir {
        Some(dir) => {
            let file = open_archive_log(&dir, config.app_name, KEPT_LOG_FILES, MAX_LOG_FILE_SIZE)
                .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
            let file_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter));
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}

/// Get the Archivist home directory: `$ARCHIVIST_HOME` or `~/.archivist`.
pub fn archivist_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("ARCHIVIST_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".archivist"))
        .ok_or_else(|| anyhow!("Could not determine home directory. Set ARCHIVIST_HOME to continue."))
}

/// Open `<dir>/<name>.log` for appending, rotating it first when it is larger than `max_size`.
fn open_archive_log(dir: &Path, name: &str, keep: usize, max_size: u64) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    let stem = log_stem(name);
    let current = numbered_log(dir, &stem, 0);
    let size = fs::metadata(&current).map(|meta| meta.len()).unwrap_or(0);
    if size > max_size {
        rotate_logs(dir, &stem, keep)?;
    }
    OpenOptions::new().create(true).append(true).open(current)
}

/// Shift `<stem>.log.N` to `N + 1`, dropping whatever would pass `keep`.
fn rotate_logs(dir: &Path, stem: &str, keep: usize) -> io::Result<()> {
    if keep == 0 {
        return fs::remove_file(numbered_log(dir, stem, 0));
    }
    let oldest = numbered_log(dir, stem, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (0..keep).rev() {
        let from = numbered_log(dir, stem, n);
        if from.exists() {
            fs::rename(&from, numbered_log(dir, stem, n + 1))?;
        }
    }
    Ok(())
}

/// `<stem>.log` for 0, `<stem>.log.N` otherwise.
fn numbered_log(dir: &Path, stem: &str, n: usize) -> PathBuf {
    match n {
        0 => dir.join(format!("{}.log", stem)),
        n => dir.join(format!("{}.log.{}", stem, n)),
    }
}

fn log_stem(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}
