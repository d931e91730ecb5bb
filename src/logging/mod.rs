//! Diagnostics and raw IRC traffic logging.
//!
//! Diagnostics go through `tracing`; [`init_tracing`] installs the subscriber.
//! When enabled, [`IrcLogger`] additionally writes every line sent or received
//! on a chat link to daily log files named `<nickname>_<date>.log` in the
//! configured log directory (default: `~/.local/share/crabbooks/logs/`).

use crate::config::LoggingConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Which way a logged line travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn marker(self) -> &'static str {
        match self {
            Direction::Inbound => "<<",
            Direction::Outbound => ">>",
        }
    }
}

/// Writes the raw IRC lines of one chat link to a daily log file.
///
/// Cloning is cheap; clones share the same file handles, so the writer side
/// and the reader side of a link can both log. File handles are cached for
/// the lifetime of the logger. A file that cannot be opened is skipped.
#[derive(Clone)]
pub struct IrcLogger {
    inner: Arc<Mutex<LoggerInner>>,
}

struct LoggerInner {
    log_dir: PathBuf,
    target: String,
    file_handles: HashMap<String, Option<fs::File>>,
}

impl IrcLogger {
    /// Returns `None` when IRC logging is disabled.
    pub fn new(config: &LoggingConfig, nickname: &str) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::with_dir(expand_home(&config.log_dir), nickname))
    }

    fn with_dir(log_dir: PathBuf, nickname: &str) -> Self {
        // Sanitize nickname for filename
        let target: String = nickname
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(LoggerInner {
                log_dir,
                target,
                file_handles: HashMap::new(),
            })),
        }
    }

    /// Append one line to today's log file.
    pub fn log_line(&self, direction: Direction, line: &str) {
        let now = chrono::Local::now();
        let entry = format!("[{}] {} {}", now.format("%H:%M:%S"), direction.marker(), line);

        let mut inner = self.inner.lock();
        let filename = format!("{}_{}.log", inner.target, now.format("%Y-%m-%d"));
        let log_dir = inner.log_dir.clone();
        let handle = inner.file_handles.entry(filename.clone()).or_insert_with(|| {
            let _ = fs::create_dir_all(&log_dir);
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join(&filename))
            {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(file = %filename, error = %e, "IRC log file unavailable");
                    None
                }
            }
        });
        if let Some(file) = handle {
            let _ = writeln!(file, "{}", entry);
        }
    }
}

/// Expand a leading `~` in a configured path.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
