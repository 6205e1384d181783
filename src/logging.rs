//! Logging infrastructure - structured tracing around native crossings
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - One target per concern: `ffi`, `loader`, `callback`
//! - Zero-cost when disabled
//! - Pretty, compact or JSON output
//! - Optional daily-rotated file output

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::interop::ArgKind;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking writer flushing until process exit
static WORKER_GUARD: Mutex<Option<WorkerGuard>> = parking_lot::const_mutex(None);

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Single-line format
    #[default]
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    pub format: LogFormat,
    /// Log file path; stderr when unset
    pub file: Option<PathBuf>,
    /// Show span events (new/close)
    pub show_spans: bool,
    /// Extra filter directives (e.g. "loader=debug,ffi=off")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            file: None,
            show_spans: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // CROSSCALL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("CROSSCALL_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // CROSSCALL_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("CROSSCALL_LOG_FILE") {
            config.file = Some(PathBuf::from(path));
        }

        // CROSSCALL_LOG_JSON: enable JSON format
        if std::env::var("CROSSCALL_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        // CROSSCALL_LOG_SPANS: show span events
        config.show_spans = std::env::var("CROSSCALL_LOG_SPANS").is_ok();

        config
    }

    /// Verbose config for chasing down crossing problems
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            format: LogFormat::Pretty,
            file: None,
            show_spans: true,
            filter: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Parse a level name, case-insensitively
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration. Only the first call in a
/// process has an effect.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let (writer, guard) = match &config.file {
            Some(path) => {
                let (directory, prefix) = split_log_path(path);
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let span_events = if config.show_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(span_events)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(span_events)
                .with_thread_ids(cfg!(debug_assertions))
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(span_events)
                .boxed(),
        };

        // Another subscriber may already be installed by the host program
        if tracing_subscriber::registry()
            .with(layer.with_filter(build_filter(&config)))
            .try_init()
            .is_ok()
        {
            *WORKER_GUARD.lock() = Some(guard);
        }
    });
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(base, |filter, directive| match directive.parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("crosscall.log"));
    (directory, prefix)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Crossing events
// ============================================================================

/// Log a forward call about to cross into native code
#[inline]
pub fn log_native_call(addr: usize, gp_args: usize, fp_args: usize, stack_words: usize) {
    tracing::trace!(
        target: "ffi",
        event = "native_call",
        address = ?(addr as *const ()),
        gp_args,
        fp_args,
        stack_words,
        "Calling native function"
    );
}

/// Log a forward call back from native code
#[inline]
pub fn log_native_return(addr: usize, kind: ArgKind) {
    tracing::trace!(
        target: "ffi",
        event = "native_return",
        address = ?(addr as *const ()),
        returns = kind.c_name(),
        bytes = kind.size(),
        "Native function returned"
    );
}

/// Log a loader operation
pub fn log_loader_op(op: &str, subject: &str) {
    tracing::debug!(
        target: "loader",
        event = "loader_op",
        op,
        subject,
        "Loader operation"
    );
}

/// Log a loader failure
pub fn log_loader_error(op: &str, error: &str) {
    tracing::warn!(
        target: "loader",
        event = "loader_error",
        op,
        error,
        "Loader operation failed"
    );
}

/// Log a reverse crossing from native code
#[inline]
pub fn log_callback_dispatch(source: usize, count: usize) {
    tracing::trace!(
        target: "callback",
        event = "callback_dispatch",
        source = ?(source as *const ()),
        events = count,
        "Dispatching native callback"
    );
}

/// Log a failed reverse crossing
pub fn log_callback_error(error: &str) {
    tracing::error!(
        target: "callback",
        event = "callback_error",
        error,
        "Native callback failed"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}
