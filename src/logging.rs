//! Logging setup for forkpool.
//!
//! Progress lines, fork/reap events and worker failures all go through
//! `tracing`. Forked workers inherit the parent's subscriber, so their
//! events land in the same stream.
//!
//! # Environment Variables
//!
//! - `FORKPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `FORKPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `FORKPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `FORKPOOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `FORKPOOL_LOG_ROTATION` - Log file rotation: never, hourly, daily
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use forkpool::logging::{LogConfig, init};
//!
//! init(LogConfig::default().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field human-readable lines (default)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// How the `--log-file` target is split over time.
///
/// Long batch runs can fill a single file, so a run may ask for one file per
/// hour or per day. Rotated files get a date suffix after the given name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    /// Write to exactly the given path.
    #[default]
    Never,
    Hourly,
    Daily,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "none" | "off" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(format!(
                "Unknown log rotation: '{}'. Valid options: never, hourly, daily",
                other
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO, so heartbeats are visible)
    pub level: Level,
    pub format: LogFormat,
    /// Extra log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    pub show_target: bool,
    /// Colored stderr output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            rotation: LogRotation::Never,
            filter: None,
            show_target: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Same as [`LogConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for the CLI: `-q` shows errors only, `-v` debug, `-vv` trace.
    pub fn for_cli(verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        };
        Self::default().with_level(level)
    }

    /// Set the base log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Also write logs to `path`.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Set how the log file is rotated.
    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Use an `EnvFilter` directive string instead of the level.
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Enable or disable colored stderr output.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter from `FORKPOOL_LOG`/`RUST_LOG` replaces the level. Values set
    /// explicitly on the builder before this call win over the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = lookup("FORKPOOL_LOG").or_else(|| lookup("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level) = lookup("FORKPOOL_LOG_LEVEL").and_then(|s| parse_level(&s))
        {
            self.level = level;
        }

        if let Some(format) = lookup("FORKPOOL_LOG_FORMAT").and_then(|s| s.parse().ok()) {
            self.format = format;
        }

        if let Some(rotation) = lookup("FORKPOOL_LOG_ROTATION").and_then(|s| s.parse().ok()) {
            self.rotation = rotation;
        }

        if self.file_path.is_none()
            && let Some(path) = lookup("FORKPOOL_LOG_FILE")
        {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn fmt_layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_target(self.show_target)
            .with_ansi(ansi)
            .with_writer(writer);
        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.boxed(),
        }
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("forkpool.log");
    RollingFileAppender::new(rotation.into(), parent, file_name)
}

/// Initialize the global tracing subscriber.
///
/// Logs to stderr, plus the configured file if any. Calling this more than
/// once is harmless; later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers: Vec<BoxedLayer> = vec![config.fmt_layer(std::io::stderr, config.ansi)];
    if let Some(path) = &config.file_path {
        layers.push(config.fmt_layer(file_appender(path, config.rotation), false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}
