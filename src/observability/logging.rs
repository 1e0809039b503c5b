//! Logging configuration.

use crate::errors::ConfigurationError;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Minimum level captured when `RUST_LOG` does not say otherwise
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Include timestamps
    pub include_timestamps: bool,
    /// Include the module target
    pub include_target: bool,
    /// Include file and line number
    pub include_file_line: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Most verbose
    Trace,
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Least verbose
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigurationError::Logging(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development
    Pretty,
    /// One JSON object per line, for log shipping
    Json,
    /// Single-line text
    Compact,
}

impl FromStr for LogFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(ConfigurationError::Logging(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_timestamps: true,
            include_target: true,
            include_file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Default configuration: info level, pretty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `JOBFETCH_LOG_LEVEL` and `JOBFETCH_LOG_FORMAT`; unknown values keep
    /// the default
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = std::env::var("JOBFETCH_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.level = level;
        }
        if let Some(format) = std::env::var("JOBFETCH_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.format = format;
        }
        config
    }

    /// Set the level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Include or omit timestamps
    pub fn with_timestamps(mut self, include: bool) -> Self {
        self.include_timestamps = include;
        self
    }

    /// Include or omit the module target
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Include or omit file and line number
    pub fn with_file_line(mut self, include: bool) -> Self {
        self.include_file_line = include;
        self
    }

    /// Install a global subscriber with this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Logging`] if a global subscriber is
    /// already installed.
    pub fn init(self) -> Result<(), ConfigurationError> {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy();

        tracing_subscriber::registry()
            .with(filter)
            .with(self.layer())
            .try_init()
            .map_err(|e| ConfigurationError::Logging(e.to_string()))
    }

    fn layer(&self) -> BoxedLayer {
        let target = self.include_target;
        let file_line = self.include_file_line;

        match (self.format, self.include_timestamps) {
            (LogFormat::Pretty, true) => fmt::layer()
                .with_target(target)
                .with_file(file_line)
                .with_line_number(file_line)
                .boxed(),
            (LogFormat::Pretty, false) => fmt::layer()
                .without_time()
                .with_target(target)
                .with_file(file_line)
                .with_line_number(file_line)
                .boxed(),
            (LogFormat::Json, true) => fmt::layer()
                .json()
                .with_target(target)
                .with_file(file_line)
                .with_line_number(file_line)
                .boxed(),
            (LogFormat::Json, false) => fmt::layer()
                .json()
                .without_time()
                .with_target(target)
                .with_file(file_line)
                .with_line_number(file_line)
                .boxed(),
            (LogFormat::Compact, true) => fmt::layer().compact().with_target(target).boxed(),
            (LogFormat::Compact, false) => fmt::layer()
                .compact()
                .without_time()
                .with_target(target)
                .boxed(),
        }
    }
}
