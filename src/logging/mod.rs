//! Logging subsystem
//!
//! Structured logging via tracing with support for JSON (production) and
//! plaintext (development) output formats.
//!
//! # Log Targets
//!
//! Use these consistent target names across the codebase:
//! - `http` - request pipeline and HTTP server
//! - `session` - session resolution, flash data and finalization
//! - `page` - page views and rendering
//! - `config` - configuration loading
//!
//! # Environment Variables
//!
//! - `PAGEFLOW_LOG` - Primary log level/filter (takes precedence)
//! - `RUST_LOG` - Fallback log level/filter
//!
//! # Examples
//!
//! ```no_run
//! use pageflow::logging::{init_logging, LogConfig, LogFormat, LogOutput};
//!
//! // Development setup (plaintext to stdout)
//! init_logging(LogConfig::development()).unwrap();
//!
//! // Custom setup with file output
//! init_logging(LogConfig {
//!     format: LogFormat::Json,
//!     output: LogOutput::File("/var/log/pageflow.log".into()),
//!     default_level: tracing::Level::INFO,
//! }).unwrap();
//! ```

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Guard to track if logging has been initialized
static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production (structured logs)
    Json,
    /// Human-readable plaintext for development
    #[default]
    Plaintext,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// Write to stdout
    #[default]
    Stdout,
    /// Write to stderr
    Stderr,
    /// Write to a file at the given path
    File(PathBuf),
}

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (JSON or plaintext)
    pub format: LogFormat,
    /// Output destination (stdout, stderr, or file)
    pub output: LogOutput,
    /// Default log level when no env filter is set
    pub default_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Create a development configuration (plaintext to stdout, debug level)
    pub fn development() -> Self {
        Self {
            format: LogFormat::Plaintext,
            output: LogOutput::Stdout,
            default_level: Level::DEBUG,
        }
    }

    /// Create a production configuration (JSON to stdout, info level)
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            default_level: Level::INFO,
        }
    }
}

/// Parse a level name ("trace", "debug", "info", "warn", "error").
pub fn parse_level(level: &str) -> Option<Level> {
    Level::from_str(level.trim()).ok()
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("failed to parse log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("failed to initialize subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build an EnvFilter from environment variables or default level.
///
/// Checks PAGEFLOW_LOG first, then RUST_LOG, falling back to the default level.
fn build_env_filter(default_level: Level) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = std::env::var("PAGEFLOW_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return Ok(EnvFilter::try_new(filter)?);
    }

    // Default filter with standard targets
    let default_filter = format!(
        "{level},{http}={level},{session}={level},{page}={level},{config}={level}",
        level = default_level.as_str().to_lowercase(),
        http = targets::HTTP,
        session = targets::SESSION,
        page = targets::PAGE,
        config = targets::CONFIG,
    );
    Ok(EnvFilter::try_new(default_filter)?)
}

fn make_writer(output: &LogOutput) -> Result<(BoxMakeWriter, bool), LoggingError> {
    Ok(match output {
        LogOutput::Stdout => (BoxMakeWriter::new(io::stdout), true),
        LogOutput::Stderr => (BoxMakeWriter::new(io::stderr), true),
        LogOutput::File(path) => {
            let file = File::create(path)?;
            (BoxMakeWriter::new(file), false)
        }
    })
}

fn try_init_subscriber(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.default_level)?;
    let (writer, ansi) = make_writer(&config.output)?;

    // RFC 3339 timestamp format
    let timer = UtcTime::rfc_3339();

    match config.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_ansi(ansi)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(writer)
                .with_filter(filter);

            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Initialize the logging subsystem with the given configuration.
///
/// This function should be called once at application startup. Subsequent calls
/// will return an error.
///
/// # Errors
///
/// Returns an error if:
/// - Logging has already been initialized
/// - The log file cannot be created (for file output)
/// - The environment filter is invalid
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    try_init_subscriber(&config)
}

/// Initialize logging for tests.
///
/// Initializes plaintext debug logging and silently ignores errors if a
/// subscriber is already installed, so it is safe to call from every test.
pub fn init_test_logging() {
    let _ = try_init_subscriber(&LogConfig::development());
}

/// Log target constants for consistent naming across the codebase
pub mod targets {
    /// Request pipeline and HTTP server
    pub const HTTP: &str = "http";
    /// Session resolution, flash data and finalization
    pub const SESSION: &str = "session";
    /// Page views and rendering
    pub const PAGE: &str = "page";
    /// Configuration loading
    pub const CONFIG: &str = "config";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Mutex to serialize tests that modify global state (env vars).
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Plaintext);
        assert_eq!(config.output, LogOutput::Stdout);
        assert_eq!(config.default_level, Level::INFO);
    }

    #[test]
    fn test_log_config_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Plaintext);
        assert_eq!(dev.default_level, Level::DEBUG);

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.default_level, Level::INFO);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert!(serde_json::from_str::<LogFormat>("\"xml\"").is_err());
    }

    #[test]
    fn test_build_env_filter_default() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("PAGEFLOW_LOG");
        std::env::remove_var("RUST_LOG");

        let filter = build_env_filter(Level::WARN).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("session=warn"));
        assert!(rendered.contains("http=warn"));
    }

    #[test]
    fn test_build_env_filter_prefers_pageflow_log() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("PAGEFLOW_LOG", "session=trace");
        std::env::set_var("RUST_LOG", "error");

        let filter = build_env_filter(Level::INFO).unwrap();
        assert!(filter.to_string().contains("session=trace"));

        std::env::remove_var("PAGEFLOW_LOG");
        std::env::remove_var("RUST_LOG");
    }

    #[test]
    fn test_build_env_filter_invalid() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("PAGEFLOW_LOG", "session=notalevel");
        let result = build_env_filter(Level::INFO);
        std::env::remove_var("PAGEFLOW_LOG");
        assert!(matches!(result, Err(LoggingError::FilterParse(_))));
    }

    #[test]
    fn test_make_writer_file() {
        let temp = NamedTempFile::new().unwrap();
        let (_, ansi) = make_writer(&LogOutput::File(temp.path().to_path_buf())).unwrap();
        assert!(!ansi);
    }

    #[test]
    fn test_make_writer_bad_path() {
        let result = make_writer(&LogOutput::File("/nonexistent-dir/x/y.log".into()));
        assert!(matches!(result, Err(LoggingError::FileCreation(_))));
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
