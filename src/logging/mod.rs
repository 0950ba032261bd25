//! Logging setup for GraphForge.
//!
//! Built on the `tracing` ecosystem. Build and run paths emit structured
//! events; this module wires up a subscriber with either human-readable or
//! JSON output.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (takes precedence)
//! - `GRAPHFORGE_LOG_LEVEL`: simple level (error, warn, info, debug, trace)
//! - `GRAPHFORGE_LOG_FORMAT`: "human" (default) or "json"

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "GRAPHFORGE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "GRAPHFORGE_LOG_FORMAT";

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console output (default)
    #[default]
    Human,
    /// JSON lines, for log aggregation
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Initialize logging from the environment. Idempotent; later calls are
/// no-ops.
pub fn init_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::from_str(&s))
            .unwrap_or_default();
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::from_str(&s))
            .unwrap_or_default();
        init_subscriber(level, format);
    });
}

/// Initialize logging with an explicit level and format, ignoring the
/// environment (except `RUST_LOG`, which always wins). Idempotent.
pub fn init_logging_with(level: LogLevel, format: LogFormat) {
    TRACING_INITIALIZED.get_or_init(|| {
        init_subscriber(level, format);
    });
}

fn init_subscriber(level: LogLevel, format: LogFormat) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) => EnvFilter::try_new(spec)
            .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str())),
        Err(_) => EnvFilter::new(level.as_filter_str()),
    };
    // try_init rather than init: tests and embedding applications may have
    // installed a subscriber already
    match format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
        LogFormat::Human => {
            let layer = fmt::layer().with_target(true);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
    }
}

/// Whether a subscriber has been installed through this module
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging();
        init_logging();
        assert!(is_initialized());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::from_str("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("nope"), None);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(LogFormat::from_str("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_str("human"), Some(LogFormat::Human));
        assert_eq!(LogFormat::from_str("xml"), None);
    }
}
