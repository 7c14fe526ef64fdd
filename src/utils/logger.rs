//! Logging setup
//!
//! One `tracing` subscriber per process, filtered to this crate's events.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::OrchestratorError;

/// Log level configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// `--verbose` wins over an explicit level
    pub fn resolve(level: Option<&str>, verbose: bool) -> Self {
        if verbose {
            return LogLevel::Debug;
        }
        level.and_then(|l| l.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for LogLevel {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(OrchestratorError::InvalidConfig(format!("unknown log level: {s}"))),
        }
    }
}

/// Directive used when `RUST_LOG` is unset
pub fn default_directive(level: LogLevel) -> String {
    format!("testweave={}", level.to_tracing_level())
}

/// Initialize the logger with specified level; `RUST_LOG` overrides it
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    // A second initialisation (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
