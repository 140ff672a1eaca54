//! Logging setup
//!
//! The crate logs through `tracing`; the binary installs a compact
//! `tracing-subscriber` formatter filtered to this crate, next to a capture
//! layer that keeps each case's debug output for its result.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use super::log_capture::CaseLogs;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// `-v` raises `base` to debug, `-vv` to trace; `--quiet` wins
    pub fn from_flags(base: LogLevel, verbose: u8, quiet: bool) -> Self {
        if quiet {
            return LogLevel::Error;
        }
        match verbose {
            0 => base,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tracing_level())
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("l2_conformance={}", level.to_tracing_level()))
}

/// Install the global subscriber and return the per-case capture buffer.
/// `RUST_LOG` overrides `level` for console output only; capture always
/// records this crate at debug.
pub fn init_logger(level: LogLevel) -> CaseLogs {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
    let logs = CaseLogs::new();

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(filter);
    let capture = logs.layer().with_filter(filter_for(LogLevel::Debug));

    if tracing_subscriber::registry()
        .with(console)
        .with(capture)
        .try_init()
        .is_err()
    {
        tracing::debug!("logger already installed");
    }
    logs
}
