//! Logging setup shared by the cast-* binaries
//!
//! Everything goes to stderr; stdout carries command output and, for
//! `cast-send --events`, the event stream.
//!
//! ```no_run
//! use libcastline::logging::{LogFormat, LogSettings};
//!
//! LogSettings {
//!     format: LogFormat::Json,
//!     level: "info".to_string(),
//!     verbose: false,
//! }
//! .install();
//!
//! // Or read CASTLINE_LOG_FORMAT / CASTLINE_LOG_LEVEL
//! libcastline::logging::init_default(false);
//! ```

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "CASTLINE_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "CASTLINE_LOG_LEVEL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines without colors
    #[default]
    Text,
    /// One JSON object per line, fields flattened
    Json,
    /// Multi-line colored output with source locations
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [LogFormat::Text, LogFormat::Json, LogFormat::Pretty]
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown log format '{}' (expected text, json or pretty)", s))
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Directive used when `RUST_LOG` is unset, e.g. "info" or "libcastline=debug"
    pub level: String,
    /// Forces "debug" in place of `level`
    pub verbose: bool,
}

impl LogSettings {
    /// Read format and level from the environment, using `default_level`
    /// when `CASTLINE_LOG_LEVEL` is unset. An unparsable format falls back
    /// to text.
    pub fn from_env(verbose: bool, default_level: &str) -> Self {
        Self {
            format: std::env::var(LOG_FORMAT_ENV)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            level: std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string()),
            verbose,
        }
    }

    fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber. Later calls leave the first one in place.
    pub fn install(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let result = match self.format {
            LogFormat::Text => builder.with_target(false).try_init(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
        };

        if result.is_err() {
            tracing::debug!("Global subscriber was already set");
        }
    }
}

/// Long-running tools: info unless `CASTLINE_LOG_LEVEL` says otherwise.
pub fn init_default(verbose: bool) {
    init_from_env(verbose, "info");
}

/// One-shot tools pass "warn" so a successful run prints nothing to stderr.
pub fn init_from_env(verbose: bool, default_level: &str) {
    LogSettings::from_env(verbose, default_level).install();
}
