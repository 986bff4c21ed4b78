//! Logging setup for the servlet session engine.
//!
//! Engine crates log through [`tracing`] macros with structured fields.
//! This crate installs the subscriber that turns those events into output,
//! configured from `SERVLET_*` environment variables.
//!
//! # Usage
//!
//! ```rust
//! // Install once at startup; later calls are no-ops.
//! servlet_log::init();
//!
//! tracing::info!(port = 8080, "Server started");
//! ```
//!
//! # Environment Variables
//!
//! - `SERVLET_DEBUG=1` - Enable debug logging
//! - `SERVLET_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `SERVLET_LOG_FORMAT=pretty|json|compact` - Set output format (default `json`)
//! - `SERVLET_LOG_COLOR=1|0` - Enable/disable colors
//! - `SERVLET_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `SERVLET_LOG_MODULE=1|0` - Include the event target
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use once_cell::sync::Lazy;
use std::env;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum severity to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by [`EnvFilter`].
    pub fn as_filter(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_filter().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Environment configuration, read once.
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the event target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false, // JSON output doesn't use colors
            timestamps: true,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("SERVLET_DEBUG").unwrap_or(false);

        let level = lookup("SERVLET_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("SERVLET_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("SERVLET_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
            timestamps: flag("SERVLET_LOG_TIMESTAMPS").unwrap_or(true),
            module_path: flag("SERVLET_LOG_MODULE").unwrap_or(true),
        }
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_filter()))
    }
}

/// Get the configuration read from the environment.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Subscriber
// ============================================================================

/// Install the global subscriber from the environment.
///
/// Returns `false` if a subscriber was already installed.
pub fn init() -> bool {
    try_init_with(config()).is_ok()
}

/// Install the global subscriber from the environment, reporting failure.
pub fn try_init() -> Result<(), TryInitError> {
    try_init_with(config())
}

/// Install the global subscriber from an explicit configuration.
pub fn try_init_with(config: &LogConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.filter());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.color && config.format != Format::Json)
        .with_target(config.module_path);

    match (config.format, config.timestamps) {
        (Format::Json, true) => registry
            .with(layer.json().flatten_event(true).with_timer(ChronoUtc::rfc_3339()))
            .try_init(),
        (Format::Json, false) => registry.with(layer.json().flatten_event(true).without_time()).try_init(),
        (Format::Compact, true) => registry
            .with(layer.compact().with_timer(ChronoUtc::rfc_3339()))
            .try_init(),
        (Format::Compact, false) => registry.with(layer.compact().without_time()).try_init(),
        (Format::Pretty, true) => registry
            .with(layer.pretty().with_timer(ChronoUtc::rfc_3339()))
            .try_init(),
        (Format::Pretty, false) => registry.with(layer.pretty().without_time()).try_init(),
    }
}

// ============================================================================
// Tests
// ============================================================================
