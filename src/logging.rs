// src/logging.rs

//! Logging for `daqsched` using `tracing` + `tracing-subscriber`.
//!
//! Two pieces live here:
//!
//! - [`init_logging`] installs the process-wide subscriber (used by the
//!   binary; library users install their own).
//! - [`Logger`] is the named logger component handed to a scheduler at
//!   construction. Worker threads and main-loop drains run inside its span,
//!   so every diagnostic they emit carries the component name.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DAQSCHED_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that task output on stdout stays clean.

use std::sync::Arc;

use anyhow::Result;
use tracing::Span;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;
use crate::errors::SchedulerError;

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var("DAQSCHED_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::INFO),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

pub const DEFAULT_COMPONENT: &str = "Scheduler";

/// Named logger component injected into a scheduler.
#[derive(Debug, Clone)]
pub struct Logger {
    component: Arc<str>,
}

impl Logger {
    /// Create a logger component. The name must not be blank.
    pub fn new(component: impl Into<String>) -> crate::errors::Result<Self> {
        let component = component.into();
        if component.trim().is_empty() {
            return Err(SchedulerError::InvalidLogger(
                "logger component name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            component: component.into(),
        })
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Span that scopes diagnostics emitted on behalf of this component.
    pub fn span(&self) -> Span {
        tracing::info_span!("component", name = %self.component)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            component: Arc::from(DEFAULT_COMPONENT),
        }
    }
}
