// src/errors.rs

//! Crate-wide error types.
//!
//! - [`SchedulerError`] is returned synchronously at the call site
//!   (construction, wiring, scheduling after stop, configuration).
//! - [`TaskError`] is the per-unit failure stored inside an
//!   [`Awaitable`](crate::exec::Awaitable); it never surfaces on its own.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid worker count {requested} (maximum is {max})")]
    InvalidWorkerCount { requested: usize, max: usize },

    #[error("Invalid logger: {0}")]
    InvalidLogger(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Cycle detected in task graph: {0}")]
    GraphCycle(String),

    #[error("'{0}' has already been scheduled and can no longer be modified")]
    GraphSealed(String),

    #[error("Task '{task}' already belongs to graph '{graph}'")]
    TaskAlreadyOwned { task: String, graph: String },

    #[error("Scheduler has been stopped")]
    Stopped,

    #[error("Main loop is not enabled for this scheduler")]
    MainLoopNotSet,

    #[error("Main loop is already running")]
    MainLoopRunning,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Terminal failure of one scheduled unit (function, task or graph).
///
/// Cheap to clone so every waiter on an awaitable observes the same value.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("task '{task}' failed: {error:#}")]
    Failed {
        task: String,
        error: Arc<anyhow::Error>,
    },

    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("cancelled before it started")]
    Cancelled,

    #[error("task graph '{graph}' failed (failed: {failed:?}, skipped: {skipped:?})")]
    GraphFailed {
        graph: String,
        failed: Vec<String>,
        skipped: Vec<String>,
    },
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
