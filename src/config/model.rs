// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::exec::pool::DEFAULT_THREAD_PREFIX;
use crate::logging::DEFAULT_COMPONENT;
use crate::types::Affinity;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// workers = 4
/// use_main_loop = false
///
/// [graph]
/// name = "build"
///
/// [task.compile]
/// cmd = "make"
/// after = ["fetch"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub graph: GraphSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A configuration that passed validation (see `config::validate`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerConfig,
    pub graph: GraphSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    /// Assemble a config without validating it. Callers are expected to
    /// uphold the invariants `TryFrom<RawConfigFile>` checks.
    pub fn new_unchecked(
        scheduler: SchedulerConfig,
        graph: GraphSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            scheduler,
            graph,
            task,
        }
    }
}

/// `[scheduler]` section: construction parameters of the scheduler.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; `0` means hardware concurrency.
    pub workers: usize,

    /// Whether the scheduler owns a main-thread loop.
    pub use_main_loop: bool,

    pub thread_name_prefix: String,

    /// Component name of the scheduler's logger.
    pub logger: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            use_main_loop: false,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            logger: DEFAULT_COMPONENT.to_string(),
        }
    }
}

/// `[graph]` section.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct GraphSection {
    /// Name of the task graph built from the `[task.*]` sections.
    #[serde(default)]
    pub name: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// This task runs after every task listed here succeeded.
    #[serde(default)]
    pub after: Vec<String>,

    /// `"pool"` (default) or `"main_loop"`.
    #[serde(default)]
    pub affinity: Affinity,
}
