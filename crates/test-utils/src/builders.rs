#![allow(dead_code)]

use daqsched::config::{ConfigFile, RawConfigFile, TaskConfig};
use daqsched::types::Affinity;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.scheduler.workers = workers;
        self
    }

    pub fn with_main_loop(mut self) -> Self {
        self.config.scheduler.use_main_loop = true;
        self
    }

    pub fn with_graph_name(mut self, name: &str) -> Self {
        self.config.graph.name = Some(name.to_string());
        self
    }

    /// The unvalidated config, for tests that exercise validation.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                affinity: Affinity::Pool,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn on_main_loop(mut self) -> Self {
        self.task.affinity = Affinity::MainLoop;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
