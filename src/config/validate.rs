// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::MAX_WORKERS;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SchedulerError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.scheduler, raw.graph, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_scheduler_config(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn validate_scheduler_config(cfg: &RawConfigFile) -> Result<()> {
    let sched = &cfg.scheduler;

    if sched.workers > MAX_WORKERS {
        return Err(SchedulerError::ConfigError(format!(
            "[scheduler].workers must be <= {MAX_WORKERS} (got {})",
            sched.workers
        )));
    }
    if sched.thread_name_prefix.trim().is_empty() {
        return Err(SchedulerError::ConfigError(
            "[scheduler].thread_name_prefix must not be empty".to_string(),
        ));
    }
    if sched.logger.trim().is_empty() {
        return Err(SchedulerError::ConfigError(
            "[scheduler].logger must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(SchedulerError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(SchedulerError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task
    // For:
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedulerError::GraphCycle(format!(
            "cycle detected in configured tasks involving task '{}'",
            cycle.node_id()
        ))),
    }
}
