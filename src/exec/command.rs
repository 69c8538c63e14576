// src/exec/command.rs

//! Shell-command tasks built from a config file.

use std::process::Command;

use anyhow::{Context, bail};
use tracing::{debug, info};

use crate::config::model::ConfigFile;
use crate::dag::{Schedulable, Task, TaskGraph};
use crate::errors::Result;

pub const DEFAULT_GRAPH_NAME: &str = "daqsched";

/// A task that runs `cmd` through the platform shell.
///
/// Output is captured and logged (stdout at info, stderr at debug); a
/// non-zero exit status fails the task.
pub fn shell_task(name: &str, cmd: &str) -> Task {
    let task_name = name.to_string();
    let cmd = cmd.to_string();

    Task::named(name, move || {
        info!(task = %task_name, cmd = %cmd, "starting task process");

        // Build a shell command appropriate for the platform.
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&cmd);
            c
        };

        let output = command
            .output()
            .with_context(|| format!("spawning process for task '{task_name}'"))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!(task = %task_name, "stdout: {}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(task = %task_name, "stderr: {}", line);
        }

        let code = output.status.code().unwrap_or(-1);
        info!(
            task = %task_name,
            exit_code = code,
            success = output.status.success(),
            "task process exited"
        );

        if !output.status.success() {
            bail!("command `{cmd}` exited with status {code}");
        }
        Ok(())
    })
}

/// Build the task graph described by a validated config.
///
/// Every `[task.<name>]` becomes a shell task; `after = [...]` entries become
/// `then()` edges from each dependency to the task.
pub fn graph_from_config(cfg: &ConfigFile) -> Result<TaskGraph> {
    let name = cfg.graph.name.as_deref().unwrap_or(DEFAULT_GRAPH_NAME);
    let graph = TaskGraph::named(name);

    let tasks: Vec<(&String, Task)> = cfg
        .task
        .iter()
        .map(|(task_name, task_cfg)| {
            let task = shell_task(task_name, &task_cfg.cmd);
            task.set_affinity(task_cfg.affinity);
            (task_name, task)
        })
        .collect();

    for (_, task) in &tasks {
        graph.add_task(task)?;
    }

    for (task_name, task) in &tasks {
        for dep in &cfg.task[*task_name].after {
            if let Some((_, upstream)) = tasks.iter().find(|(n, _)| *n == dep) {
                upstream.then(task)?;
            }
        }
    }

    debug!(graph = %name, tasks = tasks.len(), "built task graph from config");
    Ok(graph)
}
