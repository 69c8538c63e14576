// src/lib.rs

//! Task scheduler with a fixed worker pool, dependency graphs and a
//! cooperative main-thread loop.
//!
//! ```no_run
//! use daqsched::{Logger, Schedulable, Scheduler, Task, TaskGraph};
//!
//! # fn main() -> anyhow::Result<()> {
//! let scheduler = Scheduler::new(&Logger::default(), 4, false)?;
//!
//! let graph = TaskGraph::named("acquire");
//! let open = Task::named("open", || Ok(()));
//! let read = Task::named("read", || Ok(()));
//! graph.add_task(&open)?;
//! graph.add_task(&read)?;
//! open.then(&read)?;
//!
//! scheduler.schedule_graph(&graph)?.result()?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

pub use crate::dag::{Schedulable, Task, TaskGraph, execute_graph};
pub use crate::engine::{Scheduler, SchedulerState};
pub use crate::errors::{SchedulerError, TaskError};
pub use crate::exec::{Awaitable, AwaitableState, ExecutorBackend, MainLoop, WorkerPool};
pub use crate::logging::Logger;
pub use crate::types::{Affinity, TaskId};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::exec::graph_from_config;

/// Slice of main-loop time between checks of the graph's awaitable.
const MAIN_LOOP_SLICE: Duration = Duration::from_millis(50);

/// High-level entry point used by `main.rs`.
///
/// This wires together config loading, graph construction, the scheduler
/// and (with `--main-loop`) a main loop driven on the calling thread.
pub fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if let Some(workers) = args.workers {
        cfg.scheduler.workers = workers;
    }
    if args.main_loop {
        cfg.scheduler.use_main_loop = true;
    }

    let graph = graph_from_config(&cfg)?;

    if args.dry_run {
        print!("{}", graph.dump());
        debug!("dry-run complete (no execution)");
        return Ok(());
    }

    let scheduler = Scheduler::from_config(&cfg.scheduler)?;
    let done = scheduler.schedule_graph(&graph)?;

    if scheduler.is_main_loop_set() {
        while !done.is_done() {
            scheduler.run_main_loop(Some(MAIN_LOOP_SLICE))?;
        }
    }

    let result = done.result();
    scheduler.stop();

    result.with_context(|| format!("running task graph '{}'", graph.name()))?;
    info!(graph = %graph.name(), "all tasks succeeded");
    Ok(())
}
