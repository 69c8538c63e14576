// src/engine/scheduler.rs

//! The `Scheduler` facade: one worker pool plus an optional main loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::dag::TaskGraph;
use crate::engine::SchedulerState;
use crate::errors::{Result, SchedulerError};
use crate::exec::awaitable::Awaitable;
use crate::exec::backend::{ExecutorBackend, SchedulerBackend};
use crate::exec::main_loop::MainLoop;
use crate::exec::pool::{DEFAULT_THREAD_PREFIX, WorkerPool};
use crate::logging::Logger;

/// Entry point for scheduling functions, work items and task graphs.
///
/// Construction starts the workers. After [`stop`](Self::stop) every
/// scheduling call fails with [`SchedulerError::Stopped`].
pub struct Scheduler {
    logger: Logger,
    pool: WorkerPool,
    main_loop: Option<MainLoop>,
    backend: Arc<SchedulerBackend>,
    state: RwLock<SchedulerState>,
}

impl Scheduler {
    /// `num_workers == 0` uses the hardware concurrency.
    pub fn new(logger: &Logger, num_workers: usize, use_main_loop: bool) -> Result<Self> {
        Self::build(logger, num_workers, use_main_loop, DEFAULT_THREAD_PREFIX)
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self> {
        let logger = Logger::new(cfg.logger.clone())?;
        Self::build(
            &logger,
            cfg.workers,
            cfg.use_main_loop,
            &cfg.thread_name_prefix,
        )
    }

    fn build(logger: &Logger, num_workers: usize, use_main_loop: bool, prefix: &str) -> Result<Self> {
        let pool = WorkerPool::with_thread_prefix(logger, num_workers, prefix)?;
        let main_loop = use_main_loop.then(|| MainLoop::new(logger));
        let backend = Arc::new(SchedulerBackend::new(
            Arc::clone(pool.shared()),
            main_loop.as_ref().map(|ml| Arc::clone(ml.shared())),
        ));

        info!(
            component = logger.component(),
            workers = pool.worker_count(),
            main_loop = use_main_loop,
            "scheduler created"
        );

        Ok(Self {
            logger: logger.clone(),
            pool,
            main_loop,
            backend,
            state: RwLock::new(SchedulerState::Running),
        })
    }

    /// Run `f` on a worker; the awaitable carries its result or failure.
    pub fn schedule_function<F, T>(&self, f: F) -> Result<Awaitable<T>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.schedule_function(f)
    }

    /// Fire-and-forget work on a worker.
    pub fn schedule_work<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.schedule_work(work)
    }

    /// Submit a task graph. Ready tasks run concurrently; the awaitable
    /// completes once every member is terminal.
    ///
    /// The graph is validated first (`GraphCycle`), tasks with main-loop
    /// affinity need a main loop (`MainLoopNotSet`), and on success the graph
    /// is sealed against further edits.
    pub fn schedule_graph(&self, graph: &TaskGraph) -> Result<Awaitable<()>> {
        let backend: Arc<dyn ExecutorBackend> = self.backend.clone();
        self.pool.schedule_graph_on(graph, backend)
    }

    /// Queue `work` on the main loop.
    pub fn schedule_work_on_main_loop<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.require_main_loop()?.schedule_task(work)
    }

    /// Drain the main loop on the calling thread; see [`MainLoop::run`].
    pub fn run_main_loop(&self, loop_time: Option<Duration>) -> Result<usize> {
        self.require_main_loop()?.run(loop_time)
    }

    /// One pass over the items currently queued on the main loop.
    pub fn run_main_loop_iteration(&self) -> Result<usize> {
        let main_loop = self.require_main_loop()?;
        if self.state() == SchedulerState::Stopped {
            return Err(SchedulerError::Stopped);
        }
        Ok(main_loop.run_iteration())
    }

    /// Ask a running main loop to return. No-op without a main loop.
    pub fn stop_main_loop(&self) {
        if let Some(main_loop) = &self.main_loop {
            main_loop.stop();
        }
    }

    pub fn is_main_loop_set(&self) -> bool {
        self.main_loop.is_some()
    }

    /// Stop the scheduler: in-flight work finishes, queued work (pool and
    /// main loop) is cancelled, workers are joined. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
        }

        debug!(component = self.logger.component(), "stopping scheduler");
        self.pool.stop();
        if let Some(main_loop) = &self.main_loop {
            main_loop.close();
        }
        info!(component = self.logger.component(), "scheduler stopped");
    }

    /// Block until every scheduled unit is terminal.
    ///
    /// Work with main-loop affinity only progresses while someone drives the
    /// main loop; waiting on it from the main-loop thread never returns.
    pub fn wait_all(&self) {
        self.pool.wait_all();
    }

    pub fn is_multi_threaded(&self) -> bool {
        self.pool.is_multi_threaded()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    fn require_main_loop(&self) -> Result<&MainLoop> {
        self.main_loop.as_ref().ok_or(SchedulerError::MainLoopNotSet)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("component", &self.logger.component())
            .field("state", &self.state())
            .field("pool", &self.pool)
            .field("main_loop", &self.main_loop)
            .finish()
    }
}
