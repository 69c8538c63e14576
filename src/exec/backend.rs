// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The graph executor hands ready tasks to an `ExecutorBackend` instead of
//! talking to the worker pool directly. This keeps graph semantics testable
//! without threads: tests can provide a backend that runs jobs inline.
//!
//! - [`SchedulerBackend`] is the production implementation: pool-affine jobs
//!   go to the worker pool, main-loop-affine jobs go to the main loop (if the
//!   scheduler has one).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::errors::{Result, SchedulerError, TaskError};
use crate::exec::main_loop::MainLoopShared;
use crate::exec::pool::PoolShared;
use crate::types::Affinity;

/// A unit of work queued on an executor.
///
/// Dropping a job without running it is how executors cancel queued work;
/// jobs carry drop guards that record the cancellation.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Trait abstracting where ready jobs are executed.
pub trait ExecutorBackend: Send + Sync {
    /// Queue `job` on the executor selected by `affinity`.
    ///
    /// On error the job has been dropped (and thereby cancelled).
    fn dispatch(&self, job: Job, affinity: Affinity) -> Result<()>;

    /// Whether jobs with this affinity can be dispatched at all.
    fn supports(&self, affinity: Affinity) -> bool {
        affinity == Affinity::Pool
    }
}

/// Production backend: worker pool plus optional main loop.
pub(crate) struct SchedulerBackend {
    pool: Arc<PoolShared>,
    main_loop: Option<Arc<MainLoopShared>>,
}

impl SchedulerBackend {
    pub(crate) fn new(pool: Arc<PoolShared>, main_loop: Option<Arc<MainLoopShared>>) -> Self {
        Self { pool, main_loop }
    }
}

impl ExecutorBackend for SchedulerBackend {
    fn dispatch(&self, job: Job, affinity: Affinity) -> Result<()> {
        match affinity {
            Affinity::Pool => self.pool.submit(job),
            Affinity::MainLoop => match &self.main_loop {
                Some(main_loop) => main_loop.enqueue(job),
                None => Err(SchedulerError::MainLoopNotSet),
            },
        }
    }

    fn supports(&self, affinity: Affinity) -> bool {
        match affinity {
            Affinity::Pool => true,
            Affinity::MainLoop => self.main_loop.is_some(),
        }
    }
}

/// Run a user callable, turning an `Err` or a panic into a [`TaskError`].
pub(crate) fn invoke<T>(
    task: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> std::result::Result<T, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TaskError::Failed {
            task: task.to_string(),
            error: Arc::new(error),
        }),
        Err(payload) => Err(TaskError::Panicked {
            task: task.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
