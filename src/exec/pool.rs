// src/exec/pool.rs

//! Fixed-size worker pool.
//!
//! Workers block on a shared `crossbeam` channel (the ready queue) and run
//! whatever job they receive. Graph tasks, plain functions and
//! fire-and-forget work all travel through the same queue.
//!
//! Shutdown: [`WorkerPool::stop`] closes the submission gate, sends one
//! `Shutdown` message per worker, joins the workers and finally drains the
//! queue. Jobs that were queued but never started are dropped, which resolves
//! their awaitables as cancelled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::config::MAX_WORKERS;
use crate::dag::{TaskGraph, graph_run};
use crate::errors::{Result, SchedulerError};
use crate::exec::awaitable::{self, Awaitable};
use crate::exec::backend::{ExecutorBackend, Job, SchedulerBackend, invoke, panic_message};
use crate::logging::Logger;

pub const DEFAULT_THREAD_PREFIX: &str = "daqsched-worker";

enum Message {
    Run(Job),
    Shutdown,
}

/// State shared between the pool handle, its workers and every backend that
/// dispatches into it.
pub(crate) struct PoolShared {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    /// Submission gate. Once `true`, nothing enters the queue any more.
    stopped: RwLock<bool>,
    /// Number of scheduled units (functions, work items, graphs) that have
    /// not reached a terminal state yet.
    outstanding: Mutex<usize>,
    drained: Condvar,
    logger: Logger,
}

impl PoolShared {
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let rejected = {
            let stopped = self.stopped.read();
            if *stopped {
                Message::Run(job)
            } else {
                match self.sender.send(Message::Run(job)) {
                    Ok(()) => return Ok(()),
                    Err(err) => err.into_inner(),
                }
            }
        };
        // Dropping a job cancels it, which may re-enter `submit`; the gate
        // must already be released at this point.
        drop(rejected);
        Err(SchedulerError::Stopped)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.read()
    }

    /// Register one outstanding unit; the returned ticket releases it on drop.
    pub(crate) fn ticket(self: &Arc<Self>) -> Ticket {
        *self.outstanding.lock() += 1;
        Ticket {
            shared: Arc::clone(self),
        }
    }
}

/// Outstanding-work registration used by `wait_all()`.
pub(crate) struct Ticket {
    shared: Arc<PoolShared>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut outstanding = self.shared.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.shared.drained.notify_all();
        }
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Create a pool with `num_workers` threads (`0` = hardware concurrency).
    pub fn new(logger: &Logger, num_workers: usize) -> Result<Self> {
        Self::with_thread_prefix(logger, num_workers, DEFAULT_THREAD_PREFIX)
    }

    /// Like [`new`](Self::new), naming threads `<prefix>-<index>`.
    pub fn with_thread_prefix(logger: &Logger, num_workers: usize, prefix: &str) -> Result<Self> {
        let num_workers = resolve_worker_count(num_workers)?;
        let (sender, receiver) = channel::unbounded();

        let shared = Arc::new(PoolShared {
            sender,
            receiver,
            stopped: RwLock::new(false),
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            logger: logger.clone(),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(num_workers)),
            num_workers,
        };

        for id in 0..num_workers {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{id}"))
                .spawn(move || worker_loop(id, shared));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(err) => {
                    error!(worker = id, error = %err, "failed to spawn worker thread");
                    // Dropping `pool` stops and joins the workers spawned so far.
                    return Err(SchedulerError::IoError(err));
                }
            }
        }

        info!(
            component = logger.component(),
            workers = num_workers,
            "worker pool started"
        );

        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.num_workers
    }

    /// `true` iff more than one worker thread exists.
    pub fn is_multi_threaded(&self) -> bool {
        self.num_workers > 1
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Number of scheduled units that have not reached a terminal state.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.lock()
    }

    /// Run `f` on a worker and return an awaitable bound to its result.
    pub fn schedule_function<F, T>(&self, f: F) -> Result<Awaitable<T>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (promise, awaitable) = awaitable::channel();
        let promise = promise.with_ticket(self.shared.ticket());

        self.shared.submit(Box::new(move || {
            let result = invoke("function", f);
            if let Err(err) = &result {
                debug!(error = %err, "scheduled function failed");
            }
            promise.complete(result);
        }))?;

        Ok(awaitable)
    }

    /// Fire-and-forget variant of [`schedule_function`](Self::schedule_function).
    ///
    /// Panics are caught and logged; there is no handle to observe them.
    pub fn schedule_work<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let ticket = self.shared.ticket();
        self.shared.submit(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                warn!(
                    panic = %panic_message(payload.as_ref()),
                    "fire-and-forget work panicked"
                );
            }
            drop(ticket);
        }))
    }

    /// Submit a task graph; the awaitable completes when the whole graph has.
    ///
    /// Tasks with main-loop affinity are rejected: a bare pool has no main
    /// loop (use [`Scheduler`](crate::engine::Scheduler) for that).
    pub fn schedule_graph(&self, graph: &TaskGraph) -> Result<Awaitable<()>> {
        let backend: Arc<dyn ExecutorBackend> =
            Arc::new(SchedulerBackend::new(Arc::clone(&self.shared), None));
        self.schedule_graph_on(graph, backend)
    }

    pub(crate) fn schedule_graph_on(
        &self,
        graph: &TaskGraph,
        backend: Arc<dyn ExecutorBackend>,
    ) -> Result<Awaitable<()>> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        let (promise, awaitable) = awaitable::channel();
        let promise = promise.with_ticket(self.shared.ticket());
        graph_run::launch(graph, backend, promise)?;
        Ok(awaitable)
    }

    /// Block until every outstanding unit has reached a terminal state.
    ///
    /// Does not stop the pool and does not report failures.
    pub fn wait_all(&self) {
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > 0 {
            self.shared.drained.wait(&mut outstanding);
        }
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Stop accepting work, let in-flight jobs finish, join the workers and
    /// cancel whatever was still queued. Idempotent.
    pub fn stop(&self) {
        {
            let mut stopped = self.shared.stopped.write();
            if *stopped {
                return;
            }
            *stopped = true;
        }

        info!(
            component = self.shared.logger.component(),
            "stopping worker pool"
        );

        let handles = std::mem::take(&mut *self.workers.lock());
        for _ in 0..handles.len() {
            let _ = self.shared.sender.send(Message::Shutdown);
        }

        let current = thread::current().id();
        let mut detached = 0usize;
        for handle in handles {
            // `stop()` may be called from inside a job; a worker cannot join
            // itself.
            if handle.thread().id() == current {
                detached += 1;
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread terminated abnormally");
            }
        }

        let mut cancelled = 0usize;
        for message in self.shared.receiver.try_iter() {
            if let Message::Run(job) = message {
                drop(job);
                cancelled += 1;
            }
        }

        // The drain above consumed the calling worker's `Shutdown`; it reads
        // this one once its job returns.
        for _ in 0..detached {
            let _ = self.shared.sender.send(Message::Shutdown);
        }

        info!(cancelled, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.num_workers)
            .field("stopped", &self.is_stopped())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

fn resolve_worker_count(requested: usize) -> Result<usize> {
    if requested > MAX_WORKERS {
        return Err(SchedulerError::InvalidWorkerCount {
            requested,
            max: MAX_WORKERS,
        });
    }
    if requested == 0 {
        return Ok(thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1)
            .min(MAX_WORKERS));
    }
    Ok(requested)
}

fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    let span = shared.logger.span();
    let _enter = span.enter();
    debug!(worker = id, "worker started");

    while let Ok(message) = shared.receiver.recv() {
        match message {
            Message::Run(job) => {
                if shared.is_stopped() {
                    trace!(worker = id, "pool stopped; dropping queued job");
                    drop(job);
                    continue;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        worker = id,
                        panic = %panic_message(payload.as_ref()),
                        "job panicked outside of its task guard"
                    );
                }
            }
            Message::Shutdown => break,
        }
    }

    debug!(worker = id, "worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_workers_means_hardware_concurrency() {
        let expected = thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
        assert_eq!(resolve_worker_count(0).unwrap(), expected.min(MAX_WORKERS));
        assert_eq!(resolve_worker_count(3).unwrap(), 3);
    }

    #[test]
    fn too_many_workers_is_rejected() {
        let err = WorkerPool::new(&Logger::default(), MAX_WORKERS + 1).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidWorkerCount { .. }));
    }

    #[test]
    fn work_runs_and_wait_all_drains() {
        let pool = WorkerPool::new(&Logger::default(), 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let c = Arc::clone(&counter);
            pool.schedule_work(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_work() {
        let pool = WorkerPool::new(&Logger::default(), 1).unwrap();
        pool.stop();
        pool.stop();
        assert!(pool.is_stopped());
        assert!(matches!(
            pool.schedule_work(|| {}),
            Err(SchedulerError::Stopped)
        ));
        assert!(matches!(
            pool.schedule_function(|| Ok(1)),
            Err(SchedulerError::Stopped)
        ));
        pool.wait_all();
    }

    #[test]
    fn stop_from_inside_a_job_lets_that_worker_exit() {
        let pool = Arc::new(WorkerPool::new(&Logger::default(), 1).unwrap());
        let p = Arc::clone(&pool);
        let aw = pool
            .schedule_function(move || {
                p.stop();
                Ok(())
            })
            .unwrap();
        aw.result().unwrap();
        assert!(pool.is_stopped());

        // Only the pool itself should still hold the shared state once the
        // worker thread has exited.
        let started = std::time::Instant::now();
        while Arc::strong_count(pool.shared()) > 1
            && started.elapsed() < std::time::Duration::from_secs(5)
        {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(pool.shared()), 1);
        assert!(pool.workers.lock().is_empty());
    }

    #[test]
    fn panicking_work_does_not_kill_the_worker() {
        let pool = WorkerPool::new(&Logger::default(), 1).unwrap();
        pool.schedule_work(|| panic!("boom")).unwrap();
        let aw = pool.schedule_function(|| Ok(5)).unwrap();
        assert_eq!(aw.result().unwrap(), 5);
    }
}
