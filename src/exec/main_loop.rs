// src/exec/main_loop.rs

//! Cooperative single-thread executor.
//!
//! Work items are queued from any thread and executed, in FIFO order, by
//! whichever thread drives the loop through [`MainLoop::run`] or
//! [`MainLoop::run_iteration`]. Hosts with their own event loop call
//! `run_iteration` from their tick; hosts that can cede a thread call `run`.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::errors::{Result, SchedulerError};
use crate::exec::backend::{Job, panic_message};
use crate::logging::Logger;

#[derive(Default)]
struct LoopState {
    queue: VecDeque<Job>,
    running: bool,
    stop_requested: bool,
    /// Set by `close()`; the loop never accepts work again.
    closed: bool,
}

pub(crate) struct MainLoopShared {
    state: Mutex<LoopState>,
    wake: Condvar,
    logger: Logger,
}

impl MainLoopShared {
    pub(crate) fn enqueue(&self, job: Job) -> Result<()> {
        let rejected = {
            let mut state = self.state.lock();
            if state.closed {
                job
            } else {
                state.queue.push_back(job);
                self.wake.notify_all();
                return Ok(());
            }
        };
        drop(rejected);
        Err(SchedulerError::Stopped)
    }

    fn execute(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                component = self.logger.component(),
                panic = %panic_message(payload.as_ref()),
                "main loop item panicked"
            );
        }
    }
}

/// Queue plus drain loop for work that must run on one host thread.
pub struct MainLoop {
    shared: Arc<MainLoopShared>,
}

impl MainLoop {
    pub fn new(logger: &Logger) -> Self {
        Self {
            shared: Arc::new(MainLoopShared {
                state: Mutex::new(LoopState::default()),
                wake: Condvar::new(),
                logger: logger.clone(),
            }),
        }
    }

    /// Queue `work`; wakes a loop blocked in [`run`](Self::run).
    pub fn schedule_task<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(work))
    }

    /// Drain the queue until [`stop`](Self::stop) is called or `loop_time`
    /// has elapsed (`None` runs until stopped).
    ///
    /// Returns the number of items executed. Must be called from the thread
    /// that owns the loop.
    pub fn run(&self, loop_time: Option<Duration>) -> Result<usize> {
        let deadline = loop_time.map(|budget| Instant::now() + budget);
        let mut state = self.shared.state.lock();
        if state.running {
            return Err(SchedulerError::MainLoopRunning);
        }
        if state.closed {
            return Err(SchedulerError::Stopped);
        }
        state.running = true;
        state.stop_requested = false;

        let span = self.shared.logger.span();
        let _enter = span.enter();
        debug!(?loop_time, "main loop running");

        let mut executed = 0usize;
        loop {
            if state.stop_requested || state.closed {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            if let Some(job) = state.queue.pop_front() {
                MutexGuard::unlocked(&mut state, || self.shared.execute(job));
                executed += 1;
                continue;
            }

            match deadline {
                Some(d) => {
                    self.shared.wake.wait_until(&mut state, d);
                }
                None => self.shared.wake.wait(&mut state),
            }
        }

        state.running = false;
        state.stop_requested = false;
        debug!(executed, "main loop exited");
        Ok(executed)
    }

    /// Execute the items queued at the time of the call, in FIFO order.
    ///
    /// Items queued while the pass is executing wait for the next pass.
    pub fn run_iteration(&self) -> usize {
        let batch = std::mem::take(&mut self.shared.state.lock().queue);
        let executed = batch.len();
        for job in batch {
            self.shared.execute(job);
        }
        executed
    }

    /// Ask a running loop to return after the item in progress. Idempotent.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.running {
            state.stop_requested = true;
            self.shared.wake.notify_all();
        }
    }

    /// Informational; may be stale by the time the caller looks at it.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Stop the loop for good: reject new work and cancel queued items.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if state.running {
                state.stop_requested = true;
            }
            std::mem::take(&mut state.queue)
        };
        self.shared.wake.notify_all();

        info!(
            component = self.shared.logger.component(),
            cancelled = dropped.len(),
            "main loop closed"
        );
        drop(dropped);
    }

    pub(crate) fn shared(&self) -> &Arc<MainLoopShared> {
        &self.shared
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}
