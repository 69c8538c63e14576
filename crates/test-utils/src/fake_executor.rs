use std::sync::Mutex;

use daqsched::errors::Result;
use daqsched::exec::Job;
use daqsched::{Affinity, ExecutorBackend, SchedulerError};

/// A fake executor that:
/// - runs every dispatched job inline, on the dispatching thread
/// - records the affinity each job was dispatched with
/// - accepts both pool and main-loop affinity
///
/// With [`rejecting`](Self::rejecting) it drops every job instead, the way a
/// stopped executor does.
#[derive(Debug, Default)]
pub struct InlineBackend {
    dispatched: Mutex<Vec<Affinity>>,
    reject: bool,
}

impl InlineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    /// Affinities of the jobs dispatched so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<Affinity> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl ExecutorBackend for InlineBackend {
    fn dispatch(&self, job: Job, affinity: Affinity) -> Result<()> {
        self.dispatched.lock().unwrap().push(affinity);
        if self.reject {
            drop(job);
            return Err(SchedulerError::Stopped);
        }
        job();
        Ok(())
    }

    fn supports(&self, _affinity: Affinity) -> bool {
        true
    }
}
