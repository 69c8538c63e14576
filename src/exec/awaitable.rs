// src/exec/awaitable.rs

//! One-shot, cross-thread result delivery.
//!
//! [`channel`] returns a [`Promise`] (producer) and an [`Awaitable`]
//! (observer). The promise is completed exactly once; dropping it without
//! completing resolves the awaitable as [`TaskError::Cancelled`]. This is how
//! work that was queued but never started turns into the `Cancelled` state
//! when an executor shuts down: the executor simply drops the queued job.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::errors::TaskError;
use crate::exec::pool::Ticket;

/// Observable state of an [`Awaitable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitableState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

struct Shared<T> {
    slot: Mutex<Option<Result<T, TaskError>>>,
    done: Condvar,
    notify: Notify,
}

impl<T> Shared<T> {
    /// Store the terminal result. Only the first call has any effect.
    fn resolve(&self, result: Result<T, TaskError>) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
        }
        self.done.notify_all();
        self.notify.notify_waiters();
        true
    }
}

/// Create a linked promise/awaitable pair.
pub fn channel<T>() -> (Promise<T>, Awaitable<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        done: Condvar::new(),
        notify: Notify::new(),
    });
    let promise = Promise {
        shared: Some(Arc::clone(&shared)),
        ticket: None,
    };
    (promise, Awaitable { shared })
}

/// Producer half of an awaitable.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
    /// Outstanding-work ticket released only after the result is stored, so
    /// `wait_all()` never returns before the awaitable is terminal.
    ticket: Option<Ticket>,
}

impl<T> Promise<T> {
    pub(crate) fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    /// Resolve the awaitable with `result`.
    pub fn complete(mut self, result: Result<T, TaskError>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
        self.ticket.take();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(TaskError::Cancelled));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

/// Shared, read-only handle on the eventual result of one scheduled unit.
///
/// Clones observe the same result. Any number of threads may block on it.
pub struct Awaitable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Awaitable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Awaitable<T> {
    pub fn state(&self) -> AwaitableState {
        match &*self.shared.slot.lock() {
            None => AwaitableState::Pending,
            Some(Ok(_)) => AwaitableState::Completed,
            Some(Err(TaskError::Cancelled)) => AwaitableState::Cancelled,
            Some(Err(_)) => AwaitableState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().is_some()
    }

    /// Block the calling thread until the unit reaches a terminal state.
    ///
    /// Must not be called from a worker whose progress the awaited unit
    /// depends on.
    pub fn wait(&self) {
        let mut slot = self.shared.slot.lock();
        while slot.is_none() {
            self.shared.done.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns `true` if the
    /// unit is terminal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while slot.is_none() {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return slot.is_some();
            }
        }
        true
    }
}

impl<T: Clone> Awaitable<T> {
    /// Block until terminal and return the result.
    pub fn result(&self) -> Result<T, TaskError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Non-blocking peek at the result.
    pub fn try_result(&self) -> Option<Result<T, TaskError>> {
        self.shared.slot.lock().clone()
    }

    /// Await the result from async code without blocking the runtime thread.
    pub async fn wait_async(&self) -> Result<T, TaskError> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }
}

impl<T> fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaitable")
            .field("state", &self.state())
            .finish()
    }
}
