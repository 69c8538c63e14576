// src/engine/mod.rs

//! Scheduling facade.
//!
//! [`Scheduler`] ties the worker pool and the optional main loop together
//! behind one handle and owns the `Running -> Stopped` lifecycle.

pub mod scheduler;

pub use scheduler::Scheduler;

/// Lifecycle of a [`Scheduler`]. Construction starts the workers, so a
/// scheduler is observed `Running` until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}
