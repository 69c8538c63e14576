// src/exec/mod.rs

//! Execution layer.
//!
//! - [`awaitable`] provides the one-shot [`Promise`]/[`Awaitable`] pair every
//!   scheduled unit reports through.
//! - [`backend`] defines the [`ExecutorBackend`] seam the graph executor
//!   dispatches ready tasks through, plus the production backend.
//! - [`pool`] is the fixed-size [`WorkerPool`].
//! - [`main_loop`] is the cooperative single-thread [`MainLoop`].
//! - [`command`] turns configured shell commands into tasks.

pub mod awaitable;
pub mod backend;
pub mod command;
pub mod main_loop;
pub mod pool;

pub use awaitable::{Awaitable, AwaitableState, Promise, channel};
pub use backend::{ExecutorBackend, Job};
pub use command::{graph_from_config, shell_task};
pub use main_loop::MainLoop;
pub use pool::WorkerPool;
