// src/dag/mod.rs

//! Task graphs and their execution.
//!
//! - [`task`] defines the [`Schedulable`] capability and the [`Task`] handle.
//! - [`task_graph`] holds [`TaskGraph`], a named, nestable set of tasks.
//! - [`plan`] freezes a graph into an index-based DAG and rejects cycles.
//! - [`run_state`] is the per-run state machine (ready / skipped / finished).
//! - [`graph_run`] drives a plan through an executor backend.

pub mod graph_run;
pub mod plan;
pub mod run_state;
pub mod task;
pub mod task_graph;

pub use graph_run::execute_graph;
pub use run_state::RunState;
pub use task::{Schedulable, Task};
pub use task_graph::TaskGraph;
