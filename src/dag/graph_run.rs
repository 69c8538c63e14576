// src/dag/graph_run.rs

//! Executes one submission of a task graph.
//!
//! A `GraphRun` owns the frozen [`Plan`] and the [`RunBook`] for the run. Ready
//! work tasks are handed to an [`ExecutorBackend`] wrapped in a `NodeTicket`;
//! the ticket reports the node's outcome back to the run when the job runs,
//! or reports `Cancelled` when the executor drops the job unrun. Nested graphs
//! become child runs that report to their parent instead of to a promise.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dag::plan::Plan;
use crate::dag::run_state::{NodeOutcome, RunBook};
use crate::dag::task_graph::TaskGraph;
use crate::errors::{Result, SchedulerError};
use crate::exec::awaitable::{self, Awaitable, Promise};
use crate::exec::backend::{ExecutorBackend, Job};
use crate::types::Affinity;

/// Validate, seal and start `graph` on `backend`; `promise` resolves when the
/// run is over.
///
/// On error nothing has run and the graph is left unsealed.
pub(crate) fn launch(
    graph: &TaskGraph,
    backend: Arc<dyn ExecutorBackend>,
    promise: Promise<()>,
) -> Result<()> {
    let plan = Plan::build(&graph.node, &graph.body)?;

    if plan.requires(Affinity::MainLoop) && !backend.supports(Affinity::MainLoop) {
        return Err(SchedulerError::MainLoopNotSet);
    }

    plan.seal();
    info!(
        graph = %plan.graph,
        tasks = plan.task_count(),
        "task graph submitted"
    );

    GraphRun::start(Arc::new(plan), backend, Completion::Promise(promise));
    Ok(())
}

/// Run `graph` on an arbitrary backend.
///
/// This is what the scheduler does internally; it is public so graphs can be
/// driven by custom executors (or inline in tests).
pub fn execute_graph(
    graph: &TaskGraph,
    backend: Arc<dyn ExecutorBackend>,
) -> Result<Awaitable<()>> {
    let (promise, awaitable) = awaitable::channel();
    launch(graph, backend, promise)?;
    Ok(awaitable)
}

enum Completion {
    Promise(Promise<()>),
    Parent { run: Arc<GraphRun>, index: usize },
}

struct GraphRun {
    plan: Arc<Plan>,
    book: Mutex<RunBook>,
    backend: Arc<dyn ExecutorBackend>,
    completion: Mutex<Option<Completion>>,
    started: Instant,
}

impl GraphRun {
    fn start(plan: Arc<Plan>, backend: Arc<dyn ExecutorBackend>, completion: Completion) {
        let (book, ready) = RunBook::start(&plan);
        let empty = book.is_finished();

        let run = Arc::new(GraphRun {
            plan,
            book: Mutex::new(book),
            backend,
            completion: Mutex::new(Some(completion)),
            started: Instant::now(),
        });

        debug!(
            graph = %run.plan.graph,
            ready = ready.len(),
            "graph run started"
        );

        if empty {
            run.finish();
            return;
        }
        for index in ready {
            run.launch_node(index);
        }
    }

    fn launch_node(self: &Arc<Self>, index: usize) {
        let node = &self.plan.nodes[index];

        if let Some(child) = &node.child {
            debug!(graph = %self.plan.graph, nested = %node.name, "starting nested graph");
            GraphRun::start(
                Arc::clone(child),
                Arc::clone(&self.backend),
                Completion::Parent {
                    run: Arc::clone(self),
                    index,
                },
            );
            return;
        }

        let ticket = NodeTicket {
            run: Some(Arc::clone(self)),
            index,
        };
        let job: Job = Box::new(move || ticket.execute());

        // A rejected job has already been dropped, so its ticket has
        // reported the node as cancelled.
        if let Err(err) = self.backend.dispatch(job, node.affinity) {
            debug!(
                graph = %self.plan.graph,
                task = %node.name,
                error = %err,
                "task could not be dispatched"
            );
        }
    }

    fn node_finished(self: &Arc<Self>, index: usize, outcome: NodeOutcome) {
        let node = &self.plan.nodes[index];
        match &outcome {
            NodeOutcome::Success => {
                debug!(graph = %self.plan.graph, task = %node.name, "task completed");
            }
            NodeOutcome::Failed(err) => {
                warn!(
                    graph = %self.plan.graph,
                    task = %node.name,
                    error = %err,
                    "task failed; skipping its dependents"
                );
            }
            NodeOutcome::Cancelled => {
                debug!(graph = %self.plan.graph, task = %node.name, "task cancelled");
            }
        }

        let step = self.book.lock().complete(&self.plan, index, &outcome);
        if !step.newly_skipped.is_empty() {
            debug!(
                graph = %self.plan.graph,
                task = %node.name,
                dependents = step.newly_skipped.len(),
                "dependents will not run"
            );
        }

        for ready in step.newly_ready {
            self.launch_node(ready);
        }
        if step.run_just_finished {
            self.finish();
        }
    }

    fn finish(&self) {
        let outcome = self.book.lock().outcome(&self.plan);
        let elapsed_ms = self.started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(()) => info!(graph = %self.plan.graph, elapsed_ms, "task graph completed"),
            Err(err) => warn!(
                graph = %self.plan.graph,
                elapsed_ms,
                error = %err,
                "task graph did not complete successfully"
            ),
        }

        let completion = self.completion.lock().take();
        match completion {
            Some(Completion::Promise(promise)) => promise.complete(outcome),
            Some(Completion::Parent { run, index }) => {
                run.node_finished(index, NodeOutcome::from_result(outcome));
            }
            None => {}
        }
    }
}

/// Drop guard carried by every dispatched job.
struct NodeTicket {
    run: Option<Arc<GraphRun>>,
    index: usize,
}

impl NodeTicket {
    fn execute(mut self) {
        if let Some(run) = self.run.take() {
            let node = &run.plan.nodes[self.index];
            debug!(graph = %run.plan.graph, task = %node.name, "task started");
            let result = node.node.invoke(&node.name);
            run.node_finished(self.index, NodeOutcome::from_result(result));
        }
    }
}

impl Drop for NodeTicket {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.node_finished(self.index, NodeOutcome::Cancelled);
        }
    }
}
