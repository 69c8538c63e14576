// src/dag/run_state.rs

//! Per-run state transitions for the nodes of a [`Plan`].
//!
//! `RunBook` is the pure state machine behind a graph run: it is told which
//! nodes finished and how, and answers which nodes became ready, which were
//! skipped and whether the run is over. It never touches threads.

use tracing::debug;

use crate::dag::plan::Plan;
use crate::errors::TaskError;

/// Per-run state of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
    /// Not run because something upstream failed.
    Skipped,
    /// Not run (or not finished) because its executor shut down.
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }
}

/// How a single node ended.
#[derive(Debug, Clone)]
pub(crate) enum NodeOutcome {
    Success,
    Failed(TaskError),
    Cancelled,
}

impl NodeOutcome {
    pub(crate) fn from_result(result: Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => NodeOutcome::Success,
            Err(err) if err.is_cancelled() => NodeOutcome::Cancelled,
            Err(err) => NodeOutcome::Failed(err),
        }
    }
}

/// Result of feeding one completion into the book.
#[derive(Debug, Default)]
pub(crate) struct RunStep {
    /// Nodes whose predecessors all succeeded; the caller must launch them.
    pub(crate) newly_ready: Vec<usize>,
    pub(crate) newly_skipped: Vec<usize>,
    pub(crate) run_just_finished: bool,
}

pub(crate) struct RunBook {
    states: Vec<RunState>,
    waiting_on: Vec<usize>,
    unfinished: usize,
    failed: Vec<String>,
    skipped: Vec<String>,
}

impl RunBook {
    /// Fresh book plus the nodes that can start immediately.
    pub(crate) fn start(plan: &Plan) -> (Self, Vec<usize>) {
        let n = plan.nodes.len();
        let mut book = Self {
            states: vec![RunState::Pending; n],
            waiting_on: plan.nodes.iter().map(|node| node.predecessors).collect(),
            unfinished: n,
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        let ready = plan.roots();
        for &i in &ready {
            book.states[i] = RunState::Running;
        }
        (book, ready)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.unfinished == 0
    }

    /// Record that node `index` ended with `outcome`.
    ///
    /// Completions for nodes that are already terminal are ignored.
    pub(crate) fn complete(&mut self, plan: &Plan, index: usize, outcome: &NodeOutcome) -> RunStep {
        let mut step = RunStep::default();
        if self.states[index].is_terminal() {
            debug!(
                graph = %plan.graph,
                task = %plan.nodes[index].name,
                "ignoring duplicate completion"
            );
            return step;
        }

        match outcome {
            NodeOutcome::Success => {
                self.finish(index, RunState::DoneSuccess);
                for &dep in &plan.nodes[index].dependents {
                    self.waiting_on[dep] -= 1;
                    if self.waiting_on[dep] == 0 && self.states[dep] == RunState::Pending {
                        self.states[dep] = RunState::Running;
                        step.newly_ready.push(dep);
                    }
                }
            }
            NodeOutcome::Failed(_) => {
                self.finish(index, RunState::DoneFailed);
                self.failed.push(plan.nodes[index].name.clone());
                step.newly_skipped = self.mark_dependents(plan, index, RunState::Skipped);
            }
            NodeOutcome::Cancelled => {
                self.finish(index, RunState::Cancelled);
                step.newly_skipped = self.mark_dependents(plan, index, RunState::Cancelled);
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    fn finish(&mut self, index: usize, state: RunState) {
        self.states[index] = state;
        self.unfinished -= 1;
    }

    /// Transitively move pending dependents of `index` to `state`.
    fn mark_dependents(&mut self, plan: &Plan, index: usize, state: RunState) -> Vec<usize> {
        let mut stack: Vec<usize> = plan.nodes[index].dependents.clone();
        let mut marked = Vec::new();

        while let Some(i) = stack.pop() {
            if self.states[i] != RunState::Pending {
                continue;
            }
            self.finish(i, state);
            if state == RunState::Skipped {
                self.skipped.push(plan.nodes[i].name.clone());
            }
            debug!(
                graph = %plan.graph,
                task = %plan.nodes[i].name,
                ?state,
                "dependent will not run"
            );
            marked.push(i);
            stack.extend(plan.nodes[i].dependents.iter().copied());
        }

        marked
    }

    /// Final result of the run. Failures win over cancellation.
    pub(crate) fn outcome(&self, plan: &Plan) -> Result<(), TaskError> {
        if !self.failed.is_empty() {
            return Err(TaskError::GraphFailed {
                graph: plan.graph.clone(),
                failed: self.failed.clone(),
                skipped: self.skipped.clone(),
            });
        }
        if self.states.contains(&RunState::Cancelled) {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }
}
