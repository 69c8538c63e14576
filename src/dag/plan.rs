// src/dag/plan.rs

//! Frozen, index-based view of a task graph for one run.
//!
//! Building a plan snapshots the members of a graph (recursively for nested
//! graphs), keeps only the `then()` edges between members and checks the
//! result is acyclic. Everything after this point works on indices.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::task::{NodeBody, TaskNode};
use crate::dag::task_graph::GraphBody;
use crate::errors::{Result, SchedulerError};
use crate::types::{Affinity, TaskId};

pub(crate) struct PlanNode {
    pub(crate) node: Arc<TaskNode>,
    pub(crate) name: String,
    /// Snapshot taken when the plan was built.
    pub(crate) affinity: Affinity,
    /// Set for nested graphs.
    pub(crate) child: Option<Arc<Plan>>,
    pub(crate) predecessors: usize,
    pub(crate) dependents: Vec<usize>,
}

pub(crate) struct Plan {
    pub(crate) graph: String,
    graph_node: Arc<TaskNode>,
    pub(crate) nodes: Vec<PlanNode>,
}

impl Plan {
    pub(crate) fn build(graph_node: &Arc<TaskNode>, body: &GraphBody) -> Result<Plan> {
        let mut stack = Vec::new();
        Self::build_nested(graph_node, body, &mut stack)
    }

    fn build_nested(
        graph_node: &Arc<TaskNode>,
        body: &GraphBody,
        stack: &mut Vec<TaskId>,
    ) -> Result<Plan> {
        let graph = graph_node.display_name();
        if stack.contains(&graph_node.id) {
            return Err(SchedulerError::GraphCycle(format!(
                "task graph '{graph}' is nested inside itself"
            )));
        }
        stack.push(graph_node.id);

        let members = body.snapshot();
        let index: HashMap<TaskId, usize> = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();

        let mut nodes = Vec::with_capacity(members.len());
        for member in &members {
            let child = match &member.body {
                NodeBody::Work(_) => None,
                NodeBody::Graph(inner) => {
                    Some(Arc::new(Self::build_nested(member, inner, stack)?))
                }
            };
            nodes.push(PlanNode {
                node: Arc::clone(member),
                name: member.display_name(),
                affinity: member.affinity(),
                child,
                predecessors: 0,
                dependents: Vec::new(),
            });
        }
        stack.pop();

        // Edge direction: task -> continuation.
        let mut dag: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..nodes.len() {
            dag.add_node(i);
        }

        for (i, member) in members.iter().enumerate() {
            for successor in member.successors() {
                match index.get(&successor.id) {
                    Some(&j) => {
                        if dag.add_edge(i, j, ()).is_none() {
                            nodes[i].dependents.push(j);
                            nodes[j].predecessors += 1;
                        }
                    }
                    None => {
                        debug!(
                            graph = %graph,
                            from = %nodes[i].name,
                            to = %successor.display_name(),
                            "ignoring continuation outside the graph"
                        );
                    }
                }
            }
        }

        if let Err(cycle) = toposort(&dag, None) {
            let task = &nodes[cycle.node_id()].name;
            return Err(SchedulerError::GraphCycle(format!(
                "cycle detected in task graph '{graph}' involving task '{task}'"
            )));
        }

        Ok(Plan {
            graph,
            graph_node: Arc::clone(graph_node),
            nodes,
        })
    }

    /// Whether any task in the plan, nested graphs included, has `affinity`.
    pub(crate) fn requires(&self, affinity: Affinity) -> bool {
        self.nodes.iter().any(|n| match &n.child {
            Some(child) => child.requires(affinity),
            None => n.affinity == affinity,
        })
    }

    /// Freeze the graph and everything in it against further edits.
    pub(crate) fn seal(&self) {
        self.graph_node.seal();
        for n in &self.nodes {
            n.node.seal();
            if let Some(child) = &n.child {
                child.seal();
            }
        }
    }

    /// Number of work tasks, counting nested graphs recursively.
    pub(crate) fn task_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.child.as_ref().map_or(1, |c| c.task_count()))
            .sum()
    }

    pub(crate) fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].predecessors == 0)
            .collect()
    }
}
