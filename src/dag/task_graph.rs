// src/dag/task_graph.rs

//! Named aggregate of tasks that is itself schedulable.

use std::any::Any;
use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::dag::plan::Plan;
use crate::dag::task::{NodeBody, Schedulable, Task, TaskNode, node_of, not_recognized};
use crate::errors::{Result, SchedulerError};
use crate::types::{Affinity, TaskId};

/// Members of a graph. The graph owns them; `then()` edges between them
/// define the execution order.
pub(crate) struct GraphBody {
    pub(crate) members: Mutex<Vec<Arc<TaskNode>>>,
    root: Option<Arc<TaskNode>>,
}

impl GraphBody {
    pub(crate) fn snapshot(&self) -> Vec<Arc<TaskNode>> {
        self.members.lock().clone()
    }
}

/// A named, schedulable collection of tasks wired by `then()` edges.
///
/// Graphs nest: a graph can be a member of another graph, have
/// continuations, and be a continuation. Once a graph has been scheduled it
/// is sealed and rejects new members and new edges.
#[derive(Clone)]
pub struct TaskGraph {
    pub(crate) node: Arc<TaskNode>,
    pub(crate) body: Arc<GraphBody>,
}

impl TaskGraph {
    /// An empty, anonymous graph.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()), None)
    }

    /// A graph whose first member is a root task running `work`.
    ///
    /// The root is reachable through [`root`](Self::root) so further tasks
    /// can be chained after it.
    pub fn with_root<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let root = Task::named(format!("{name}/root"), work);
        let graph = Self::build(Some(name), Some(Arc::clone(&root.node)));
        root.node.set_owner(&graph.node);
        graph.body.members.lock().push(root.node);
        graph
    }

    fn build(name: Option<String>, root: Option<Arc<TaskNode>>) -> Self {
        let body = Arc::new(GraphBody {
            members: Mutex::new(Vec::new()),
            root,
        });
        let node = TaskNode::new(name, NodeBody::Graph(Arc::clone(&body)));
        Self { node, body }
    }

    pub fn root(&self) -> Option<Task> {
        self.body.root.as_ref().map(|node| Task {
            node: Arc::clone(node),
        })
    }

    /// Make `task` a member of this graph. Adding a member twice is a no-op.
    ///
    /// Membership creates no edges; order comes from `then()` calls between
    /// members.
    pub fn add_task(&self, task: &dyn Schedulable) -> Result<()> {
        let node = node_of(task).ok_or_else(|| not_recognized(task))?;

        if self.node.is_sealed() {
            return Err(SchedulerError::GraphSealed(self.node.display_name()));
        }
        // Containment follows owner links, so `node` may not be this graph
        // or any graph enclosing it.
        let mut enclosing = Some(Arc::clone(&self.node));
        while let Some(graph) = enclosing {
            if graph.id == node.id {
                return Err(SchedulerError::NotSupported(format!(
                    "graph '{}' cannot contain '{}', which encloses it",
                    self.node.display_name(),
                    node.display_name()
                )));
            }
            enclosing = graph.owner();
        }

        let mut members = self.body.members.lock();
        if members.iter().any(|m| m.id == node.id) {
            return Ok(());
        }
        if let Some(owner) = node.owner() {
            if owner.id != self.node.id {
                return Err(SchedulerError::TaskAlreadyOwned {
                    task: node.display_name(),
                    graph: owner.display_name(),
                });
            }
        }

        node.set_owner(&self.node);
        members.push(Arc::clone(node));

        debug!(
            graph = %self.node.display_name(),
            task = %node.display_name(),
            "task added to graph"
        );
        Ok(())
    }

    pub fn contains(&self, task: &dyn Schedulable) -> bool {
        let id = task.id();
        self.body.members.lock().iter().any(|m| m.id == id)
    }

    /// Member ids in insertion order.
    pub fn tasks(&self) -> Vec<TaskId> {
        self.body.members.lock().iter().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.body.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the live continuations registered with `then()`.
    pub fn continuations(&self) -> Vec<TaskId> {
        self.node.successors().iter().map(|n| n.id).collect()
    }

    /// Check the graph (and nested graphs) for dependency cycles and
    /// self-containment. Scheduling runs the same check.
    pub fn validate(&self) -> Result<()> {
        Plan::build(&self.node, &self.body).map(|_| ())
    }

    /// DOT rendering of members and the edges between them.
    ///
    /// Unnamed tasks are labelled with their id, main-loop tasks are drawn
    /// dashed and nested graphs become clusters.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(&self.node.display_name()));
        let mut visiting = vec![self.node.id];
        write_members(&mut out, &self.body, 1, &mut visiting);
        out.push_str("}\n");
        out
    }
}

fn write_members(out: &mut String, body: &GraphBody, depth: usize, visiting: &mut Vec<TaskId>) {
    let indent = "  ".repeat(depth);
    let members = body.snapshot();
    let ids: HashSet<TaskId> = members.iter().map(|m| m.id).collect();

    for member in &members {
        let label = escape(&member.display_name());
        let id = member.id.raw();
        match &member.body {
            NodeBody::Work(_) => {
                let style = match member.affinity() {
                    Affinity::Pool => "",
                    Affinity::MainLoop => ", style=dashed",
                };
                let _ = writeln!(out, "{indent}t{id} [label=\"{label}\"{style}];");
            }
            NodeBody::Graph(inner) => {
                let _ = writeln!(out, "{indent}t{id} [label=\"{label}\", shape=box];");
                if visiting.contains(&member.id) {
                    continue;
                }
                visiting.push(member.id);
                let _ = writeln!(out, "{indent}subgraph cluster_{id} {{");
                let _ = writeln!(out, "{indent}  label=\"{label}\";");
                write_members(out, inner, depth + 1, visiting);
                let _ = writeln!(out, "{indent}}}");
                visiting.pop();
            }
        }
    }

    for member in &members {
        for successor in member.successors() {
            if ids.contains(&successor.id) {
                let _ = writeln!(
                    out,
                    "{indent}t{} -> t{};",
                    member.id.raw(),
                    successor.id.raw()
                );
            }
        }
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedulable for TaskGraph {
    fn id(&self) -> TaskId {
        self.node.id
    }

    fn name(&self) -> String {
        self.node.display_name()
    }

    fn set_name(&self, name: &str) {
        // Renaming is metadata only and allowed after sealing.
        self.node.set_name(name);
    }

    fn then<'a>(&self, continuation: &'a dyn Schedulable) -> Result<&'a dyn Schedulable> {
        self.node.link(continuation)?;
        Ok(continuation)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for TaskGraph {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for TaskGraph {}

impl Hash for TaskGraph {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.id.hash(state);
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("id", &self.node.id)
            .field("name", &self.node.display_name())
            .field("tasks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Task {
        Task::named(name, || Ok(()))
    }

    #[test]
    fn add_task_is_idempotent() {
        let graph = TaskGraph::named("g");
        let a = noop("a");
        graph.add_task(&a).unwrap();
        graph.add_task(&a).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(&a));
    }

    #[test]
    fn task_can_only_belong_to_one_graph() {
        let (g1, g2) = (TaskGraph::named("g1"), TaskGraph::named("g2"));
        let a = noop("a");
        g1.add_task(&a).unwrap();
        match g2.add_task(&a) {
            Err(SchedulerError::TaskAlreadyOwned { task, graph }) => {
                assert_eq!(task, "a");
                assert_eq!(graph, "g1");
            }
            other => panic!("expected TaskAlreadyOwned, got {other:?}"),
        }
    }

    #[test]
    fn graph_cannot_contain_itself() {
        let g = TaskGraph::named("g");
        assert!(matches!(g.add_task(&g), Err(SchedulerError::NotSupported(_))));
    }

    #[test]
    fn enclosing_graph_cannot_become_a_member() {
        let outer = TaskGraph::named("outer");
        let middle = TaskGraph::named("middle");
        let inner = TaskGraph::named("inner");
        outer.add_task(&middle).unwrap();
        middle.add_task(&inner).unwrap();

        assert!(matches!(middle.add_task(&outer), Err(SchedulerError::NotSupported(_))));
        assert!(matches!(inner.add_task(&outer), Err(SchedulerError::NotSupported(_))));
        assert!(matches!(inner.add_task(&middle), Err(SchedulerError::NotSupported(_))));
        assert!(inner.is_empty());
        assert_eq!(middle.len(), 1);
    }

    #[test]
    fn with_root_adds_root_member() {
        let g = TaskGraph::with_root("boot", || Ok(()));
        let root = g.root().unwrap();
        assert_eq!(root.name(), "boot/root");
        assert!(g.contains(&root));
        assert_eq!(g.name(), "boot");
    }

    #[test]
    fn dump_lists_nodes_and_member_edges() {
        let g = TaskGraph::named("diamond");
        let t1 = noop("T1");
        let t2 = noop("T2");
        let outside = noop("outside");
        g.add_task(&t1).unwrap();
        g.add_task(&t2).unwrap();
        t1.then(&t2).unwrap();
        t1.then(&outside).unwrap();

        let dot = g.dump();
        assert!(dot.starts_with("digraph \"diamond\" {"));
        assert!(dot.contains(&format!("t{} [label=\"T1\"];", t1.id().raw())));
        assert!(dot.contains(&format!("t{} -> t{};", t1.id().raw(), t2.id().raw())));
        assert!(!dot.contains("outside"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn dump_renders_nested_graphs_as_clusters() {
        let outer = TaskGraph::named("outer");
        let inner = TaskGraph::named("inner \"quoted\"");
        inner.add_task(&noop("leaf")).unwrap();
        outer.add_task(&inner).unwrap();

        let dot = outer.dump();
        assert!(dot.contains(&format!("subgraph cluster_{}", inner.id().raw())));
        assert!(dot.contains("label=\"inner \\\"quoted\\\"\""));
        assert!(dot.contains("[label=\"leaf\"]"));
    }

    #[test]
    fn unnamed_tasks_are_labelled_by_id() {
        let g = TaskGraph::new();
        let t = Task::new(|| Ok(()));
        g.add_task(&t).unwrap();
        assert!(g.dump().contains(&format!("label=\"{}\"", t.id())));
    }
}
