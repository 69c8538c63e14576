// src/dag/task.rs

//! Tasks and the `Schedulable` capability.
//!
//! A [`Task`] is a cheap, clonable handle on a shared [`TaskNode`]. Nodes keep
//! their `then()` continuations as weak references: the graph that contains a
//! task owns it, the edges only observe.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::dag::task_graph::{GraphBody, TaskGraph};
use crate::errors::{Result, SchedulerError, TaskError};
use crate::exec::backend::invoke;
use crate::types::{Affinity, TaskId};

pub(crate) type Work = Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>;

/// Something that can take part in a task graph: it has a name, can have
/// continuations and can be a continuation.
///
/// Implemented by [`Task`] and [`TaskGraph`]. Other implementations can exist
/// but are rejected wherever a node of this crate is required.
pub trait Schedulable: Send + Sync + fmt::Debug {
    fn id(&self) -> TaskId;

    /// The task's name, or its id if it was never named.
    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    /// Run `continuation` only after `self` completed successfully.
    ///
    /// Returns the continuation so calls chain: `a.then(&b)?.then(&c)?`.
    fn then<'a>(&self, continuation: &'a dyn Schedulable) -> Result<&'a dyn Schedulable>;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) enum NodeBody {
    Work(Mutex<Work>),
    Graph(Arc<GraphBody>),
}

/// Shared state behind a task or task-graph handle.
pub(crate) struct TaskNode {
    pub(crate) id: TaskId,
    name: RwLock<Option<String>>,
    pub(crate) body: NodeBody,
    successors: Mutex<Vec<Weak<TaskNode>>>,
    affinity: RwLock<Affinity>,
    owner: Mutex<Weak<TaskNode>>,
    sealed: AtomicBool,
}

impl TaskNode {
    pub(crate) fn new(name: Option<String>, body: NodeBody) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            name: RwLock::new(name),
            body,
            successors: Mutex::new(Vec::new()),
            affinity: RwLock::new(Affinity::default()),
            owner: Mutex::new(Weak::new()),
            sealed: AtomicBool::new(false),
        })
    }

    pub(crate) fn display_name(&self) -> String {
        self.name
            .read()
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = Some(name.to_string());
    }

    pub(crate) fn affinity(&self) -> Affinity {
        *self.affinity.read()
    }

    fn set_affinity(&self, affinity: Affinity) {
        *self.affinity.write() = affinity;
    }

    /// Live continuations, in the order they were added.
    pub(crate) fn successors(&self) -> Vec<Arc<TaskNode>> {
        let mut successors = self.successors.lock();
        successors.retain(|w| w.strong_count() > 0);
        successors.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn owner(&self) -> Option<Arc<TaskNode>> {
        self.owner.lock().upgrade()
    }

    pub(crate) fn set_owner(&self, graph: &Arc<TaskNode>) {
        *self.owner.lock() = Arc::downgrade(graph);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Run the node's callable. Graph nodes have nothing to run themselves.
    pub(crate) fn invoke(&self, name: &str) -> std::result::Result<(), TaskError> {
        match &self.body {
            NodeBody::Work(work) => {
                let mut work = work.lock();
                invoke(name, || (*work)())
            }
            NodeBody::Graph(_) => Ok(()),
        }
    }

    /// Add a `self -> continuation` edge.
    pub(crate) fn link(&self, continuation: &dyn Schedulable) -> Result<()> {
        let target = node_of(continuation).ok_or_else(|| not_recognized(continuation))?;

        if target.id == self.id {
            return Err(SchedulerError::GraphCycle(format!(
                "'{}' cannot be its own continuation",
                self.display_name()
            )));
        }
        if self.is_sealed() {
            return Err(SchedulerError::GraphSealed(self.display_name()));
        }
        if target.is_sealed() {
            return Err(SchedulerError::GraphSealed(target.display_name()));
        }

        let mut successors = self.successors.lock();
        let weak = Arc::downgrade(target);
        if successors.iter().any(|w| w.ptr_eq(&weak)) {
            return Ok(());
        }
        successors.push(weak);

        debug!(
            from = %self.display_name(),
            to = %target.display_name(),
            "added continuation edge"
        );
        Ok(())
    }
}

/// Resolve a `Schedulable` to the node of one of this crate's handle types.
pub(crate) fn node_of(task: &dyn Schedulable) -> Option<&Arc<TaskNode>> {
    let any = task.as_any();
    if let Some(task) = any.downcast_ref::<Task>() {
        Some(&task.node)
    } else if let Some(graph) = any.downcast_ref::<TaskGraph>() {
        Some(&graph.node)
    } else {
        None
    }
}

pub(crate) fn not_recognized(task: &dyn Schedulable) -> SchedulerError {
    SchedulerError::NotSupported(format!(
        "'{}' is not a Task or TaskGraph created by this library",
        task.name()
    ))
}

/// A named unit of work.
///
/// Clones are handles on the same task; equality and hashing go by id.
#[derive(Clone)]
pub struct Task {
    pub(crate) node: Arc<TaskNode>,
}

impl Task {
    /// An anonymous task running `work`.
    pub fn new<F>(work: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self::build(None, work)
    }

    pub fn named<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self::build(Some(name.into()), work)
    }

    fn build<F>(name: Option<String>, work: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let body = NodeBody::Work(Mutex::new(Box::new(work)));
        Self {
            node: TaskNode::new(name, body),
        }
    }

    /// Route this task to the scheduler's main loop instead of the pool.
    pub fn on_main_loop(self) -> Self {
        self.node.set_affinity(Affinity::MainLoop);
        self
    }

    pub fn affinity(&self) -> Affinity {
        self.node.affinity()
    }

    pub fn set_affinity(&self, affinity: Affinity) {
        self.node.set_affinity(affinity);
    }

    /// Ids of the live continuations registered with `then()`.
    pub fn continuations(&self) -> Vec<TaskId> {
        self.node.successors().iter().map(|n| n.id).collect()
    }
}

impl Schedulable for Task {
    fn id(&self) -> TaskId {
        self.node.id
    }

    fn name(&self) -> String {
        self.node.display_name()
    }

    fn set_name(&self, name: &str) {
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

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.node.id)
            .field("name", &self.node.display_name())
            .field("affinity", &self.node.affinity())
            .finish()
    }
}
