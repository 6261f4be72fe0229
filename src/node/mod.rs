// src/node/mod.rs

//! Node data model.
//!
//! Every value a plan is built from (literal values, parameters, executables,
//! schedulers and checkpoints) is an immutable [`Node`] held behind a
//! [`NodeRef`]. Identity is carried by the [`NodeId`] handle allocated when
//! the node is created; two `NodeRef`s are equal iff they share that handle,
//! no matter what the records look like structurally.
//!
//! - [`builders`] provides fluent builders for executables and schedulers.
//! - [`assignment`] defines [`Assignment`], the override record.

pub mod assignment;
pub mod builders;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use assignment::Assignment;
pub use builders::{ExecutableBuilder, SchedulerBuilder};

/// Dynamically typed value passed between tasks.
pub type Datum = serde_json::Value;

/// Resolved dependency values handed to an operation body, by name.
pub type Context = BTreeMap<String, Datum>;

/// Named dependencies of an executable or scheduler.
pub type Dependencies = BTreeMap<String, NodeRef>;

/// Boxed, sendable future returned by operation bodies.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Body of an [`Executable`]: `(context, task context, sibling contexts)`.
pub type ExecuteFn =
    Arc<dyn Fn(Context, TaskContext, Vec<Context>) -> BoxFuture<anyhow::Result<Datum>> + Send + Sync>;

/// Body of a [`Scheduler`]: yields the forks to splice into the live graph.
pub type ForkFn =
    Arc<dyn Fn(Context, TaskContext) -> BoxFuture<anyhow::Result<Vec<Fork>>> + Send + Sync>;

/// Predicate deciding whether a sibling context is passed to an executable.
pub type SiblingFilter = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity handle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Value,
    Parameter,
    Executable,
    Scheduler,
    Checkpoint,
}

impl NodeKind {
    /// Kinds that become vertices of an outline.
    pub fn is_operation(self) -> bool {
        matches!(
            self,
            NodeKind::Executable | NodeKind::Scheduler | NodeKind::Checkpoint
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Value => "value",
            NodeKind::Parameter => "parameter",
            NodeKind::Executable => "executable",
            NodeKind::Scheduler => "scheduler",
            NodeKind::Checkpoint => "checkpoint",
        };
        f.write_str(s)
    }
}

/// A concrete literal.
#[derive(Debug, Clone)]
pub struct Value {
    pub value: Datum,
}

/// An unbound input.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub description: Option<String>,
    pub default_value: Option<Datum>,
}

/// Extra inputs of an executable that are only visible through its filter.
#[derive(Clone)]
pub struct Siblings {
    pub dependencies: Dependencies,
    pub filter: SiblingFilter,
}

impl fmt::Debug for Siblings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Siblings")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A unit of work producing one value.
#[derive(Clone)]
pub struct Executable {
    pub name: String,
    pub dependencies: Dependencies,
    pub siblings: Option<Siblings>,
    pub body: ExecuteFn,
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("siblings", &self.siblings)
            .finish_non_exhaustive()
    }
}

/// A unit of work whose result is a sequence of further nodes.
#[derive(Clone)]
pub struct Scheduler {
    pub name: String,
    pub dependencies: Dependencies,
    pub body: ForkFn,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A grouping node carrying a local batch of assignment overrides.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub dependencies: Vec<NodeRef>,
    pub assignments: Vec<Assignment>,
}

/// The closed set of node variants.
#[derive(Debug, Clone)]
pub enum Node {
    Value(Value),
    Parameter(Parameter),
    Executable(Executable),
    Scheduler(Scheduler),
    Checkpoint(Checkpoint),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Value(_) => NodeKind::Value,
            Node::Parameter(_) => NodeKind::Parameter,
            Node::Executable(_) => NodeKind::Executable,
            Node::Scheduler(_) => NodeKind::Scheduler,
            Node::Checkpoint(_) => NodeKind::Checkpoint,
        }
    }
}

struct NodeCell {
    id: NodeId,
    node: Node,
}

/// Shared, immutable handle to a node.
///
/// Cloning is cheap and preserves identity. Equality and hashing only look
/// at the [`NodeId`].
#[derive(Clone)]
pub struct NodeRef(Arc<NodeCell>);

impl NodeRef {
    /// Wrap a record into a fresh node with a new identity.
    pub fn new(node: Node) -> Self {
        NodeRef(Arc::new(NodeCell {
            id: NodeId::next(),
            node,
        }))
    }

    pub fn value(value: impl Into<Datum>) -> Self {
        Self::new(Node::Value(Value {
            value: value.into(),
        }))
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::new(Node::Parameter(Parameter {
            name: name.into(),
            description: None,
            default_value: None,
        }))
    }

    pub fn parameter_with_default(name: impl Into<String>, default: impl Into<Datum>) -> Self {
        Self::new(Node::Parameter(Parameter {
            name: name.into(),
            description: None,
            default_value: Some(default.into()),
        }))
    }

    pub fn checkpoint(
        name: impl Into<String>,
        dependencies: Vec<NodeRef>,
        assignments: Vec<Assignment>,
    ) -> Self {
        Self::new(Node::Checkpoint(Checkpoint {
            name: name.into(),
            dependencies,
            assignments,
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn node(&self) -> &Node {
        &self.0.node
    }

    pub fn kind(&self) -> NodeKind {
        self.0.node.kind()
    }

    /// Declared name; `None` for literal values.
    pub fn name(&self) -> Option<&str> {
        match self.node() {
            Node::Value(_) => None,
            Node::Parameter(p) => Some(&p.name),
            Node::Executable(e) => Some(&e.name),
            Node::Scheduler(s) => Some(&s.name),
            Node::Checkpoint(c) => Some(&c.name),
        }
    }

    /// Human readable label used in logs and error messages.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("{}{}", self.kind(), self.id()),
        }
    }

    /// Ordinary (non-sibling) dependencies, in declaration order.
    pub fn dependency_nodes(&self) -> Vec<NodeRef> {
        match self.node() {
            Node::Value(_) | Node::Parameter(_) => Vec::new(),
            Node::Executable(e) => e.dependencies.values().cloned().collect(),
            Node::Scheduler(s) => s.dependencies.values().cloned().collect(),
            Node::Checkpoint(c) => c.dependencies.clone(),
        }
    }

    /// Reference equality (same identity).
    pub fn is(&self, other: &NodeRef) -> bool {
        self.id() == other.id()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}{})", self.kind(), self.label(), self.id())
    }
}

/// Per-task information handed to operation bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub run_name: String,
    pub scope_name: String,
    pub operation_name: String,
    pub explicit: bool,
}

/// A node produced by a scheduler, optionally with its own overrides.
#[derive(Debug, Clone)]
pub struct Fork {
    pub node: NodeRef,
    pub assignments: Vec<Assignment>,
}

impl Fork {
    pub fn new(node: NodeRef) -> Self {
        Self {
            node,
            assignments: Vec::new(),
        }
    }

    pub fn with_assignments(mut self, assignments: Vec<Assignment>) -> Self {
        self.assignments = assignments;
        self
    }
}

impl From<NodeRef> for Fork {
    fn from(node: NodeRef) -> Self {
        Fork::new(node)
    }
}
