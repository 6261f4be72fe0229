// src/engine/task.rs

//! Task dispatch.
//!
//! A [`Task`] is one outline vertex bound to the runtime scope it reads its
//! inputs from and writes its result to. Input ids are fixed when the task is
//! built, so starting a task only needs the scope.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::engine::scope::Scope;
use crate::errors::Result;
use crate::monitor::Monitor;
use crate::node::{BoxFuture, Context, Datum, Dependencies, Fork, Node, NodeId, TaskContext};
use crate::resolve::{AssignmentResolver, Vertex};

/// Identifier of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub fn new(index: usize) -> Self {
        TaskId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}", self.0)
    }
}

/// What a finished task hands back to the executor.
#[derive(Debug)]
pub enum TaskOutput {
    Checkpoint,
    Value(Datum),
    Forks(Vec<Fork>),
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub vertex: Vertex,
    pub scope: Arc<Scope>,
    /// Dependency name -> id of the node whose value is read from `scope`.
    pub inputs: BTreeMap<String, NodeId>,
    /// Same for sibling dependencies; missing values are skipped.
    pub sibling_inputs: BTreeMap<String, NodeId>,
}

fn resolve_inputs(dependencies: &Dependencies, resolver: &AssignmentResolver) -> Result<BTreeMap<String, NodeId>> {
    dependencies
        .iter()
        .map(|(key, dep)| -> Result<(String, NodeId)> { Ok((key.clone(), resolver.resolve(dep)?.id())) })
        .collect()
}

fn gather(scope: &Scope, inputs: &BTreeMap<String, NodeId>) -> anyhow::Result<Context> {
    inputs
        .iter()
        .map(|(key, id)| {
            scope
                .get(*id)
                .map(|value| (key.clone(), value))
                .ok_or_else(|| anyhow!("missing value for dependency '{key}' in scope '{}'", scope.name()))
        })
        .collect()
}

fn gather_available(scope: &Scope, inputs: &BTreeMap<String, NodeId>) -> Context {
    inputs
        .iter()
        .filter_map(|(key, id)| scope.get(*id).map(|value| (key.clone(), value)))
        .collect()
}

impl Task {
    /// Build a task for an outline vertex, resolving each dependency through
    /// the flat assignment resolver.
    pub fn from_vertex(id: TaskId, vertex: Vertex, scope: Arc<Scope>, resolver: &AssignmentResolver) -> Result<Self> {
        let (inputs, sibling_inputs) = match vertex.node.node() {
            Node::Executable(exe) => (
                resolve_inputs(&exe.dependencies, resolver)?,
                match &exe.siblings {
                    Some(siblings) => resolve_inputs(&siblings.dependencies, resolver)?,
                    None => BTreeMap::new(),
                },
            ),
            Node::Scheduler(scheduler) => (resolve_inputs(&scheduler.dependencies, resolver)?, BTreeMap::new()),
            Node::Checkpoint(_) | Node::Value(_) | Node::Parameter(_) => (BTreeMap::new(), BTreeMap::new()),
        };

        Ok(Self {
            id,
            vertex,
            scope,
            inputs,
            sibling_inputs,
        })
    }

    pub fn name(&self) -> String {
        self.vertex.node.label()
    }

    pub fn context(&self, run_name: &str) -> TaskContext {
        TaskContext {
            run_name: run_name.to_string(),
            scope_name: self.scope.name().to_string(),
            operation_name: self.name(),
            explicit: self.vertex.explicit,
        }
    }

    /// Start the task.
    ///
    /// Checkpoints report to the monitor right away. Executables and
    /// schedulers read their inputs from the scope and run their body inside
    /// the returned future; an executable's result is written to the scope
    /// under its own node id before the future resolves.
    pub fn start(&self, run_name: &str, monitor: &dyn Monitor) -> BoxFuture<anyhow::Result<TaskOutput>> {
        let task_ctx = self.context(run_name);
        let node_id = self.vertex.id();
        let scope = Arc::clone(&self.scope);

        match self.vertex.node.node() {
            Node::Checkpoint(cp) => {
                monitor.mark_checkpoint(scope.name(), &cp.name, self.vertex.explicit);
                scope.set(node_id, Datum::Null);
                Box::pin(async { Ok(TaskOutput::Checkpoint) })
            }
            Node::Executable(exe) => {
                let body = Arc::clone(&exe.body);
                let filter = exe.siblings.as_ref().map(|s| Arc::clone(&s.filter));
                let inputs = self.inputs.clone();
                let sibling_inputs = self.sibling_inputs.clone();

                Box::pin(async move {
                    let ctx = gather(&scope, &inputs)?;
                    let siblings = match filter {
                        Some(filter) => {
                            let sibling_ctx = gather_available(&scope, &sibling_inputs);
                            if filter(&sibling_ctx) { vec![sibling_ctx] } else { Vec::new() }
                        }
                        None => Vec::new(),
                    };

                    let value = body(ctx, task_ctx, siblings).await?;
                    scope.set(node_id, value.clone());
                    Ok(TaskOutput::Value(value))
                })
            }
            Node::Scheduler(scheduler) => {
                let body = Arc::clone(&scheduler.body);
                let inputs = self.inputs.clone();

                Box::pin(async move {
                    let ctx = gather(&scope, &inputs)?;
                    let forks = body(ctx, task_ctx).await?;
                    Ok(TaskOutput::Forks(forks))
                })
            }
            Node::Value(_) | Node::Parameter(_) => {
                let message = format!("{} '{}' is not an operation", self.vertex.kind, self.name());
                Box::pin(async move { Err(anyhow!(message)) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::node::{ExecutableBuilder, NodeRef, SchedulerBuilder};
    use crate::resolve::collect_operations;
    use serde_json::json;

    #[derive(Default)]
    struct Checkpoints(Mutex<Vec<(String, String, bool)>>);

    impl Monitor for Checkpoints {
        fn mark_checkpoint(&self, scope: &str, name: &str, explicit: bool) {
            self.0
                .lock()
                .unwrap()
                .push((scope.to_string(), name.to_string(), explicit));
        }
    }

    fn task_for(node: &NodeRef, values: HashMap<NodeId, Datum>) -> Task {
        let resolver = AssignmentResolver::new(collect_operations(&[node.clone()], &[])).unwrap();
        let vertex = resolver.resolve(node).unwrap();
        Task::from_vertex(TaskId::new(0), vertex, Scope::root("run", values), &resolver).unwrap()
    }

    #[tokio::test]
    async fn executable_reads_inputs_and_writes_its_result() {
        let a = NodeRef::value(2);
        let b = NodeRef::value(3);
        let add = ExecutableBuilder::new("add")
            .dependency("a", a.clone())
            .dependency("b", b.clone())
            .run_sync(|ctx| Ok(json!(ctx["a"].as_i64().unwrap_or(0) + ctx["b"].as_i64().unwrap_or(0))));

        let task = task_for(&add, HashMap::from([(a.id(), json!(2)), (b.id(), json!(3))]));
        let out = task.start("run", &Checkpoints::default()).await.unwrap();

        assert!(matches!(out, TaskOutput::Value(ref v) if v == &json!(5)));
        assert_eq!(task.scope.get(add.id()), Some(json!(5)));
    }

    #[tokio::test]
    async fn missing_input_fails_the_task() {
        let a = NodeRef::value(2);
        let exe = ExecutableBuilder::new("needs-a")
            .dependency("a", a)
            .run_sync(|_| Ok(json!(null)));

        let task = task_for(&exe, HashMap::new());
        let err = task.start("run", &Checkpoints::default()).await.unwrap_err();
        assert!(err.to_string().contains("missing value for dependency 'a'"));
    }

    #[tokio::test]
    async fn sibling_context_is_passed_only_when_the_filter_accepts_it() {
        let flag = NodeRef::value(true);
        let other = NodeRef::value(1);
        let mut siblings = Dependencies::new();
        siblings.insert("flag".to_string(), flag.clone());
        siblings.insert("unset".to_string(), other.clone());

        let exe = ExecutableBuilder::new("sees-siblings")
            .siblings(siblings, |ctx| ctx.get("flag") == Some(&json!(true)))
            .run_with(|_ctx, _task, siblings| async move { Ok(json!(siblings)) });

        let accepted = task_for(&exe, HashMap::from([(flag.id(), json!(true))]));
        let out = accepted.start("run", &Checkpoints::default()).await.unwrap();
        assert!(matches!(out, TaskOutput::Value(ref v) if v == &json!([{ "flag": true }])));

        let rejected = task_for(&exe, HashMap::from([(flag.id(), json!(false))]));
        let out = rejected.start("run", &Checkpoints::default()).await.unwrap();
        assert!(matches!(out, TaskOutput::Value(ref v) if v == &json!([])));
    }

    #[tokio::test]
    async fn checkpoint_reports_to_the_monitor() {
        let cp = NodeRef::checkpoint("cp", vec![], vec![]);
        let task = task_for(&cp, HashMap::new());
        let monitor = Checkpoints::default();

        let out = task.start("run", &monitor).await.unwrap();
        assert!(matches!(out, TaskOutput::Checkpoint));
        assert_eq!(
            monitor.0.lock().unwrap().as_slice(),
            &[("run".to_string(), "cp".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn scheduler_returns_its_forks() {
        let n = NodeRef::value(2);
        let sched = SchedulerBuilder::new("fan")
            .dependency("n", n.clone())
            .fork_sync(|ctx| {
                let count = ctx["n"].as_u64().unwrap_or(0);
                Ok((0..count).map(|i| NodeRef::value(i).into()).collect())
            });

        let task = task_for(&sched, HashMap::from([(n.id(), json!(2))]));
        let out = task.start("run", &Checkpoints::default()).await.unwrap();
        assert!(matches!(out, TaskOutput::Forks(ref forks) if forks.len() == 2));
        assert!(!task.scope.has_own(sched.id()));
    }
}
