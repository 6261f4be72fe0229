// src/engine/runtime.rs

//! Async shell around [`ScheduleState`].
//!
//! The [`Executor`] owns the task table and a Tokio `JoinSet`. It starts
//! whatever the core says is ready, waits for the next completion, reports
//! it back to the core and starts whatever became ready. All bookkeeping
//! happens on the executor's own task between completions, so none of it
//! needs locking.
//!
//! Scheduler tasks are special: their forks are planned and spliced into the
//! live graph when the scheduler completes (see [`Executor::splice`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::{Graph, map_vertices};
use crate::engine::core::ScheduleState;
use crate::engine::scope::Scope;
use crate::engine::summary::{RunSummary, TaskRecord};
use crate::engine::task::{Task, TaskId, TaskOutput};
use crate::errors::{PlanError, Result};
use crate::monitor::Monitor;
use crate::node::{Datum, Fork, Node, NodeId, NodeRef};
use crate::resolve::{AssignmentResolver, AssignmentScopeId, AssignmentScopes, ValidSchedule, Vertex};

/// Executor tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Maximum number of tasks in flight; `None` is unbounded.
    pub max_concurrency: Option<usize>,
}

/// Tasks ready to be executed, plus everything they need at runtime.
pub struct Schedule {
    pub run_name: String,
    pub graph: Graph<TaskId>,
    pub tasks: HashMap<TaskId, Task>,
    pub resolver: Arc<AssignmentResolver>,
    pub root_scope: Arc<Scope>,
    pub monitor: Arc<dyn Monitor>,
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("run_name", &self.run_name)
            .field("tasks", &self.tasks.len())
            .field("root_scope", &self.root_scope)
            .finish_non_exhaustive()
    }
}

impl Schedule {
    /// Wrap every outline vertex into a task bound to a fresh root scope
    /// preloaded with the statically resolved values.
    pub fn from_valid(run_name: impl Into<String>, valid: ValidSchedule, monitor: Arc<dyn Monitor>) -> Result<Self> {
        let run_name = run_name.into();
        let ValidSchedule {
            outline,
            resolved_values,
            resolver,
        } = valid;

        let root_scope = Scope::root(run_name.clone(), resolved_values);

        let mut ids: Vec<(NodeId, TaskId)> = Vec::with_capacity(outline.len());
        let graph = map_vertices(outline.graph(), |node| {
            let task = TaskId::new(ids.len());
            ids.push((node, task));
            task
        });

        let mut tasks = HashMap::with_capacity(ids.len());
        for (node, id) in ids {
            let Some(vertex) = outline.vertex(node) else {
                continue;
            };
            let task = Task::from_vertex(id, vertex.clone(), Arc::clone(&root_scope), &resolver)?;
            tasks.insert(id, task);
        }

        Ok(Self {
            run_name,
            graph,
            tasks,
            resolver,
            root_scope,
            monitor,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Run `schedule` to completion.
pub async fn execute_schedule(schedule: Schedule, options: ExecuteOptions) -> RunSummary {
    Executor::new(schedule, options).run().await
}

/// Scheduler results waiting on their forks.
#[derive(Debug)]
struct ForkGroup {
    scheduler: TaskId,
    node: NodeId,
    scope: Arc<Scope>,
    results: Vec<Option<Datum>>,
    pending: usize,
    /// Tasks whose results fill `results`.
    members: Vec<TaskId>,
}

/// A planned dependency or fork.
enum Planned {
    Ready(Datum),
    Task(TaskId),
    /// A scheduler that already spliced its forks; its value is published
    /// once every task in `gates` has finished.
    Pending { scheduler: TaskId, gates: Vec<TaskId> },
}

impl Planned {
    /// Live tasks a dependent has to wait for.
    fn gates(&self) -> Vec<TaskId> {
        match self {
            Planned::Ready(_) => Vec::new(),
            Planned::Task(task) => vec![*task],
            Planned::Pending { gates, .. } => gates.clone(),
        }
    }
}

/// Everything a successful fork plan adds to the run.
struct ForkPlan {
    new_tasks: Vec<Task>,
    edges: Vec<(TaskId, TaskId)>,
    results: Vec<Option<Datum>>,
    members: Vec<(TaskId, usize)>,
    /// Live tasks the scheduler's former children must wait for.
    gates: Vec<TaskId>,
}

/// Walks fork nodes and decides, for each operation, whether to reuse a live
/// task, reuse a visible value, or create a new task.
struct ForkPlanner<'a> {
    scopes: &'a mut AssignmentScopes,
    resolver: &'a AssignmentResolver,
    region: Arc<Scope>,
    scheduler_node: NodeId,
    state: &'a ScheduleState,
    tasks: &'a HashMap<TaskId, Task>,
    live_nodes: &'a HashMap<NodeId, TaskId>,
    groups: &'a [ForkGroup],
    group_of: &'a HashMap<TaskId, usize>,
    downstream: HashSet<TaskId>,
    next_task: &'a mut usize,
    staged: HashMap<NodeId, TaskId>,
    visiting: HashSet<NodeId>,
    new_tasks: Vec<Task>,
    edges: Vec<(TaskId, TaskId)>,
}

impl ForkPlanner<'_> {
    fn plan(&mut self, scope: AssignmentScopeId, raw: &NodeRef) -> anyhow::Result<(NodeId, Planned)> {
        if scope == self.scopes.root() {
            let flat = self.resolver.resolve(raw)?.node;
            if flat.kind().is_operation() {
                if let Some(planned) = self.reuse(&flat)? {
                    return Ok((flat.id(), planned));
                }
            }
        }

        let node = self.scopes.resolve(scope, raw)?;
        let id = node.id();

        match node.node() {
            Node::Value(value) => {
                self.region.set(id, value.value.clone());
                Ok((id, Planned::Ready(value.value.clone())))
            }
            Node::Parameter(param) => match &param.default_value {
                Some(default) => {
                    self.region.set(id, default.clone());
                    Ok((id, Planned::Ready(default.clone())))
                }
                None => Err(PlanError::UnresolvedParameters(vec![param.name.clone()]).into()),
            },
            Node::Executable(_) | Node::Scheduler(_) | Node::Checkpoint(_) => {
                if let Some(planned) = self.reuse(&node)? {
                    return Ok((id, planned));
                }
                if !self.visiting.insert(id) {
                    return Err(PlanError::Cycle(format!("fork re-enters '{}'", node.label())).into());
                }
                let planned = self.plan_operation(scope, &node);
                self.visiting.remove(&id);
                Ok((id, planned?))
            }
        }
    }

    /// An operation that is already staged, live and visible, or computed
    /// and visible from the region needs no new task.
    fn reuse(&self, node: &NodeRef) -> anyhow::Result<Option<Planned>> {
        let id = node.id();

        if id == self.scheduler_node {
            return Err(PlanError::Cycle(format!("fork depends on its own scheduler '{}'", node.label())).into());
        }

        if let Some(&task) = self.staged.get(&id) {
            return Ok(Some(Planned::Task(task)));
        }

        if let Some(&task) = self.live_nodes.get(&id) {
            let visible = self
                .tasks
                .get(&task)
                .is_some_and(|live| self.region.is_within(&live.scope));
            if visible && self.state.is_live(task) {
                if self.downstream.contains(&task) {
                    return Err(PlanError::Cycle(format!(
                        "fork depends on '{}', which depends on its scheduler",
                        node.label()
                    ))
                    .into());
                }
                return Ok(Some(Planned::Task(task)));
            }
            if visible {
                if let Some(gates) = self.pending_gates(task) {
                    if gates.iter().any(|gate| self.downstream.contains(gate)) {
                        return Err(PlanError::Cycle(format!(
                            "fork depends on '{}', whose forks depend on its scheduler",
                            node.label()
                        ))
                        .into());
                    }
                    return Ok(Some(Planned::Pending { scheduler: task, gates }));
                }
            }
        }

        Ok(self.region.get(id).map(Planned::Ready))
    }

    /// Live tasks still holding back the value of `scheduler`, or `None` if
    /// it has no open fork group. Nested schedulers are followed.
    fn pending_gates(&self, scheduler: TaskId) -> Option<Vec<TaskId>> {
        let group = self.groups.get(*self.group_of.get(&scheduler)?)?;
        if group.pending == 0 {
            return None;
        }

        let mut gates = Vec::new();
        for &member in &group.members {
            if self.state.is_live(member) {
                gates.push(member);
            } else if let Some(inner) = self.pending_gates(member) {
                gates.extend(inner);
            }
        }
        Some(gates)
    }

    fn plan_operation(&mut self, scope: AssignmentScopeId, node: &NodeRef) -> anyhow::Result<Planned> {
        let mut inputs = BTreeMap::new();
        let mut sibling_inputs = BTreeMap::new();
        let mut dependency_ids = Vec::new();
        let mut parents = Vec::new();

        match node.node() {
            Node::Executable(exe) => {
                for (key, dep) in &exe.dependencies {
                    let (dep_id, planned) = self.plan(scope, dep)?;
                    inputs.insert(key.clone(), dep_id);
                    dependency_ids.push(dep_id);
                    parents.extend(planned.gates());
                }
                if let Some(siblings) = &exe.siblings {
                    for (key, dep) in &siblings.dependencies {
                        let sibling = self.scopes.resolve(scope, dep)?;
                        let literal = match sibling.node() {
                            Node::Value(value) => Some(&value.value),
                            Node::Parameter(param) => param.default_value.as_ref(),
                            Node::Executable(_) | Node::Scheduler(_) | Node::Checkpoint(_) => None,
                        };
                        if let Some(literal) = literal {
                            self.region.set(sibling.id(), literal.clone());
                        }
                        sibling_inputs.insert(key.clone(), sibling.id());
                    }
                }
            }
            Node::Scheduler(scheduler) => {
                for (key, dep) in &scheduler.dependencies {
                    let (dep_id, planned) = self.plan(scope, dep)?;
                    inputs.insert(key.clone(), dep_id);
                    dependency_ids.push(dep_id);
                    parents.extend(planned.gates());
                }
            }
            Node::Checkpoint(cp) => {
                let inner = if cp.assignments.is_empty() {
                    scope
                } else {
                    self.scopes.fork(scope, &cp.assignments)?
                };
                for dep in &cp.dependencies {
                    let (dep_id, planned) = self.plan(inner, dep)?;
                    dependency_ids.push(dep_id);
                    parents.extend(planned.gates());
                }
            }
            Node::Value(_) | Node::Parameter(_) => {
                return Err(anyhow!("{} '{}' cannot be planned as a task", node.kind(), node.label()));
            }
        }

        let task_scope = if parents.is_empty() {
            self.region
                .earliest_ancestor_providing_values(&dependency_ids)
                .unwrap_or_else(|| Arc::clone(&self.region))
        } else {
            Arc::clone(&self.region)
        };

        let id = TaskId::new(*self.next_task);
        *self.next_task += 1;

        debug!(
            task = %id,
            node = %node.label(),
            scope = %task_scope.name(),
            parents = parents.len(),
            "planned fork task"
        );

        self.staged.insert(node.id(), id);
        self.edges.extend(parents.into_iter().map(|parent| (parent, id)));
        self.new_tasks.push(Task {
            id,
            vertex: Vertex::implicit(node.clone()),
            scope: task_scope,
            inputs,
            sibling_inputs,
        });

        Ok(Planned::Task(id))
    }
}

/// Drives one schedule to completion.
pub struct Executor {
    run_name: String,
    state: ScheduleState,
    tasks: HashMap<TaskId, Task>,
    live_nodes: HashMap<NodeId, TaskId>,
    resolver: Arc<AssignmentResolver>,
    assignment_scopes: Option<AssignmentScopes>,
    monitor: Arc<dyn Monitor>,
    join_set: JoinSet<(TaskId, anyhow::Result<TaskOutput>)>,
    running: HashMap<tokio::task::Id, TaskId>,
    groups: Vec<ForkGroup>,
    group_of: HashMap<TaskId, usize>,
    memberships: HashMap<TaskId, Vec<(usize, usize)>>,
    next_task: usize,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("run_name", &self.run_name)
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(schedule: Schedule, options: ExecuteOptions) -> Self {
        let Schedule {
            run_name,
            graph,
            tasks,
            resolver,
            root_scope: _,
            monitor,
        } = schedule;

        let live_nodes = tasks.values().map(|task| (task.vertex.id(), task.id)).collect();
        let next_task = tasks.keys().map(|id| id.index() + 1).max().unwrap_or(0);

        Self {
            run_name,
            state: ScheduleState::new(graph, options.max_concurrency),
            tasks,
            live_nodes,
            resolver,
            assignment_scopes: None,
            monitor,
            join_set: JoinSet::new(),
            running: HashMap::new(),
            groups: Vec::new(),
            group_of: HashMap::new(),
            memberships: HashMap::new(),
            next_task,
        }
    }

    /// Main loop: start what is ready, then react to completions until
    /// nothing is running and nothing can start.
    pub async fn run(mut self) -> RunSummary {
        info!(run = %self.run_name, tasks = self.tasks.len(), "run started");

        self.propagate();

        while let Some(joined) = self.join_set.join_next_with_id().await {
            match joined {
                Ok((handle, (task, result))) => {
                    self.running.remove(&handle);
                    self.on_complete(task, result);
                }
                Err(err) => match self.running.remove(&err.id()) {
                    Some(task) => self.fail(task, anyhow!("task panicked: {err}")),
                    None => warn!(run = %self.run_name, error = %err, "join error for unknown task"),
                },
            }

            self.propagate();
        }

        self.settle()
    }

    /// Start tasks while the core hands them out.
    fn propagate(&mut self) {
        while let Some(task) = self.state.next_ready() {
            self.start(task);
        }
    }

    fn start(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(&id) else {
            warn!(run = %self.run_name, task = %id, "ready task missing from task table");
            self.state.complete_failure(id, anyhow!("unknown task {id}"));
            return;
        };

        self.monitor.task_started(&task.context(&self.run_name));
        let future = task.start(&self.run_name, self.monitor.as_ref());
        let handle = self.join_set.spawn(async move { (id, future.await) });
        self.running.insert(handle.id(), id);
    }

    fn on_complete(&mut self, id: TaskId, result: anyhow::Result<TaskOutput>) {
        match result {
            Ok(TaskOutput::Value(value)) => {
                self.succeed(id, &[]);
                self.finish_member(id, value);
            }
            Ok(TaskOutput::Checkpoint) => {
                self.succeed(id, &[]);
                self.finish_member(id, Datum::Null);
            }
            Ok(TaskOutput::Forks(forks)) => match self.splice(id, forks) {
                Ok(spliced) => self.succeed(id, &spliced),
                Err(err) => self.fail(id, err),
            },
            Err(err) => self.fail(id, err),
        }
    }

    fn succeed(&mut self, id: TaskId, spliced: &[TaskId]) {
        if let Some(task) = self.tasks.get(&id) {
            self.monitor.task_succeeded(&task.context(&self.run_name));
        }
        self.state.complete_success(id, spliced);
    }

    fn fail(&mut self, id: TaskId, error: anyhow::Error) {
        if let Some(task) = self.tasks.get(&id) {
            self.monitor.task_failed(&task.context(&self.run_name), &error);
        }
        self.state.complete_failure(id, error);
    }

    /// Plan the forks of scheduler `id` and splice them into the live graph.
    ///
    /// Returns the new tasks. On error nothing is added and the scheduler is
    /// expected to be recorded as failed.
    fn splice(&mut self, id: TaskId, forks: Vec<Fork>) -> anyhow::Result<Vec<TaskId>> {
        let Some(scheduler) = self.tasks.get(&id) else {
            return Err(anyhow!("unknown scheduler task {id}"));
        };
        let scheduler_node = scheduler.vertex.id();
        let scheduler_scope = Arc::clone(&scheduler.scope);
        let region = Scope::child(
            &scheduler_scope,
            format!("{}/{}", scheduler_scope.name(), scheduler.name()),
        );

        let mut scopes = match self.assignment_scopes.take() {
            Some(scopes) => scopes,
            None => AssignmentScopes::new(self.resolver.assignments())?,
        };
        let plan = self.plan_forks(&mut scopes, id, scheduler_node, &region, &forks);
        self.assignment_scopes = Some(scopes);
        let plan = plan?;

        let former_children = self.state.graph().children_of(id);
        let spliced: Vec<TaskId> = plan.new_tasks.iter().map(|task| task.id).collect();

        for task in plan.new_tasks {
            self.state.add_task(task.id);
            self.live_nodes.insert(task.vertex.id(), task.id);
            self.tasks.insert(task.id, task);
        }
        for (from, to) in plan.edges {
            self.state.add_dependency(from, to);
        }

        for gate in &plan.gates {
            for child in &former_children {
                self.state.add_dependency(*gate, *child);
            }
        }

        let mut pending = 0;
        for (member, index) in &plan.members {
            self.memberships
                .entry(*member)
                .or_default()
                .push((self.groups.len(), *index));
            pending += 1;
        }

        info!(
            run = %self.run_name,
            scheduler = %id,
            scope = %region.name(),
            forks = forks.len(),
            new_tasks = spliced.len(),
            "forks spliced"
        );

        let group = self.groups.len();
        self.groups.push(ForkGroup {
            scheduler: id,
            node: scheduler_node,
            scope: scheduler_scope,
            results: plan.results,
            pending,
            members: plan.members.iter().map(|(member, _)| *member).collect(),
        });
        self.group_of.insert(id, group);
        if pending == 0 {
            self.complete_group(group);
        }

        Ok(spliced)
    }

    fn plan_forks(
        &mut self,
        scopes: &mut AssignmentScopes,
        scheduler: TaskId,
        scheduler_node: NodeId,
        region: &Arc<Scope>,
        forks: &[Fork],
    ) -> anyhow::Result<ForkPlan> {
        let downstream = descendants(self.state.graph(), scheduler);

        let mut planner = ForkPlanner {
            scopes,
            resolver: self.resolver.as_ref(),
            region: Arc::clone(region),
            scheduler_node,
            state: &self.state,
            tasks: &self.tasks,
            live_nodes: &self.live_nodes,
            groups: &self.groups,
            group_of: &self.group_of,
            downstream,
            next_task: &mut self.next_task,
            staged: HashMap::new(),
            visiting: HashSet::new(),
            new_tasks: Vec::new(),
            edges: Vec::new(),
        };

        let mut results = Vec::with_capacity(forks.len());
        let mut members = Vec::new();
        let mut gates = Vec::new();

        for (index, fork) in forks.iter().enumerate() {
            let root = planner.scopes.root();
            let scope = if fork.assignments.is_empty() {
                root
            } else {
                planner.scopes.fork(root, &fork.assignments)?
            };

            match planner.plan(scope, &fork.node)?.1 {
                Planned::Ready(value) => results.push(Some(value)),
                Planned::Task(task) => {
                    results.push(None);
                    members.push((task, index));
                    gates.push(task);
                }
                Planned::Pending { scheduler, gates: waiting } => {
                    results.push(None);
                    members.push((scheduler, index));
                    gates.extend(waiting);
                }
            }
        }

        Ok(ForkPlan {
            new_tasks: planner.new_tasks,
            edges: planner.edges,
            results,
            members,
            gates,
        })
    }

    /// Record `value` for every fork group `task` belongs to.
    fn finish_member(&mut self, task: TaskId, value: Datum) {
        let Some(memberships) = self.memberships.remove(&task) else {
            return;
        };

        for (group, index) in memberships {
            let Some(entry) = self.groups.get_mut(group) else {
                continue;
            };
            if let Some(slot) = entry.results.get_mut(index) {
                *slot = Some(value.clone());
            }
            entry.pending = entry.pending.saturating_sub(1);
            if entry.pending == 0 {
                self.complete_group(group);
            }
        }
    }

    /// All forks are done: publish the scheduler's value.
    fn complete_group(&mut self, group: usize) {
        let Some(entry) = self.groups.get(group) else {
            return;
        };

        let value = Datum::Array(
            entry
                .results
                .iter()
                .map(|result| result.clone().unwrap_or(Datum::Null))
                .collect(),
        );
        entry.scope.set(entry.node, value.clone());
        let scheduler = entry.scheduler;

        debug!(run = %self.run_name, scheduler = %scheduler, "all forks finished");
        self.finish_member(scheduler, value);
    }

    fn settle(self) -> RunSummary {
        let tasks = self.tasks;
        let record = |id: TaskId| tasks.get(&id).map(TaskRecord::from);

        let outcome = self.state.into_outcome();
        let successful = outcome.successful();

        let summary = RunSummary {
            successful,
            executed: outcome.executed.into_iter().filter_map(record).collect(),
            failed: outcome
                .failed
                .into_iter()
                .filter_map(|(id, error)| record(id).map(|r| (r, error)))
                .collect(),
            unexecuted: outcome.unexecuted.into_iter().filter_map(record).collect(),
        };

        debug!(
            run = %self.run_name,
            successful,
            executed = summary.executed.len(),
            failed = summary.failed.len(),
            unexecuted = summary.unexecuted.len(),
            "run settled"
        );
        self.monitor.run_finished(&summary);
        summary
    }
}

/// Every task reachable from `start`, excluding `start`.
fn descendants(graph: &Graph<TaskId>, start: TaskId) -> HashSet<TaskId> {
    let mut seen = HashSet::new();
    let mut stack = graph.children_of(start);

    while let Some(task) = stack.pop() {
        if seen.insert(task) {
            stack.extend(graph.children_of(task));
        }
    }

    seen
}
