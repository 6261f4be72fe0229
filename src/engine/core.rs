// src/engine/core.rs

//! Pure frontier state machine.
//!
//! [`ScheduleState`] owns the live task graph and decides what may start
//! next. It performs no IO and knows nothing about Tokio: the async shell in
//! [`crate::engine::runtime`] asks it for ready tasks, runs them, and reports
//! each completion back. That keeps every scheduling rule unit-testable
//! with plain synchronous calls.
//!
//! Rules:
//! - the frontier starts as every vertex without parents and behaves as a
//!   stack (most recently readied tasks start first);
//! - a task may start only while fewer than `max_concurrency` tasks are in
//!   flight;
//! - a successful task's vertex is removed and any child left without
//!   parents joins the frontier;
//! - a failed task's vertex stays, so its dependents never become ready;
//!   it is reported both as failed and among the remaining vertices.

use tracing::{debug, trace};

use crate::dag::Graph;
use crate::engine::task::TaskId;

#[derive(Debug)]
pub struct ScheduleState {
    graph: Graph<TaskId>,
    frontier: Vec<TaskId>,
    in_flight: usize,
    max_concurrency: Option<usize>,
    executed: Vec<TaskId>,
    failed: Vec<(TaskId, anyhow::Error)>,
}

/// Final partition of a settled schedule.
#[derive(Debug)]
pub struct ScheduleOutcome {
    pub executed: Vec<TaskId>,
    pub failed: Vec<(TaskId, anyhow::Error)>,
    pub unexecuted: Vec<TaskId>,
}

impl ScheduleOutcome {
    /// Every vertex ran and none failed.
    pub fn successful(&self) -> bool {
        self.failed.is_empty() && self.unexecuted.is_empty()
    }
}

impl ScheduleState {
    /// `max_concurrency` of `None` means unbounded. A limit of zero is
    /// treated as one so the schedule can always make progress.
    pub fn new(graph: Graph<TaskId>, max_concurrency: Option<usize>) -> Self {
        let mut frontier = graph.roots();
        frontier.sort_by(|a, b| b.cmp(a));

        Self {
            graph,
            frontier,
            in_flight: 0,
            max_concurrency: max_concurrency.map(|limit| limit.max(1)),
            executed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn graph(&self) -> &Graph<TaskId> {
        &self.graph
    }

    pub fn frontier(&self) -> &[TaskId] {
        &self.frontier
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn executed(&self) -> &[TaskId] {
        &self.executed
    }

    pub fn failed(&self) -> &[(TaskId, anyhow::Error)] {
        &self.failed
    }

    /// Whether `task` is still a live vertex (pending, running or failed).
    pub fn is_live(&self, task: TaskId) -> bool {
        self.graph.has(task)
    }

    fn has_capacity(&self) -> bool {
        self.max_concurrency
            .is_none_or(|limit| self.in_flight < limit)
    }

    /// Pop the next task to start, if the frontier is non-empty and a
    /// concurrency slot is free. The caller must start the returned task.
    pub fn next_ready(&mut self) -> Option<TaskId> {
        if !self.has_capacity() {
            return None;
        }

        let task = self.frontier.pop()?;
        self.in_flight += 1;
        trace!(task = %task, in_flight = self.in_flight, "task dispatched");
        Some(task)
    }

    /// Insert a task that was created while the schedule was running.
    pub fn add_task(&mut self, task: TaskId) {
        self.graph.add_vertex(task);
    }

    /// `from` must finish before `to` may start.
    pub fn add_dependency(&mut self, from: TaskId, to: TaskId) {
        self.graph.add_edge(from, to);
    }

    /// Record a success.
    ///
    /// Removes the vertex, then pushes every former child and every task in
    /// `spliced` that is now parentless. Returns the newly ready tasks.
    pub fn complete_success(&mut self, task: TaskId, spliced: &[TaskId]) -> Vec<TaskId> {
        self.in_flight = self.in_flight.saturating_sub(1);

        let children = self.graph.children_of(task);
        self.graph.remove_vertex(task);
        self.executed.push(task);

        let mut ready = Vec::new();
        for candidate in children.into_iter().chain(spliced.iter().copied()) {
            if self.graph.has(candidate)
                && !self.graph.has_parents(candidate)
                && !self.frontier.contains(&candidate)
                && !ready.contains(&candidate)
            {
                ready.push(candidate);
            }
        }

        debug!(task = %task, newly_ready = ready.len(), "task completed");
        self.frontier.extend(ready.iter().copied());
        ready
    }

    /// Record a failure. The vertex is kept, so its dependents stay blocked.
    pub fn complete_failure(&mut self, task: TaskId, error: anyhow::Error) {
        self.in_flight = self.in_flight.saturating_sub(1);
        debug!(task = %task, blocked = self.graph.children_of(task).len(), "task failed");
        self.failed.push((task, error));
    }

    /// Nothing running and nothing left to start.
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0 && self.frontier.is_empty()
    }

    /// Split all tasks into executed, failed and unexecuted. Unexecuted is
    /// every vertex still in the graph, failed ones included.
    pub fn into_outcome(self) -> ScheduleOutcome {
        let mut unexecuted = self.graph.vertices();
        unexecuted.sort();

        ScheduleOutcome {
            executed: self.executed,
            failed: self.failed,
            unexecuted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn t(index: usize) -> TaskId {
        TaskId::new(index)
    }

    fn diamond() -> Graph<TaskId> {
        Graph::from_edges([(t(0), t(1)), (t(0), t(2)), (t(1), t(3)), (t(2), t(3))])
    }

    #[test]
    fn frontier_starts_with_roots() {
        let state = ScheduleState::new(diamond(), None);
        assert_eq!(state.frontier(), &[t(0)]);
        assert!(!state.is_settled());
    }

    #[test]
    fn success_releases_children_once_all_parents_are_done() {
        let mut state = ScheduleState::new(diamond(), None);

        assert_eq!(state.next_ready(), Some(t(0)));
        let mut ready = state.complete_success(t(0), &[]);
        ready.sort();
        assert_eq!(ready, vec![t(1), t(2)]);

        let first = state.next_ready().unwrap();
        let second = state.next_ready().unwrap();
        assert_eq!(state.in_flight(), 2);

        assert!(state.complete_success(first, &[]).is_empty());
        assert_eq!(state.complete_success(second, &[]), vec![t(3)]);

        assert_eq!(state.next_ready(), Some(t(3)));
        state.complete_success(t(3), &[]);
        assert!(state.is_settled());

        let outcome = state.into_outcome();
        assert!(outcome.successful());
        assert_eq!(outcome.executed.len(), 4);
        assert!(outcome.unexecuted.is_empty());
    }

    #[test]
    fn concurrency_limit_is_respected() {
        let graph = Graph::from_edges([(t(0), t(3)), (t(1), t(3)), (t(2), t(3))]);
        let mut state = ScheduleState::new(graph, Some(2));

        assert!(state.next_ready().is_some());
        assert!(state.next_ready().is_some());
        assert_eq!(state.next_ready(), None);
        assert_eq!(state.frontier().len(), 1);
    }

    #[test]
    fn zero_limit_still_allows_one_task() {
        let graph = Graph::from_edges([(t(0), t(1))]);
        let mut state = ScheduleState::new(graph, Some(0));
        assert_eq!(state.next_ready(), Some(t(0)));
        assert_eq!(state.next_ready(), None);
    }

    #[test]
    fn failure_starves_descendants() {
        let graph = Graph::from_edges([(t(0), t(1)), (t(1), t(2))]);
        let mut state = ScheduleState::new(graph, None);

        let task = state.next_ready().unwrap();
        state.complete_failure(task, anyhow!("boom"));
        assert!(state.is_settled());

        let outcome = state.into_outcome();
        assert!(!outcome.successful());
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, t(0));
        assert_eq!(outcome.unexecuted, vec![t(0), t(1), t(2)]);
    }

    #[test]
    fn spliced_tasks_run_before_former_children() {
        // 0 -> 1, and 0 splices 2 in front of 1.
        let graph = Graph::from_edges([(t(0), t(1))]);
        let mut state = ScheduleState::new(graph, None);

        let task = state.next_ready().unwrap();
        state.add_task(t(2));
        state.add_dependency(t(2), t(1));
        assert!(state.is_live(t(2)));

        assert_eq!(state.complete_success(task, &[t(2)]), vec![t(2)]);
        assert_eq!(state.next_ready(), Some(t(2)));
        assert_eq!(state.complete_success(t(2), &[]), vec![t(1)]);
    }
}
