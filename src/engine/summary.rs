// src/engine/summary.rs

//! Result of a settled run.

use crate::engine::task::{Task, TaskId};
use crate::node::{NodeKind, NodeRef};

/// Identity of one task as reported in a [`RunSummary`].
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub node: NodeRef,
    pub name: String,
    pub kind: NodeKind,
    pub explicit: bool,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            node: task.vertex.node.clone(),
            name: task.name(),
            kind: task.vertex.kind,
            explicit: task.vertex.explicit,
        }
    }
}

/// How a run ended.
///
/// `successful` is true only if every task executed and none failed.
/// `unexecuted` lists every vertex left in the graph: failed tasks and
/// everything downstream of them.
#[derive(Debug)]
pub struct RunSummary {
    pub successful: bool,
    pub executed: Vec<TaskRecord>,
    pub failed: Vec<(TaskRecord, anyhow::Error)>,
    pub unexecuted: Vec<TaskRecord>,
}

impl RunSummary {
    pub fn executed_names(&self) -> Vec<&str> {
        self.executed.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(r, _)| r.name.as_str()).collect()
    }

    pub fn unexecuted_names(&self) -> Vec<&str> {
        self.unexecuted.iter().map(|r| r.name.as_str()).collect()
    }

    /// Error recorded for the first failed task named `name`.
    pub fn failure_of(&self, name: &str) -> Option<&anyhow::Error> {
        self.failed
            .iter()
            .find(|(record, _)| record.name == name)
            .map(|(_, error)| error)
    }

    pub fn was_executed(&self, name: &str) -> bool {
        self.executed.iter().any(|r| r.name == name)
    }
}
