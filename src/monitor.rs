// src/monitor.rs

//! Run observation hooks.
//!
//! The engine reports checkpoints and task transitions to a [`Monitor`]. It
//! never inspects what the monitor does with them.

use tracing::{debug, info, warn};

use crate::engine::RunSummary;
use crate::node::TaskContext;

pub trait Monitor: Send + Sync {
    /// A checkpoint vertex was reached in `scope`.
    fn mark_checkpoint(&self, scope: &str, name: &str, explicit: bool);

    fn task_started(&self, _task: &TaskContext) {}

    fn task_succeeded(&self, _task: &TaskContext) {}

    fn task_failed(&self, _task: &TaskContext, _error: &anyhow::Error) {}

    fn run_finished(&self, _summary: &RunSummary) {}
}

/// Default monitor: reports everything through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn mark_checkpoint(&self, scope: &str, name: &str, explicit: bool) {
        info!(scope = %scope, checkpoint = %name, explicit, "checkpoint reached");
    }

    fn task_started(&self, task: &TaskContext) {
        debug!(
            run = %task.run_name,
            scope = %task.scope_name,
            task = %task.operation_name,
            "task started"
        );
    }

    fn task_succeeded(&self, task: &TaskContext) {
        debug!(
            run = %task.run_name,
            scope = %task.scope_name,
            task = %task.operation_name,
            "task succeeded"
        );
    }

    fn task_failed(&self, task: &TaskContext, error: &anyhow::Error) {
        warn!(
            run = %task.run_name,
            scope = %task.scope_name,
            task = %task.operation_name,
            error = %format!("{error:#}"),
            "task failed"
        );
    }

    fn run_finished(&self, summary: &RunSummary) {
        info!(
            successful = summary.successful,
            executed = summary.executed.len(),
            failed = summary.failed.len(),
            unexecuted = summary.unexecuted.len(),
            "run finished"
        );
    }
}
