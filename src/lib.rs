// src/lib.rs

pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod node;
pub mod resolve;
pub mod zipper;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::{Schedule, execute_schedule};
use crate::resolve::create_valid_schedule;

pub use crate::engine::{ExecuteOptions, RunSummary, TaskRecord};
pub use crate::errors::{PlanError, ScopeError, ZipperError};
pub use crate::monitor::{Monitor, TracingMonitor};
pub use crate::node::{
    Assignment, Context, Datum, Dependencies, ExecutableBuilder, Fork, NodeId, NodeKind, NodeRef, SchedulerBuilder,
    TaskContext,
};

/// Everything one call to [`run`] needs.
#[derive(Clone)]
pub struct RunConfig {
    pub name: String,
    pub operations: Vec<NodeRef>,
    pub assignments: Vec<Assignment>,
    pub monitor: Arc<dyn Monitor>,
    pub options: ExecuteOptions,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("name", &self.name)
            .field("operations", &self.operations.len())
            .field("assignments", &self.assignments.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RunConfig {
    pub fn new(operations: Vec<NodeRef>) -> Self {
        Self {
            name: "run".to_string(),
            operations,
            assignments: Vec::new(),
            monitor: Arc::new(TracingMonitor),
            options: ExecuteOptions::default(),
        }
    }

    /// Take the run name and executor settings from a validated config file.
    pub fn from_config(config: &EngineConfig, operations: Vec<NodeRef>) -> Self {
        Self::new(operations)
            .name(config.run_name())
            .options(config.execute_options())
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn assignments(mut self, assignments: Vec<Assignment>) -> Self {
        self.assignments = assignments;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.options.max_concurrency = Some(limit);
        self
    }
}

/// High-level entry point.
///
/// This wires together:
/// - operation collection and assignment resolution
/// - outline construction and validation
/// - task creation and execution
///
/// Planning problems (unresolved parameters, cycles, conflicting or looping
/// assignments) are returned as `Err` before any operation runs. Failures of
/// operation bodies are never an `Err`: they are reported in the returned
/// [`RunSummary`].
pub async fn run(config: RunConfig) -> Result<RunSummary, PlanError> {
    let RunConfig {
        name,
        operations,
        assignments,
        monitor,
        options,
    } = config;

    info!(
        run = %name,
        operations = operations.len(),
        assignments = assignments.len(),
        "planning run"
    );

    let valid = create_valid_schedule(&operations, &assignments)?;
    let schedule = Schedule::from_valid(name, valid, monitor)?;
    debug!(run = %schedule.run_name, tasks = schedule.len(), "schedule built");

    Ok(execute_schedule(schedule, options).await)
}
