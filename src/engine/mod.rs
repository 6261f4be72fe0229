// src/engine/mod.rs

//! Execution engine.
//!
//! This module ties together:
//! - the runtime value scopes tasks read from and write to
//! - task dispatch per node kind
//! - the pure frontier state machine
//! - the async executor that drives a schedule to completion and splices
//!   scheduler forks into the live graph
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

pub mod core;
pub mod runtime;
pub mod scope;
pub mod summary;
pub mod task;

pub use core::{ScheduleOutcome, ScheduleState};
pub use runtime::{ExecuteOptions, Executor, Schedule, execute_schedule};
pub use scope::Scope;
pub use summary::{RunSummary, TaskRecord};
pub use task::{Task, TaskId, TaskOutput};
