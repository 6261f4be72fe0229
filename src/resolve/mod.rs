// src/resolve/mod.rs

//! Turning declared operations and assignments into something runnable.
//!
//! - [`flat`]: operation collection and the flat, conflict-checked
//!   assignment resolver used for the top-level plan.
//! - [`outline`]: deduplicated outline construction and validation.
//! - [`scoped`]: the hierarchical assignment engine used for forks.

pub mod flat;
pub mod outline;
pub mod scoped;

pub use flat::{AssignmentResolver, CollectedOperations, Vertex, collect_operations};
pub use outline::{Outline, OutlineBuild, ValidSchedule, create_outline, create_valid_schedule};
pub use scoped::{AssignmentScopeId, AssignmentScopes};
