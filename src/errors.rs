// src/errors.rs

//! Crate-wide error types.
//!
//! - [`PlanError`] covers everything that can go wrong while turning declared
//!   operations and assignments into a validated outline. These are fatal
//!   and are raised before any task executes.
//! - [`ZipperError`] is an internal protocol fault (a programming error).
//! - [`ScopeError`] is raised by the scoped assignment engine.
//! - [`ConfigError`] belongs to the configuration layer.
//!
//! Failures of user-supplied operation bodies are plain [`anyhow::Error`]s
//! and never show up here: they are recorded per task in the run summary.

use thiserror::Error;

use crate::node::{NodeId, NodeKind};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("unresolved parameters without default or assignment: {}", .0.join(", "))]
    UnresolvedParameters(Vec<String>),

    #[error("cycle detected in outline: {0}")]
    Cycle(String),

    #[error("conflicting assignments for target '{target}'")]
    ConflictingAssignment { target: String },

    #[error("assignment ring detected while resolving '{target}'")]
    AssignmentCycle { target: String },

    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error(transparent)]
    Protocol(#[from] ZipperError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZipperError {
    #[error("internal error: zipper reconstruction called on unrecognized {kind} node")]
    UnrecognizedNode { kind: NodeKind },

    #[error("internal error: sibling dependency reconstruction called for '{node}' which has no sibling dependencies")]
    MissingSiblings { node: String },

    #[error("internal error: '{node}' has no child slot '{key}'")]
    UnknownChild { node: String, key: String },
}

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("assignment scope {0} does not exist")]
    UnknownScope(usize),

    #[error("assignment ring detected while resolving '{target}'")]
    AssignmentCycle { target: String },

    #[error("conflicting assignments for target '{target}' within one batch")]
    ConflictingAssignment { target: String },

    #[error("re-entrant resolution of node {node} in assignment scope {scope}")]
    ResolutionCycle { node: NodeId, scope: usize },

    #[error(transparent)]
    Protocol(#[from] ZipperError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PlanError>;
