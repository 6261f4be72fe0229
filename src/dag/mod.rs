// src/dag/mod.rs

//! Generic directed-graph container.
//!
//! - [`graph`] holds the mutable [`Graph`] used both for outlines (vertices
//!   are `NodeId`s) and for live schedules (vertices are `TaskId`s), plus
//!   cycle detection and vertex mapping.

pub mod graph;

pub use graph::{Graph, cycle_witness, has_cycles, map_vertices};
