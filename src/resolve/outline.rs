// src/resolve/outline.rs

//! Outline construction and validation.
//!
//! The outline is the deduplicated dependency graph of the operations that
//! will actually be scheduled. Values and parameters never become vertices;
//! they are recorded in `resolved_values` and preloaded into the root
//! runtime scope instead.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dag::{Graph, cycle_witness, has_cycles};
use crate::errors::{PlanError, Result};
use crate::node::{Assignment, Datum, Node, NodeId, NodeRef};
use crate::resolve::flat::{AssignmentResolver, Vertex, collect_operations};

/// Validated graph of operation vertices. Edges point from a dependency to
/// its dependent.
#[derive(Debug, Clone, Default)]
pub struct Outline {
    graph: Graph<NodeId>,
    vertices: HashMap<NodeId, Vertex>,
}

impl Outline {
    pub fn graph(&self) -> &Graph<NodeId> {
        &self.graph
    }

    pub fn vertex(&self, id: NodeId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn has(&self, node: &NodeRef) -> bool {
        self.graph.has(node.id())
    }

    pub fn len(&self) -> usize {
        self.graph.size()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    fn add_vertex(&mut self, vertex: Vertex) {
        self.graph.add_vertex(vertex.id());
        self.vertices.insert(vertex.id(), vertex);
    }
}

/// Raw result of [`create_outline`], before validation.
#[derive(Debug, Clone, Default)]
pub struct OutlineBuild {
    pub outline: Outline,
    pub resolved_values: HashMap<NodeId, Datum>,
    pub unresolved_parameters: Vec<NodeRef>,
}

struct OutlineBuilder<'a> {
    resolver: &'a AssignmentResolver,
    build: OutlineBuild,
}

impl OutlineBuilder<'_> {
    /// Add `node` (after assignment resolution) and return its vertex id if
    /// it became, or already was, an outline vertex.
    fn add(&mut self, node: &NodeRef) -> Result<Option<NodeId>> {
        let vertex = self.resolver.resolve(node)?;
        let id = vertex.id();

        if self.build.outline.graph.has(id) {
            return Ok(Some(id));
        }
        if self.build.resolved_values.contains_key(&id) {
            return Ok(None);
        }

        match vertex.node.node() {
            Node::Value(value) => {
                self.build.resolved_values.insert(id, value.value.clone());
                Ok(None)
            }
            Node::Parameter(param) => {
                match &param.default_value {
                    Some(default) => {
                        self.build.resolved_values.insert(id, default.clone());
                    }
                    None => {
                        if !self.build.unresolved_parameters.contains(&vertex.node) {
                            self.build.unresolved_parameters.push(vertex.node.clone());
                        }
                    }
                }
                Ok(None)
            }
            Node::Executable(_) | Node::Scheduler(_) | Node::Checkpoint(_) => {
                let dependencies = vertex.node.dependency_nodes();
                debug!(
                    node = %vertex.node.label(),
                    kind = %vertex.kind,
                    explicit = vertex.explicit,
                    "adding outline vertex"
                );
                self.build.outline.add_vertex(vertex.clone());

                for dependency in &dependencies {
                    if let Some(dep_id) = self.add(dependency)? {
                        self.build.outline.graph.add_edge(dep_id, id);
                    }
                }

                if let Node::Executable(exe) = vertex.node.node() {
                    if let Some(siblings) = &exe.siblings {
                        for sibling in siblings.dependencies.values() {
                            self.add_sibling(sibling)?;
                        }
                    }
                }

                Ok(Some(id))
            }
        }
    }

    /// Siblings never become vertices or edges. Literal values and
    /// defaulted parameters are still recorded so the sibling filter can
    /// see them.
    fn add_sibling(&mut self, node: &NodeRef) -> Result<()> {
        let vertex = self.resolver.resolve(node)?;
        let literal = match vertex.node.node() {
            Node::Value(value) => Some(&value.value),
            Node::Parameter(param) => param.default_value.as_ref(),
            Node::Executable(_) | Node::Scheduler(_) | Node::Checkpoint(_) => None,
        };
        if let Some(literal) = literal {
            self.build
                .resolved_values
                .entry(vertex.id())
                .or_insert_with(|| literal.clone());
        }
        Ok(())
    }
}

/// Depth-first, deduplicating outline construction from `roots`.
pub fn create_outline(roots: &[NodeRef], resolver: &AssignmentResolver) -> Result<OutlineBuild> {
    let mut builder = OutlineBuilder {
        resolver,
        build: OutlineBuild::default(),
    };

    for root in roots {
        builder.add(root)?;
    }

    Ok(builder.build)
}

/// A validated outline, ready to be turned into tasks.
#[derive(Debug, Clone)]
pub struct ValidSchedule {
    pub outline: Outline,
    pub resolved_values: HashMap<NodeId, Datum>,
    pub resolver: Arc<AssignmentResolver>,
}

/// Collect, resolve, build and validate.
///
/// Fails with [`PlanError::UnresolvedParameters`] if any reachable
/// parameter has neither an assignment nor a default, and with
/// [`PlanError::Cycle`] if the outline is cyclic.
pub fn create_valid_schedule(
    operations: &[NodeRef],
    assignments: &[Assignment],
) -> Result<ValidSchedule> {
    let collected = collect_operations(operations, assignments);
    let resolver = AssignmentResolver::new(collected)?;

    let OutlineBuild {
        outline,
        resolved_values,
        unresolved_parameters,
    } = create_outline(operations, &resolver)?;

    if !unresolved_parameters.is_empty() {
        return Err(PlanError::UnresolvedParameters(
            unresolved_parameters.iter().map(NodeRef::label).collect(),
        ));
    }

    if has_cycles(outline.graph()) {
        let involving = cycle_witness(outline.graph())
            .and_then(|id| outline.vertex(id))
            .map(|vertex| vertex.node.label())
            .unwrap_or_else(|| "<unknown>".to_string());
        return Err(PlanError::Cycle(format!(
            "cycle detected in outline involving '{involving}'"
        )));
    }

    info!(
        vertices = outline.len(),
        resolved_values = resolved_values.len(),
        "outline validated"
    );

    Ok(ValidSchedule {
        outline,
        resolved_values,
        resolver: Arc::new(resolver),
    })
}
