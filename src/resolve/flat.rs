// src/resolve/flat.rs

//! Flat (non-hierarchical) assignment resolution.
//!
//! Used when compiling the top-level set of requested operations: every
//! assignment in scope (top-level ones plus those carried by checkpoints) is
//! folded into one `target -> value` map.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::errors::{PlanError, Result};
use crate::node::{Assignment, Node, NodeId, NodeKind, NodeRef};

/// A node wrapped with its explicitness: `explicit` is true when the node
/// was requested directly rather than reached as a dependency.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub explicit: bool,
    pub kind: NodeKind,
    pub node: NodeRef,
}

impl Vertex {
    pub fn implicit(node: NodeRef) -> Self {
        Self {
            explicit: false,
            kind: node.kind(),
            node,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }
}

/// Every operation reachable from the roots and from assignment values,
/// plus the full assignment batch.
#[derive(Debug, Clone, Default)]
pub struct CollectedOperations {
    order: Vec<NodeId>,
    vertices: HashMap<NodeId, Vertex>,
    assignments: Vec<Assignment>,
}

impl CollectedOperations {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    /// Collected vertices in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|id| self.vertices.get(id))
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    fn visit(&mut self, node: &NodeRef, explicit: bool) {
        if !node.kind().is_operation() {
            return;
        }

        if let Some(existing) = self.vertices.get_mut(&node.id()) {
            if explicit && !existing.explicit {
                existing.explicit = true;
                // Checkpoints pass explicitness on to their members.
                if let Node::Checkpoint(cp) = node.node() {
                    for dep in &cp.dependencies {
                        self.visit(dep, true);
                    }
                }
            }
            return;
        }

        self.order.push(node.id());
        self.vertices.insert(
            node.id(),
            Vertex {
                explicit,
                kind: node.kind(),
                node: node.clone(),
            },
        );

        match node.node() {
            Node::Executable(exe) => {
                for dep in exe.dependencies.values() {
                    self.visit(dep, false);
                }
            }
            Node::Scheduler(sched) => {
                for dep in sched.dependencies.values() {
                    self.visit(dep, false);
                }
            }
            Node::Checkpoint(cp) => {
                for dep in &cp.dependencies {
                    self.visit(dep, explicit);
                }
                for assignment in &cp.assignments {
                    self.assignments.push(assignment.clone());
                    self.visit(assignment.value(), false);
                }
            }
            Node::Value(_) | Node::Parameter(_) => {}
        }
    }
}

/// Collect every operation transitively reachable from `roots` (tagged
/// explicit) and from assignment values (tagged implicit).
pub fn collect_operations(roots: &[NodeRef], assignments: &[Assignment]) -> CollectedOperations {
    let mut collected = CollectedOperations {
        assignments: assignments.to_vec(),
        ..Default::default()
    };

    for root in roots {
        collected.visit(root, true);
    }

    for assignment in assignments {
        collected.visit(assignment.value(), false);
    }

    debug!(
        operations = collected.len(),
        assignments = collected.assignments.len(),
        "collected operations"
    );

    collected
}

/// Conflict-checked `target -> value` substitution.
#[derive(Debug, Clone)]
pub struct AssignmentResolver {
    operations: HashMap<NodeId, Vertex>,
    mappings: HashMap<NodeId, NodeRef>,
    assignments: Vec<Assignment>,
}

impl AssignmentResolver {
    /// Build the flat map, validating every insertion.
    ///
    /// A target that receives two assignments whose chased values differ is
    /// a [`PlanError::ConflictingAssignment`]; an insertion that closes an
    /// assignment ring is a [`PlanError::AssignmentCycle`].
    pub fn new(collected: CollectedOperations) -> Result<Self> {
        let mut resolver = Self {
            operations: collected.vertices,
            mappings: HashMap::new(),
            assignments: collected.assignments,
        };

        for assignment in resolver.assignments.clone() {
            let target = assignment.target();
            let value = assignment.value();

            if let Some(existing) = resolver.mappings.get(&target.id()).cloned() {
                let existing_final = resolver.chase(&existing)?;
                let new_final = resolver.chase(value)?;
                if !existing_final.is(&new_final) {
                    return Err(PlanError::ConflictingAssignment {
                        target: target.label(),
                    });
                }
            }

            resolver.mappings.insert(target.id(), value.clone());
            // Fail fast if this insertion closed a ring.
            resolver.chase(target)?;

            trace!(target = %target.label(), value = %value.label(), "registered assignment");
        }

        Ok(resolver)
    }

    /// Follow the map until `node` is no longer a mapped target.
    pub fn chase(&self, node: &NodeRef) -> Result<NodeRef> {
        let mut current = node.clone();
        let mut seen: HashSet<NodeId> = HashSet::new();

        while let Some(next) = self.mappings.get(&current.id()) {
            if !seen.insert(current.id()) {
                return Err(PlanError::AssignmentCycle {
                    target: node.label(),
                });
            }
            current = next.clone();
        }

        Ok(current)
    }

    /// Chase `node` and look up its explicitness wrapper.
    pub fn resolve(&self, node: &NodeRef) -> Result<Vertex> {
        let resolved = self.chase(node)?;
        Ok(self
            .operations
            .get(&resolved.id())
            .cloned()
            .unwrap_or_else(|| Vertex::implicit(resolved)))
    }

    /// Every assignment folded into this resolver, in registration order.
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn is_target(&self, node: &NodeRef) -> bool {
        self.mappings.contains_key(&node.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ExecutableBuilder;
    use serde_json::json;

    fn exe(name: &str, deps: &[(&str, &NodeRef)]) -> NodeRef {
        let mut builder = ExecutableBuilder::new(name);
        for (key, dep) in deps {
            builder = builder.dependency(*key, (*dep).clone());
        }
        builder.run_sync(|_| Ok(json!(null)))
    }

    #[test]
    fn roots_are_explicit_and_dependencies_are_not() {
        let a = exe("a", &[]);
        let b = exe("b", &[("a", &a)]);

        let collected = collect_operations(&[b.clone()], &[]);
        assert_eq!(collected.len(), 2);
        assert!(collected.get(b.id()).unwrap().explicit);
        assert!(!collected.get(a.id()).unwrap().explicit);
    }

    #[test]
    fn checkpoint_preserves_explicitness_and_folds_assignments() {
        let p = NodeRef::parameter("p");
        let a = exe("a", &[("p", &p)]);
        let v = NodeRef::value(5);
        let assign = Assignment::new(p.clone(), v.clone()).unwrap();
        let cp = NodeRef::checkpoint("cp", vec![a.clone()], vec![assign]);

        let collected = collect_operations(&[cp.clone()], &[]);
        assert!(collected.get(cp.id()).unwrap().explicit);
        assert!(collected.get(a.id()).unwrap().explicit);
        assert_eq!(collected.assignments().len(), 1);

        let resolver = AssignmentResolver::new(collected).unwrap();
        let resolved = resolver.resolve(&p).unwrap();
        assert!(resolved.node.is(&v));
        assert_eq!(resolved.kind, NodeKind::Value);
        assert!(!resolved.explicit);
    }

    #[test]
    fn later_explicit_visit_upgrades_checkpoint_members() {
        let a = exe("a", &[]);
        let cp = NodeRef::checkpoint("cp", vec![a.clone()], vec![]);
        let user = ExecutableBuilder::new("user")
            .dependency("a", a.clone())
            .run_sync(|_| Ok(json!(null)));

        let collected = collect_operations(&[user, cp.clone()], &[]);
        assert!(collected.get(cp.id()).unwrap().explicit);
        assert!(collected.get(a.id()).unwrap().explicit);
    }

    #[test]
    fn assignment_chains_are_followed() {
        let p = NodeRef::parameter("p");
        let q = exe("q", &[]);
        let v = NodeRef::value(1);

        let collected = collect_operations(
            &[],
            &[
                Assignment::new(p.clone(), q.clone()).unwrap(),
                Assignment::new(q.clone(), v.clone()).unwrap(),
            ],
        );
        let resolver = AssignmentResolver::new(collected).unwrap();
        assert!(resolver.chase(&p).unwrap().is(&v));
        assert!(resolver.is_target(&q));
    }

    #[test]
    fn conflicting_assignments_are_rejected() {
        let p = NodeRef::parameter("p");
        let collected = collect_operations(
            &[],
            &[
                Assignment::new(p.clone(), NodeRef::value(1)).unwrap(),
                Assignment::new(p.clone(), NodeRef::value(2)).unwrap(),
            ],
        );
        let err = AssignmentResolver::new(collected).unwrap_err();
        assert!(matches!(err, PlanError::ConflictingAssignment { ref target } if target == "p"));
    }

    #[test]
    fn identical_chased_values_do_not_conflict() {
        let p = NodeRef::parameter("p");
        let q = exe("q", &[]);
        let v = NodeRef::value(1);
        let collected = collect_operations(
            &[],
            &[
                Assignment::new(q.clone(), v.clone()).unwrap(),
                Assignment::new(p.clone(), v.clone()).unwrap(),
                Assignment::new(p.clone(), q.clone()).unwrap(),
            ],
        );
        let resolver = AssignmentResolver::new(collected).unwrap();
        assert!(resolver.chase(&p).unwrap().is(&v));
    }

    #[test]
    fn assignment_ring_fails_fast() {
        let a = exe("a", &[]);
        let b = exe("b", &[]);
        let collected = collect_operations(
            &[],
            &[
                Assignment::new(a.clone(), b.clone()).unwrap(),
                Assignment::new(b.clone(), a.clone()).unwrap(),
            ],
        );
        let err = AssignmentResolver::new(collected).unwrap_err();
        assert!(matches!(err, PlanError::AssignmentCycle { .. }));
    }

    #[test]
    fn unknown_nodes_resolve_to_implicit_vertices() {
        let resolver = AssignmentResolver::new(collect_operations(&[], &[])).unwrap();
        let p = NodeRef::parameter("p");
        let vertex = resolver.resolve(&p).unwrap();
        assert!(vertex.node.is(&p));
        assert!(!vertex.explicit);
        assert_eq!(vertex.kind, NodeKind::Parameter);
    }
}
