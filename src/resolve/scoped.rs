// src/resolve/scoped.rs

//! Hierarchical (scoped) assignment resolution.
//!
//! [`AssignmentScopes`] is an arena holding a tree of assignment scopes that
//! all descend from one root. Each scope sees its own assignments plus every
//! ancestor assignment it does not override, and memoizes its resolutions.
//! The arena also owns the shared owning-scope table that records which scope
//! canonically produced each resolved node; resolving the same raw node
//! through related scopes therefore converges on a single `NodeRef`.
//!
//! Resolution is synchronous and needs `&mut self`: the caches and the
//! owning-scope table are updated as it goes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::errors::ScopeError;
use crate::node::{Assignment, NodeId, NodeRef};
use crate::zipper::{ZipperProtocol, zipper_map};

/// Handle of one scope inside an [`AssignmentScopes`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentScopeId(usize);

impl AssignmentScopeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for AssignmentScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct AppliedAssignment {
    replacement: NodeRef,
    scope: AssignmentScopeId,
}

#[derive(Debug, Default)]
struct ScopeState {
    parent: Option<AssignmentScopeId>,
    assignments: HashMap<NodeId, AppliedAssignment>,
    cache: HashMap<NodeId, NodeRef>,
}

/// Tree of assignment scopes sharing one owning-scope table.
#[derive(Debug)]
pub struct AssignmentScopes {
    protocol: Arc<ZipperProtocol>,
    scopes: Vec<ScopeState>,
    owning_scopes: HashMap<NodeId, AssignmentScopeId>,
    in_progress: HashSet<(AssignmentScopeId, NodeId)>,
    /// Children already forked, keyed by parent and `(target, value)` ids.
    forks: HashMap<ForkKey, AssignmentScopeId>,
}

type ForkKey = (AssignmentScopeId, Vec<(NodeId, NodeId)>);

type AssignmentMap = HashMap<NodeId, AppliedAssignment>;

fn chase(map: &AssignmentMap, node: &NodeRef) -> Result<NodeRef, ScopeError> {
    let mut current = node.clone();
    let mut seen = HashSet::new();

    while let Some(applied) = map.get(&current.id()) {
        if !seen.insert(current.id()) {
            return Err(ScopeError::AssignmentCycle {
                target: node.label(),
            });
        }
        current = applied.replacement.clone();
    }

    Ok(current)
}

/// Fold one batch into a fresh map owned by `scope`.
fn batch_map(assignments: &[Assignment], scope: AssignmentScopeId) -> Result<AssignmentMap, ScopeError> {
    let mut map = AssignmentMap::new();

    for assignment in assignments {
        let target = assignment.target();
        let value = assignment.value();

        if let Some(existing) = map.get(&target.id()) {
            let existing_final = chase(&map, &existing.replacement)?;
            let new_final = chase(&map, value)?;
            if !existing_final.is(&new_final) {
                return Err(ScopeError::ConflictingAssignment {
                    target: target.label(),
                });
            }
        }

        map.insert(
            target.id(),
            AppliedAssignment {
                replacement: value.clone(),
                scope,
            },
        );
        chase(&map, target)?;
    }

    Ok(map)
}

impl AssignmentScopes {
    /// Create the arena with a root scope holding `assignments`.
    pub fn new(assignments: &[Assignment]) -> Result<Self, ScopeError> {
        Self::with_protocol(Arc::new(ZipperProtocol::for_nodes()), assignments)
    }

    pub fn with_protocol(
        protocol: Arc<ZipperProtocol>,
        assignments: &[Assignment],
    ) -> Result<Self, ScopeError> {
        let root = AssignmentScopeId(0);
        let state = ScopeState {
            parent: None,
            assignments: batch_map(assignments, root)?,
            cache: HashMap::new(),
        };

        Ok(Self {
            protocol,
            scopes: vec![state],
            owning_scopes: HashMap::new(),
            in_progress: HashSet::new(),
            forks: HashMap::new(),
        })
    }

    pub fn root(&self) -> AssignmentScopeId {
        AssignmentScopeId(0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn parent(&self, scope: AssignmentScopeId) -> Option<AssignmentScopeId> {
        self.scopes.get(scope.0).and_then(|state| state.parent)
    }

    fn state(&self, scope: AssignmentScopeId) -> Result<&ScopeState, ScopeError> {
        self.scopes
            .get(scope.0)
            .ok_or(ScopeError::UnknownScope(scope.0))
    }

    /// Create a child of `parent` that sees `assignments` first and every
    /// ancestor assignment it does not override.
    ///
    /// Forking the same parent with the same batch again (same targets and
    /// values, same order) returns the existing child.
    pub fn fork(
        &mut self,
        parent: AssignmentScopeId,
        assignments: &[Assignment],
    ) -> Result<AssignmentScopeId, ScopeError> {
        let key: ForkKey = (
            parent,
            assignments
                .iter()
                .map(|a| (a.target().id(), a.value().id()))
                .collect(),
        );
        if let Some(&existing) = self.forks.get(&key) {
            trace!(scope = %existing, parent = %parent, "reusing assignment scope");
            return Ok(existing);
        }

        let id = AssignmentScopeId(self.scopes.len());
        let mut map = batch_map(assignments, id)?;

        for (target, applied) in &self.state(parent)?.assignments {
            map.entry(*target).or_insert_with(|| applied.clone());
        }

        debug!(
            scope = %id,
            parent = %parent,
            own = assignments.len(),
            visible = map.len(),
            "forked assignment scope"
        );

        self.scopes.push(ScopeState {
            parent: Some(parent),
            assignments: map,
            cache: HashMap::new(),
        });
        self.forks.insert(key, id);

        Ok(id)
    }

    /// True if `candidate` is `scope` itself or one of its ancestors.
    /// `None` is never a parent.
    pub fn has_parent(&self, scope: AssignmentScopeId, candidate: Option<AssignmentScopeId>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };

        let mut current = Some(scope);
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Follow the assignment chain for `node` as seen from `scope`.
    ///
    /// Returns the final node and the scopes whose assignments were used,
    /// in the order they were met.
    pub fn apply_assignments(
        &self,
        scope: AssignmentScopeId,
        node: &NodeRef,
    ) -> Result<(NodeRef, Vec<AssignmentScopeId>), ScopeError> {
        let state = self.state(scope)?;
        let mut current = node.clone();
        let mut contributing = Vec::new();
        let mut seen = HashSet::new();

        while let Some(applied) = state.assignments.get(&current.id()) {
            if !seen.insert(current.id()) {
                return Err(ScopeError::AssignmentCycle {
                    target: node.label(),
                });
            }
            if !contributing.contains(&applied.scope) {
                contributing.push(applied.scope);
            }
            current = applied.replacement.clone();
        }

        Ok((current, contributing))
    }

    /// Resolve `node` under `scope`, memoized per scope.
    pub fn resolve(&mut self, scope: AssignmentScopeId, node: &NodeRef) -> Result<NodeRef, ScopeError> {
        if let Some(hit) = self.state(scope)?.cache.get(&node.id()) {
            return Ok(hit.clone());
        }

        if !self.in_progress.insert((scope, node.id())) {
            return Err(ScopeError::ResolutionCycle {
                node: node.id(),
                scope: scope.0,
            });
        }
        let result = self.resolve_uncached(scope, node);
        self.in_progress.remove(&(scope, node.id()));

        let resolved = result?;
        self.scopes[scope.0].cache.insert(node.id(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(&mut self, scope: AssignmentScopeId, node: &NodeRef) -> Result<NodeRef, ScopeError> {
        let (raw, mut contributing) = self.apply_assignments(scope, node)?;

        let protocol = Arc::clone(&self.protocol);
        let resolved = zipper_map(&protocol, &raw, |child| self.resolve(scope, child))?;

        for (_, child) in protocol.children(&resolved) {
            if let Some(owner) = self.owning_scopes.get(&child.id()) {
                if !contributing.contains(owner) {
                    contributing.push(*owner);
                }
            }
        }

        match self.most_specific(&contributing) {
            Some(owner) if owner == scope => {
                trace!(node = %node.label(), scope = %scope, "scope owns resolution");
                self.owning_scopes.insert(resolved.id(), scope);
                Ok(resolved)
            }
            Some(owner) => {
                trace!(
                    node = %node.label(),
                    scope = %scope,
                    owner = %owner,
                    "delegating resolution to more specific scope"
                );
                self.resolve(owner, node)
            }
            None => Ok(resolved),
        }
    }

    /// Reduce contributing scopes to the deepest one.
    ///
    /// The first candidate seeds the reduction. A later candidate replaces
    /// the accumulator only if it descends from it; unrelated scopes keep the
    /// earlier one.
    fn most_specific(&self, candidates: &[AssignmentScopeId]) -> Option<AssignmentScopeId> {
        let mut acc: Option<AssignmentScopeId> = None;

        for &candidate in candidates {
            acc = match acc {
                None => Some(candidate),
                Some(current) if self.has_parent(candidate, Some(current)) => Some(candidate),
                Some(current) => {
                    if !self.has_parent(current, Some(candidate)) {
                        debug!(
                            kept = %current,
                            ignored = %candidate,
                            "unrelated contributing scopes, keeping first seen"
                        );
                    }
                    Some(current)
                }
            };
        }

        acc
    }
}
