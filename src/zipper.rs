// src/zipper.rs

//! Child enumeration and reconstruction over nodes.
//!
//! A [`ZipperProtocol`] is a registry of [`ZipperCase`]s, one per node
//! variant that has children. Dispatch tries each case's `is_member` in
//! registration order and uses the first match. [`zipper_map`] uses the
//! protocol to rewrite a node's children while sharing everything that did
//! not change: if no child changes, the very same [`NodeRef`] comes back.

use std::fmt;

use crate::errors::ZipperError;
use crate::node::{Node, NodeRef};

/// Address of one child slot of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildKey {
    /// Entry of the ordinary `dependencies` map.
    Dependency(String),
    /// Entry of `siblings.dependencies`.
    Sibling(String),
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Dependency(name) => write!(f, "dependencies.{name}"),
            ChildKey::Sibling(name) => write!(f, "siblings.{name}"),
        }
    }
}

/// Per-variant zipper behaviour.
pub trait ZipperCase: Send + Sync {
    fn is_member(&self, node: &NodeRef) -> bool;

    /// Ordered `(key, child)` pairs.
    fn children(&self, node: &NodeRef) -> Vec<(ChildKey, NodeRef)>;

    /// Shallow copy of `node` with only the slot `key` replaced by `child`.
    fn reconstruct(
        &self,
        node: &NodeRef,
        key: &ChildKey,
        child: NodeRef,
    ) -> Result<NodeRef, ZipperError>;
}

/// Executables: ordinary dependencies followed by sibling dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutableCase;

impl ZipperCase for ExecutableCase {
    fn is_member(&self, node: &NodeRef) -> bool {
        matches!(node.node(), Node::Executable(_))
    }

    fn children(&self, node: &NodeRef) -> Vec<(ChildKey, NodeRef)> {
        let Node::Executable(exe) = node.node() else {
            return Vec::new();
        };

        let mut children: Vec<(ChildKey, NodeRef)> = exe
            .dependencies
            .iter()
            .map(|(name, child)| (ChildKey::Dependency(name.clone()), child.clone()))
            .collect();

        if let Some(siblings) = &exe.siblings {
            children.extend(
                siblings
                    .dependencies
                    .iter()
                    .map(|(name, child)| (ChildKey::Sibling(name.clone()), child.clone())),
            );
        }

        children
    }

    fn reconstruct(
        &self,
        node: &NodeRef,
        key: &ChildKey,
        child: NodeRef,
    ) -> Result<NodeRef, ZipperError> {
        let Node::Executable(exe) = node.node() else {
            return Err(ZipperError::UnrecognizedNode { kind: node.kind() });
        };

        let mut copy = exe.clone();
        let slot = match key {
            ChildKey::Dependency(name) => copy.dependencies.get_mut(name),
            ChildKey::Sibling(name) => match copy.siblings.as_mut() {
                Some(siblings) => siblings.dependencies.get_mut(name),
                None => {
                    return Err(ZipperError::MissingSiblings {
                        node: exe.name.clone(),
                    });
                }
            },
        };

        match slot {
            Some(slot) => *slot = child,
            None => {
                return Err(ZipperError::UnknownChild {
                    node: exe.name.clone(),
                    key: key.to_string(),
                });
            }
        }

        Ok(NodeRef::new(Node::Executable(copy)))
    }
}

/// Schedulers: ordinary dependencies only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerCase;

impl ZipperCase for SchedulerCase {
    fn is_member(&self, node: &NodeRef) -> bool {
        matches!(node.node(), Node::Scheduler(_))
    }

    fn children(&self, node: &NodeRef) -> Vec<(ChildKey, NodeRef)> {
        match node.node() {
            Node::Scheduler(s) => s
                .dependencies
                .iter()
                .map(|(name, child)| (ChildKey::Dependency(name.clone()), child.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn reconstruct(
        &self,
        node: &NodeRef,
        key: &ChildKey,
        child: NodeRef,
    ) -> Result<NodeRef, ZipperError> {
        let Node::Scheduler(scheduler) = node.node() else {
            return Err(ZipperError::UnrecognizedNode { kind: node.kind() });
        };

        let ChildKey::Dependency(name) = key else {
            return Err(ZipperError::UnknownChild {
                node: scheduler.name.clone(),
                key: key.to_string(),
            });
        };

        let mut copy = scheduler.clone();
        match copy.dependencies.get_mut(name) {
            Some(slot) => *slot = child,
            None => {
                return Err(ZipperError::UnknownChild {
                    node: scheduler.name.clone(),
                    key: key.to_string(),
                });
            }
        }

        Ok(NodeRef::new(Node::Scheduler(copy)))
    }
}

/// Ordered registry of zipper cases.
pub struct ZipperProtocol {
    cases: Vec<Box<dyn ZipperCase>>,
}

impl fmt::Debug for ZipperProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipperProtocol")
            .field("cases", &self.cases.len())
            .finish()
    }
}

impl Default for ZipperProtocol {
    fn default() -> Self {
        Self::for_nodes()
    }
}

impl ZipperProtocol {
    pub fn new(cases: Vec<Box<dyn ZipperCase>>) -> Self {
        Self { cases }
    }

    /// Protocol with the executable and scheduler cases registered.
    pub fn for_nodes() -> Self {
        Self::new(vec![Box::new(ExecutableCase), Box::new(SchedulerCase)])
    }

    fn case_for(&self, node: &NodeRef) -> Option<&dyn ZipperCase> {
        self.cases
            .iter()
            .find(|case| case.is_member(node))
            .map(|case| case.as_ref())
    }

    /// Children of `node`; empty for nodes no case recognizes.
    pub fn children(&self, node: &NodeRef) -> Vec<(ChildKey, NodeRef)> {
        self.case_for(node)
            .map(|case| case.children(node))
            .unwrap_or_default()
    }

    pub fn reconstruct(
        &self,
        node: &NodeRef,
        key: &ChildKey,
        child: NodeRef,
    ) -> Result<NodeRef, ZipperError> {
        match self.case_for(node) {
            Some(case) => case.reconstruct(node, key, child),
            None => Err(ZipperError::UnrecognizedNode { kind: node.kind() }),
        }
    }
}

/// Apply `mapping` to every child of `node`.
///
/// Changed children (by identity) are folded one after another onto the
/// progressively rebuilt node. When nothing changes, `node` itself is
/// returned, so callers can use identity as a dirty check.
pub fn zipper_map<F, E>(protocol: &ZipperProtocol, node: &NodeRef, mut mapping: F) -> Result<NodeRef, E>
where
    F: FnMut(&NodeRef) -> Result<NodeRef, E>,
    E: From<ZipperError>,
{
    let mut acc = node.clone();

    for (key, child) in protocol.children(node) {
        let mapped = mapping(&child)?;
        if !mapped.is(&child) {
            acc = protocol.reconstruct(&acc, &key, mapped)?;
        }
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecutableBuilder, SchedulerBuilder};
    use serde_json::json;

    fn identity(node: &NodeRef) -> Result<NodeRef, ZipperError> {
        Ok(node.clone())
    }

    fn sample_executable() -> (NodeRef, NodeRef, NodeRef, NodeRef) {
        let a = NodeRef::parameter("a");
        let b = NodeRef::parameter("b");
        let s = NodeRef::parameter("s");
        let mut siblings = crate::node::Dependencies::new();
        siblings.insert("s".to_string(), s.clone());
        let exe = ExecutableBuilder::new("exe")
            .dependency("a", a.clone())
            .dependency("b", b.clone())
            .siblings(siblings, |_| true)
            .run_sync(|_| Ok(json!(null)));
        (exe, a, b, s)
    }

    #[test]
    fn identity_mapping_returns_same_reference() {
        let protocol = ZipperProtocol::for_nodes();
        let (exe, ..) = sample_executable();
        let sched = SchedulerBuilder::new("s")
            .dependency("x", NodeRef::value(1))
            .fork_sync(|_| Ok(vec![]));
        let value = NodeRef::value(3);

        for node in [exe, sched, value] {
            let out = zipper_map(&protocol, &node, identity).unwrap();
            assert!(out.is(&node));
        }
    }

    #[test]
    fn executable_children_include_tagged_siblings() {
        let protocol = ZipperProtocol::for_nodes();
        let (exe, a, b, s) = sample_executable();

        let children = protocol.children(&exe);
        assert_eq!(
            children,
            vec![
                (ChildKey::Dependency("a".into()), a),
                (ChildKey::Dependency("b".into()), b),
                (ChildKey::Sibling("s".into()), s),
            ]
        );
    }

    #[test]
    fn multiple_changed_children_compose() {
        let protocol = ZipperProtocol::for_nodes();
        let (exe, a, b, s) = sample_executable();
        let a2 = NodeRef::value(1);
        let b2 = NodeRef::value(2);
        let s2 = NodeRef::value(3);

        let out = zipper_map(&protocol, &exe, |child: &NodeRef| -> Result<_, ZipperError> {
            Ok(if child.is(&a) {
                a2.clone()
            } else if child.is(&b) {
                b2.clone()
            } else if child.is(&s) {
                s2.clone()
            } else {
                child.clone()
            })
        })
        .unwrap();

        assert!(!out.is(&exe));
        let Node::Executable(rebuilt) = out.node() else {
            panic!("expected executable");
        };
        assert!(rebuilt.dependencies["a"].is(&a2));
        assert!(rebuilt.dependencies["b"].is(&b2));
        assert!(rebuilt.siblings.as_ref().unwrap().dependencies["s"].is(&s2));

        // The original is untouched.
        let Node::Executable(original) = exe.node() else {
            panic!("expected executable");
        };
        assert!(original.dependencies["a"].is(&a));
    }

    #[test]
    fn unchanged_children_are_shared_by_reference() {
        let protocol = ZipperProtocol::for_nodes();
        let (exe, a, b, _) = sample_executable();
        let a2 = NodeRef::value(10);

        let out = zipper_map(&protocol, &exe, |child: &NodeRef| -> Result<_, ZipperError> {
            Ok(if child.is(&a) { a2.clone() } else { child.clone() })
        })
        .unwrap();

        let Node::Executable(rebuilt) = out.node() else {
            panic!("expected executable");
        };
        assert!(rebuilt.dependencies["b"].is(&b));
    }

    #[test]
    fn reconstruct_on_unrecognized_node_is_an_error() {
        let protocol = ZipperProtocol::for_nodes();
        let value = NodeRef::value(1);
        let err = protocol
            .reconstruct(&value, &ChildKey::Dependency("x".into()), NodeRef::value(2))
            .unwrap_err();
        assert!(matches!(err, ZipperError::UnrecognizedNode { .. }));
    }

    #[test]
    fn sibling_reconstruct_without_siblings_is_an_error() {
        let exe = ExecutableBuilder::new("plain")
            .dependency("a", NodeRef::parameter("a"))
            .run_sync(|_| Ok(json!(null)));
        let err = ExecutableCase
            .reconstruct(&exe, &ChildKey::Sibling("a".into()), NodeRef::value(1))
            .unwrap_err();
        assert_eq!(
            err,
            ZipperError::MissingSiblings {
                node: "plain".into()
            }
        );
    }

    #[test]
    fn scheduler_reconstruct_replaces_dependency() {
        let protocol = ZipperProtocol::for_nodes();
        let p = NodeRef::parameter("n");
        let sched = SchedulerBuilder::new("fan")
            .dependency("n", p.clone())
            .fork_sync(|_| Ok(vec![]));
        let v = NodeRef::value(4);

        let out = protocol
            .reconstruct(&sched, &ChildKey::Dependency("n".into()), v.clone())
            .unwrap();
        assert_eq!(protocol.children(&out), vec![(ChildKey::Dependency("n".into()), v)]);
    }
}
