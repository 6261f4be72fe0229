// src/engine/scope.rs

//! Runtime value scopes.
//!
//! A [`Scope`] is a named value store with an optional parent. Lookups fall
//! back to the parent chain; writes only ever touch the local store. One run
//! owns a tree of scopes: the root is preloaded with every statically
//! resolved value, and each spliced fork region gets a child scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::node::{Datum, NodeId};

pub struct Scope {
    name: String,
    parent: Option<Arc<Scope>>,
    child_names: Mutex<Vec<String>>,
    contents: RwLock<HashMap<NodeId, Datum>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name.as_str()))
            .field("values", &self.len())
            .finish()
    }
}

impl Scope {
    /// Create a root scope preloaded with `contents`.
    pub fn root(name: impl Into<String>, contents: HashMap<NodeId, Datum>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: None,
            child_names: Mutex::new(Vec::new()),
            contents: RwLock::new(contents),
        })
    }

    /// Create an empty child of `parent`.
    pub fn child(parent: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        parent
            .child_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.clone());

        Arc::new(Self {
            name,
            parent: Some(Arc::clone(parent)),
            child_names: Mutex::new(Vec::new()),
            contents: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Names of the children created under this scope, in creation order.
    pub fn child_names(&self) -> Vec<String> {
        self.child_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of locally stored values.
    pub fn len(&self) -> usize {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Local value if present, else the nearest ancestor's.
    pub fn get(&self, id: NodeId) -> Option<Datum> {
        let local = self
            .contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();

        match local {
            Some(value) => Some(value),
            None => self.parent.as_ref().and_then(|parent| parent.get(id)),
        }
    }

    /// Write into the local store. Ancestors are never touched.
    pub fn set(&self, id: NodeId, value: Datum) {
        self.contents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, value);
    }

    /// Visible from this scope, locally or through an ancestor.
    pub fn has(&self, id: NodeId) -> bool {
        self.has_own(id) || self.parent.as_ref().is_some_and(|parent| parent.has(id))
    }

    pub fn has_own(&self, id: NodeId) -> bool {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// True if `ancestor` is this scope or one of its ancestors.
    pub fn is_within(&self, ancestor: &Scope) -> bool {
        let mut current = Some(self);
        while let Some(scope) = current {
            if std::ptr::eq(scope, ancestor) {
                return true;
            }
            current = scope.parent.as_deref();
        }
        false
    }

    /// Shallowest scope on the chain from here to the root that can supply
    /// every id in `ids` without relying on anything below it.
    ///
    /// Returns `None` when no such scope exists.
    pub fn earliest_ancestor_providing_values(self: &Arc<Self>, ids: &[NodeId]) -> Option<Arc<Scope>> {
        let missing: Vec<NodeId> = ids.iter().copied().filter(|id| !self.has_own(*id)).collect();

        let Some(parent) = &self.parent else {
            return missing.is_empty().then(|| Arc::clone(self));
        };

        if missing.len() == ids.len() {
            return parent.earliest_ancestor_providing_values(ids);
        }

        if missing.iter().all(|id| parent.has(*id)) {
            Some(Arc::clone(self))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRef;
    use serde_json::json;

    #[test]
    fn get_falls_back_to_parent_and_set_stays_local() {
        let a = NodeRef::value(1).id();
        let b = NodeRef::value(2).id();

        let root = Scope::root("run", HashMap::from([(a, json!(1))]));
        let child = Scope::child(&root, "run/fork");

        assert_eq!(child.get(a), Some(json!(1)));
        assert!(child.has(a));
        assert!(!child.has_own(a));

        child.set(b, json!(2));
        assert_eq!(child.get(b), Some(json!(2)));
        assert_eq!(root.get(b), None);
        assert!(!root.has(b));

        child.set(a, json!(10));
        assert_eq!(child.get(a), Some(json!(10)));
        assert_eq!(root.get(a), Some(json!(1)));
        assert_eq!(root.child_names(), vec!["run/fork".to_string()]);
    }

    #[test]
    fn earliest_ancestor_walks_up_when_nothing_is_local() {
        let a = NodeRef::value(1).id();
        let root = Scope::root("run", HashMap::from([(a, json!(1))]));
        let mid = Scope::child(&root, "mid");
        let leaf = Scope::child(&mid, "leaf");

        let found = leaf.earliest_ancestor_providing_values(&[a]).unwrap();
        assert!(Arc::ptr_eq(&found, &root));

        let found = leaf.earliest_ancestor_providing_values(&[]).unwrap();
        assert!(Arc::ptr_eq(&found, &root));
    }

    #[test]
    fn earliest_ancestor_stops_where_values_are_split() {
        let a = NodeRef::value(1).id();
        let b = NodeRef::value(2).id();
        let root = Scope::root("run", HashMap::from([(a, json!(1))]));
        let mid = Scope::child(&root, "mid");
        mid.set(b, json!(2));
        let leaf = Scope::child(&mid, "leaf");

        let found = leaf.earliest_ancestor_providing_values(&[a, b]).unwrap();
        assert!(Arc::ptr_eq(&found, &mid));
    }

    #[test]
    fn earliest_ancestor_is_none_when_a_value_is_unavailable() {
        let a = NodeRef::value(1).id();
        let b = NodeRef::value(2).id();
        let unknown = NodeRef::value(3).id();
        let root = Scope::root("run", HashMap::from([(a, json!(1))]));
        let leaf = Scope::child(&root, "leaf");
        leaf.set(b, json!(2));

        assert!(leaf.earliest_ancestor_providing_values(&[b, unknown]).is_none());
        assert!(leaf.earliest_ancestor_providing_values(&[unknown]).is_none());
    }

    #[test]
    fn is_within_follows_the_parent_chain() {
        let root = Scope::root("run", HashMap::new());
        let left = Scope::child(&root, "left");
        let right = Scope::child(&root, "right");

        assert!(left.is_within(&root));
        assert!(left.is_within(&left));
        assert!(!left.is_within(&right));
        assert!(!root.is_within(&left));
    }
}
