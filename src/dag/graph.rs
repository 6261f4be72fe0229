// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graphmap::{DiGraphMap, NodeTrait};

/// Mutable directed graph keyed by vertex identity.
///
/// Thin wrapper over petgraph's `DiGraphMap` exposing the parent/child view
/// the scheduler needs. Vertices are small copyable handles (`NodeId`,
/// `TaskId`); the data they stand for lives elsewhere.
///
/// `vertices()` has no ordering guarantee.
#[derive(Debug, Clone)]
pub struct Graph<T: NodeTrait> {
    inner: DiGraphMap<T, ()>,
}

impl<T: NodeTrait> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NodeTrait> Graph<T> {
    pub fn new() -> Self {
        Self {
            inner: DiGraphMap::new(),
        }
    }

    /// Build a graph from `(from, to)` edges.
    pub fn from_edges(edges: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut graph = Self::new();
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    pub fn add_vertex(&mut self, vertex: T) {
        self.inner.add_node(vertex);
    }

    /// Add an edge, implicitly adding both endpoints.
    pub fn add_edge(&mut self, from: T, to: T) {
        self.inner.add_edge(from, to, ());
    }

    pub fn remove_edge(&mut self, from: T, to: T) {
        self.inner.remove_edge(from, to);
    }

    /// Remove a vertex together with every edge touching it.
    pub fn remove_vertex(&mut self, vertex: T) {
        self.inner.remove_node(vertex);
    }

    pub fn children_of(&self, vertex: T) -> Vec<T> {
        self.inner
            .neighbors_directed(vertex, Direction::Outgoing)
            .collect()
    }

    pub fn parents_of(&self, vertex: T) -> Vec<T> {
        self.inner
            .neighbors_directed(vertex, Direction::Incoming)
            .collect()
    }

    pub fn has_children(&self, vertex: T) -> bool {
        self.inner
            .neighbors_directed(vertex, Direction::Outgoing)
            .next()
            .is_some()
    }

    pub fn has_parents(&self, vertex: T) -> bool {
        self.inner
            .neighbors_directed(vertex, Direction::Incoming)
            .next()
            .is_some()
    }

    pub fn has(&self, vertex: T) -> bool {
        self.inner.contains_node(vertex)
    }

    pub fn vertices(&self) -> Vec<T> {
        self.inner.nodes().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Vertices with no parents.
    pub fn roots(&self) -> Vec<T> {
        self.inner
            .nodes()
            .filter(|v| !self.has_parents(*v))
            .collect()
    }

    pub(crate) fn as_graphmap(&self) -> &DiGraphMap<T, ()> {
        &self.inner
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    InProgress,
    Done,
}

/// Three-color depth-first search over every vertex.
///
/// A back edge to an in-progress vertex is a cycle. The answer covers the
/// whole graph, not a single component.
pub fn has_cycles<T: NodeTrait>(graph: &Graph<T>) -> bool {
    let mut colors: HashMap<T, Color> = HashMap::with_capacity(graph.size());

    for start in graph.vertices() {
        if colors.contains_key(&start) {
            continue;
        }

        // Explicit stack of (vertex, children, next child index).
        let mut stack: Vec<(T, Vec<T>, usize)> = vec![(start, graph.children_of(start), 0)];
        colors.insert(start, Color::InProgress);

        while let Some((vertex, children, index)) = stack.last_mut() {
            if *index == children.len() {
                colors.insert(*vertex, Color::Done);
                stack.pop();
                continue;
            }

            let child = children[*index];
            *index += 1;

            match colors.get(&child) {
                Some(Color::InProgress) => return true,
                Some(Color::Done) => {}
                None => {
                    colors.insert(child, Color::InProgress);
                    let grandchildren = graph.children_of(child);
                    stack.push((child, grandchildren, 0));
                }
            }
        }
    }

    false
}

/// Some vertex on a cycle, if any. Used for error messages.
pub fn cycle_witness<T: NodeTrait>(graph: &Graph<T>) -> Option<T> {
    petgraph::algo::toposort(graph.as_graphmap(), None)
        .err()
        .map(|cycle| cycle.node_id())
}

/// New graph whose vertices are `mapping(v)` for each original vertex and
/// whose edges mirror the original edges.
pub fn map_vertices<T, U, F>(graph: &Graph<T>, mut mapping: F) -> Graph<U>
where
    T: NodeTrait,
    U: NodeTrait,
    F: FnMut(T) -> U,
{
    let mapped: HashMap<T, U> = graph.vertices().into_iter().map(|v| (v, mapping(v))).collect();

    let mut out = Graph::new();
    for (vertex, image) in &mapped {
        out.add_vertex(*image);
        for child in graph.children_of(*vertex) {
            if let Some(child_image) = mapped.get(&child) {
                out.add_edge(*image, *child_image);
            }
        }
    }
    out
}
