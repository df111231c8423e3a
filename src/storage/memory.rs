//! In-memory graph store.
//!
//! Adjacency lives in a `petgraph` [`StableDiGraph`] (indices survive
//! removals), with an ordered key index next to it, both behind a single
//! `parking_lot::RwLock`. Every enumeration (keys, adjacency, topological
//! order) goes through the ordered index, so it is reproducible across runs.
//!
//! ## Limitations
//!
//! - **Coarse locking**: one lock for the whole store. Multi-step mutations
//!   made by a caller (remove, then re-add) are NOT atomic as a unit.
//! - **Cycle checks are a path search per insert**: fine at evaluator
//!   scale, linear in the reachable set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use parking_lot::RwLock;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction::{Incoming, Outgoing};

use super::GraphError;

type StoreResult<T> = std::result::Result<T, GraphError>;

// ============================================================================
// MemoryStore
// ============================================================================

/// Directed graph keyed by `K` holding one `V` per vertex.
pub struct MemoryStore<K, V> {
    inner: RwLock<StoreInner<K, V>>,
    prevent_cycles: bool,
}

struct StoreInner<K, V> {
    graph: StableDiGraph<Node<K, V>, ()>,
    index: BTreeMap<K, NodeIndex>,
}

struct Node<K, V> {
    key: K,
    value: V,
    attributes: BTreeMap<String, String>,
}

/// Point-in-time copy of a store, taken under one read lock.
#[derive(Debug, Clone)]
pub struct Snapshot<K, V> {
    pub vertices: Vec<(K, V, BTreeMap<String, String>)>,
    pub edges: Vec<(K, K)>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Ord + Clone + Display,
    V: Clone,
{
    /// A store that accepts any edge, cycles included.
    pub fn new() -> Self {
        Self::with_cycle_check(false)
    }

    /// A store that rejects any edge that would close a cycle.
    pub fn acyclic() -> Self {
        Self::with_cycle_check(true)
    }

    fn with_cycle_check(prevent_cycles: bool) -> Self {
        Self {
            inner: RwLock::new(StoreInner { graph: StableDiGraph::new(), index: BTreeMap::new() }),
            prevent_cycles,
        }
    }

    // ========================================================================
    // Vertices
    // ========================================================================

    /// Insert a vertex. Re-inserting an equal value is a no-op; a different
    /// value under the same key is [`GraphError::VertexExists`].
    pub fn add_vertex(&self, key: K, value: V) -> StoreResult<()>
    where
        V: PartialEq,
    {
        let mut inner = self.inner.write();
        if let Some(&ix) = inner.index.get(&key) {
            if inner.graph[ix].value == value {
                return Ok(());
            }
            return Err(GraphError::VertexExists(key.to_string()));
        }
        let ix = inner.graph.add_node(Node { key: key.clone(), value, attributes: BTreeMap::new() });
        inner.index.insert(key, ix);
        Ok(())
    }

    pub fn vertex(&self, key: &K) -> Option<V> {
        let inner = self.inner.read();
        inner.index.get(key).map(|&ix| inner.graph[ix].value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().index.contains_key(key)
    }

    /// Mutate a vertex value in place.
    pub fn update_vertex<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> StoreResult<R> {
        let mut inner = self.inner.write();
        let ix = inner.ix(key)?;
        Ok(f(&mut inner.graph[ix].value))
    }

    /// Remove a vertex together with every edge touching it.
    pub fn remove_vertex(&self, key: &K) -> StoreResult<V> {
        let mut inner = self.inner.write();
        let ix = inner.index.remove(key).ok_or_else(|| GraphError::VertexNotFound(key.to_string()))?;
        let node = inner.graph.remove_node(ix).ok_or_else(|| GraphError::VertexNotFound(key.to_string()))?;
        Ok(node.value)
    }

    /// Re-key a vertex, moving all its edges and attributes onto `new_key`.
    pub fn replace_vertex(&self, old: &K, new_key: K, value: V) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let ix = inner.ix(old)?;
        if *old != new_key {
            if inner.index.contains_key(&new_key) {
                return Err(GraphError::VertexExists(new_key.to_string()));
            }
            inner.index.remove(old);
            inner.index.insert(new_key.clone(), ix);
            inner.graph[ix].key = new_key;
        }
        inner.graph[ix].value = value;
        Ok(())
    }

    pub fn set_attribute(&self, key: &K, name: &str, value: impl Into<String>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let ix = inner.ix(key)?;
        inner.graph[ix].attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn attributes(&self, key: &K) -> BTreeMap<String, String> {
        let inner = self.inner.read();
        inner.index.get(key).map(|&ix| inner.graph[ix].attributes.clone()).unwrap_or_default()
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Insert `source -> target`. Adding an existing edge is a no-op.
    pub fn add_edge(&self, source: &K, target: &K) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let s = inner.ix(source)?;
        let t = inner.ix(target)?;
        if inner.graph.contains_edge(s, t) {
            return Ok(());
        }
        if self.prevent_cycles && (s == t || has_path_connecting(&inner.graph, t, s, None)) {
            return Err(GraphError::WouldCycle {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        inner.graph.add_edge(s, t, ());
        Ok(())
    }

    pub fn remove_edge(&self, source: &K, target: &K) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let edge = match (inner.index.get(source), inner.index.get(target)) {
            (Some(&s), Some(&t)) => inner.graph.find_edge(s, t),
            _ => None,
        };
        let Some(edge) = edge else {
            return Err(GraphError::EdgeNotFound {
                from: source.to_string(),
                to: target.to_string(),
            });
        };
        inner.graph.remove_edge(edge);
        Ok(())
    }

    pub fn has_edge(&self, source: &K, target: &K) -> bool {
        let inner = self.inner.read();
        match (inner.index.get(source), inner.index.get(target)) {
            (Some(&s), Some(&t)) => inner.graph.contains_edge(s, t),
            _ => false,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of vertices.
    pub fn order(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Number of edges.
    pub fn size(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.read().index.keys().cloned().collect()
    }

    /// Every edge, ordered by source then target.
    pub fn edges(&self) -> Vec<(K, K)> {
        self.inner.read().edges()
    }

    pub fn successors(&self, key: &K) -> BTreeSet<K> {
        let inner = self.inner.read();
        inner.index.get(key).map(|&ix| inner.neighbours(ix, Outgoing)).unwrap_or_default()
    }

    pub fn predecessors(&self, key: &K) -> BTreeSet<K> {
        let inner = self.inner.read();
        inner.index.get(key).map(|&ix| inner.neighbours(ix, Incoming)).unwrap_or_default()
    }

    /// Every vertex mapped to the set of vertices it points to.
    pub fn adjacency_map(&self) -> BTreeMap<K, BTreeSet<K>> {
        let inner = self.inner.read();
        inner.index.iter().map(|(k, &ix)| (k.clone(), inner.neighbours(ix, Outgoing))).collect()
    }

    /// Every vertex mapped to the set of vertices pointing to it.
    pub fn predecessor_map(&self) -> BTreeMap<K, BTreeSet<K>> {
        let inner = self.inner.read();
        inner.index.iter().map(|(k, &ix)| (k.clone(), inner.neighbours(ix, Incoming))).collect()
    }

    /// Kahn's algorithm with an ordered frontier: for every edge `a -> b`,
    /// `a` comes first, and ties are broken by key order.
    pub fn topological_sort(&self) -> StoreResult<Vec<K>> {
        let inner = self.inner.read();
        let graph = &inner.graph;
        let mut in_degree: BTreeMap<NodeIndex, usize> = inner
            .index
            .values()
            .map(|&ix| (ix, graph.neighbors_directed(ix, Incoming).count()))
            .collect();
        let mut frontier: BTreeSet<&K> = inner
            .index
            .iter()
            .filter(|(_, ix)| in_degree.get(*ix) == Some(&0))
            .map(|(k, _)| k)
            .collect();

        let mut sorted = Vec::with_capacity(inner.index.len());
        while let Some(key) = frontier.pop_first() {
            sorted.push(key.clone());
            let Some(&ix) = inner.index.get(key) else { continue };
            for succ in graph.neighbors_directed(ix, Outgoing) {
                if let Some(d) = in_degree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        frontier.insert(&graph[succ].key);
                    }
                }
            }
        }
        if sorted.len() != inner.index.len() {
            return Err(GraphError::CycleDetected { remaining: inner.index.len() - sorted.len() });
        }
        Ok(sorted)
    }

    pub fn snapshot(&self) -> Snapshot<K, V> {
        let inner = self.inner.read();
        Snapshot {
            vertices: inner
                .index
                .iter()
                .map(|(k, &ix)| {
                    let node = &inner.graph[ix];
                    (k.clone(), node.value.clone(), node.attributes.clone())
                })
                .collect(),
            edges: inner.edges(),
        }
    }
}

impl<K, V> StoreInner<K, V>
where
    K: Ord + Clone + Display,
{
    fn ix(&self, key: &K) -> StoreResult<NodeIndex> {
        self.index.get(key).copied().ok_or_else(|| GraphError::VertexNotFound(key.to_string()))
    }

    fn neighbours(&self, ix: NodeIndex, direction: petgraph::Direction) -> BTreeSet<K> {
        self.graph.neighbors_directed(ix, direction).map(|n| self.graph[n].key.clone()).collect()
    }

    fn edges(&self) -> Vec<(K, K)> {
        self.index
            .iter()
            .flat_map(|(s, &ix)| self.neighbours(ix, Outgoing).into_iter().map(move |t| (s.clone(), t)))
            .collect()
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Ord + Clone + Display,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
