//! # Operational Evaluation Engine
//!
//! The evaluator keeps two graph stores keyed by [`Key`]:
//!
//! - `graph` holds every vertex ever registered, with its dependency edges
//!   (an edge `a -> b` means `a` needs `b` evaluated first);
//! - `unevaluated` is the working set, a subset of `graph`.
//!
//! Work arrives through [`GraphChanges`]: vertices plus dependency edges
//! discovered by running their templates against a
//! [`capture::DependencyCapture`]. [`Evaluator::evaluate`] then runs rounds
//! until the working set is empty (see `run`).

pub mod capture;
mod graph;
pub mod key;
mod operational;
pub mod priority;
mod run;
pub mod vertex;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use crate::config::EvalConfig;
use crate::model::ResourceId;
use crate::path::{EdgeExpander, KbPathExpander};
use crate::solution::Solution;
use crate::storage::MemoryStore;
use crate::{Error, Result};

pub use key::{GraphQuery, Key};
pub use priority::ReadyPriority;
pub use vertex::{EdgeVertex, GraphStateVertex, PathExpandVertex, PropertyVertex, Vertex};

/// Vertex attribute names recorded on `graph` for diagnostics.
pub mod attr {
    pub const ROUND: &str = "round";
    pub const READY: &str = "ready";
    pub const DURATION: &str = "duration";
    pub const ERROR: &str = "error";
}

// ============================================================================
// GraphChanges
// ============================================================================

/// Vertices and dependency edges staged for [`Evaluator::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct GraphChanges {
    pub nodes: BTreeMap<Key, Vertex>,
    /// dependent → dependencies
    pub edges: BTreeMap<Key, BTreeSet<Key>>,
}

impl GraphChanges {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) {
        let key = vertex.key();
        match self.nodes.get_mut(&key) {
            Some(existing) => existing.update_from(&vertex),
            None => {
                self.nodes.insert(key, vertex);
            }
        }
    }

    /// Record that `source` depends on `target`. Self-dependencies are dropped.
    pub fn add_edge(&mut self, source: Key, target: Key) {
        if source == target {
            return;
        }
        self.edges.entry(source).or_default().insert(target);
    }

    pub fn merge(&mut self, other: GraphChanges) {
        for (_, vertex) in other.nodes {
            self.add_vertex(vertex);
        }
        for (source, targets) in other.edges {
            for target in targets {
                self.add_edge(source.clone(), target);
            }
        }
    }

    /// Stage `vertex` together with everything it depends on right now.
    pub fn add_vertex_and_deps(&mut self, eval: &Evaluator, vertex: Vertex) -> Result<()> {
        let deps = vertex.dependencies(eval)?;
        self.merge(deps);
        self.add_vertex(vertex);
        Ok(())
    }
}

// ============================================================================
// Evaluator
// ============================================================================

pub struct Evaluator {
    solution: Solution,
    config: EvalConfig,
    expander: Arc<dyn EdgeExpander>,
    graph: MemoryStore<Key, Vertex>,
    unevaluated: MemoryStore<Key, ()>,
    evaluated_order: Vec<Vec<Key>>,
    errored: BTreeSet<Key>,
    /// Renames applied so far, oldest first.
    renames: Vec<(ResourceId, ResourceId)>,
}

impl Evaluator {
    pub fn new(solution: Solution) -> Self {
        Self {
            solution,
            config: EvalConfig::default(),
            expander: Arc::new(KbPathExpander),
            graph: MemoryStore::acyclic(),
            unevaluated: MemoryStore::acyclic(),
            evaluated_order: Vec::new(),
            errored: BTreeSet::new(),
            renames: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        if !config.global_tag.is_empty() {
            self.solution.set_global_tag(config.global_tag.clone());
        }
        self.config = config;
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn EdgeExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn solution_mut(&mut self) -> &mut Solution {
        &mut self.solution
    }

    pub fn expander(&self) -> &dyn EdgeExpander {
        self.expander.as_ref()
    }

    pub fn graph(&self) -> &MemoryStore<Key, Vertex> {
        &self.graph
    }

    pub fn unevaluated(&self) -> &MemoryStore<Key, ()> {
        &self.unevaluated
    }

    /// Keys evaluated in each completed round, in evaluation order.
    pub fn evaluated_order(&self) -> &[Vec<Key>] {
        &self.evaluated_order
    }

    pub fn errored(&self) -> &BTreeSet<Key> {
        &self.errored
    }

    pub fn vertex(&self, key: &Key) -> Option<Vertex> {
        self.graph.vertex(key)
    }

    pub fn is_evaluated(&self, key: &Key) -> bool {
        self.graph.contains(key) && !self.unevaluated.contains(key)
    }

    /// Merge staged changes into both stores. New vertices join the working
    /// set; known ones are merged in place. Dependency edges land in `graph`,
    /// and in `unevaluated` when both ends are still pending.
    pub fn enqueue(&self, changes: GraphChanges) -> Result<()> {
        let mut errs = Vec::new();
        for (key, vertex) in changes.nodes {
            if self.graph.contains(&key) {
                if let Err(err) = self.graph.update_vertex(&key, |existing| existing.update_from(&vertex)) {
                    errs.push(Error::from(err).context(format!("could not update vertex {key}")));
                }
                continue;
            }
            if let Err(err) = self.graph.add_vertex(key.clone(), vertex) {
                errs.push(Error::from(err).context(format!("could not add vertex {key}")));
                continue;
            }
            if let Err(err) = self.unevaluated.add_vertex(key.clone(), ()) {
                errs.push(Error::from(err).context(format!("could not add unevaluated vertex {key}")));
            }
        }

        for (source, targets) in changes.edges {
            for target in targets {
                if let Err(err) = self.enqueue_edge(&source, &target) {
                    errs.push(err.context(format!("could not add dependency {source} -> {target}")));
                }
            }
        }
        Error::join(errs)
    }

    fn enqueue_edge(&self, source: &Key, target: &Key) -> Result<()> {
        for key in [source, target] {
            if !self.graph.contains(key) {
                self.add_placeholder(key)?;
            }
        }
        self.graph.add_edge(source, target)?;
        if self.unevaluated.contains(source) && self.unevaluated.contains(target) {
            self.unevaluated.add_edge(source, target)?;
        }
        Ok(())
    }

    /// A property referenced before anything registered it. Its template is
    /// filled in once the resource exists.
    fn add_placeholder(&self, key: &Key) -> Result<()> {
        let Key::Property(reference) = key else {
            return Err(Error::NotFound(format!("dependency {key} has no vertex")));
        };
        let template = if self.solution.has_resource(&reference.resource) {
            self.solution.knowledge_base().property_template(reference).cloned()
        } else {
            None
        };
        let vertex = Vertex::Property(PropertyVertex::new(reference.clone(), template));
        self.graph.add_vertex(key.clone(), vertex)?;
        self.unevaluated.add_vertex(key.clone(), ())?;
        Ok(())
    }

    /// Rename resource `old` to `new` everywhere: the live graph, every
    /// vertex key and edge-rule map, and the evaluation history.
    pub fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.solution.update_id(old, new)?;

        for key in self.graph.topological_sort()? {
            let Some(vertex) = self.graph.vertex(&key) else { continue };
            let renamed = vertex.renamed(old, new);
            let new_key = key.renamed(old, new);
            if new_key != key && self.graph.contains(&new_key) {
                self.fold_vertex(&key, &new_key, &renamed)?;
            } else if new_key != key {
                self.graph.replace_vertex(&key, new_key.clone(), renamed)?;
                if self.unevaluated.contains(&key) {
                    self.unevaluated.replace_vertex(&key, new_key, ())?;
                }
            } else if renamed != vertex {
                self.graph.update_vertex(&key, |v| *v = renamed)?;
            }
        }

        for round in &mut self.evaluated_order {
            for key in round.iter_mut() {
                *key = key.renamed(old, new);
            }
        }
        self.errored = std::mem::take(&mut self.errored).into_iter().map(|k| k.renamed(old, new)).collect();
        self.renames.push((old.clone(), new.clone()));
        info!(%old, %new, "propagated resource rename");
        Ok(())
    }

    /// A renamed vertex whose new key is already registered: merge it into
    /// the existing vertex and move its dependency edges over.
    fn fold_vertex(&self, old: &Key, new: &Key, renamed: &Vertex) -> Result<()> {
        self.graph.update_vertex(new, |v| v.update_from(renamed))?;
        if self.unevaluated.contains(old) {
            self.unevaluated.remove_vertex(old)?;
            if !self.unevaluated.contains(new) {
                self.unevaluated.add_vertex(new.clone(), ())?;
            }
        }
        for dependent in self.graph.predecessors(old) {
            self.enqueue_edge(&dependent, new)?;
        }
        for dependency in self.graph.successors(old) {
            self.enqueue_edge(new, &dependency)?;
        }
        self.graph.remove_vertex(old)?;
        Ok(())
    }

    /// `key` after every rename applied since `since` renames had happened.
    pub(crate) fn follow_renames(&self, key: &Key, since: usize) -> Key {
        self.renames[since..].iter().fold(key.clone(), |k, (old, new)| k.renamed(old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;
    use crate::model::PropertyRef;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(Solution::new(Arc::new(KnowledgeBase::new())))
    }

    fn property(resource: &str, name: &str) -> Vertex {
        Vertex::Property(PropertyVertex::new(PropertyRef::new(id(resource), name), None))
    }

    #[test]
    fn test_changes_drop_self_edges() {
        let mut changes = GraphChanges::default();
        let key = Key::property(id("aws:vpc:a"), "Cidr");
        changes.add_edge(key.clone(), key);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_enqueue_creates_placeholders() {
        let eval = evaluator();
        let mut changes = GraphChanges::default();
        let a = property("aws:vpc:a", "Cidr");
        let b = Key::property(id("aws:vpc:b"), "Cidr");
        changes.add_edge(a.key(), b.clone());
        changes.add_vertex(a.clone());
        eval.enqueue(changes).unwrap();

        assert!(eval.graph().contains(&b));
        assert!(eval.unevaluated().has_edge(&a.key(), &b));
        let Some(Vertex::Property(placeholder)) = eval.vertex(&b) else { panic!("missing placeholder") };
        assert!(placeholder.template.is_none());
    }

    #[test]
    fn test_enqueue_rejects_cycle() {
        let eval = evaluator();
        let a = property("aws:vpc:a", "Cidr");
        let b = property("aws:vpc:b", "Cidr");
        let mut first = GraphChanges::default();
        first.add_edge(a.key(), b.key());
        first.add_vertex(a.clone());
        first.add_vertex(b.clone());
        eval.enqueue(first).unwrap();

        let mut second = GraphChanges::default();
        second.add_edge(b.key(), a.key());
        let err = eval.enqueue(second).unwrap_err();
        assert!(err.leaves().iter().any(|e| matches!(e, Error::Graph(crate::GraphError::WouldCycle { .. }))));
    }

    #[test]
    fn test_enqueue_edge_to_evaluated_only_in_graph() {
        let eval = evaluator();
        let a = property("aws:vpc:a", "Cidr");
        let b = property("aws:vpc:b", "Cidr");
        let mut changes = GraphChanges::default();
        changes.add_vertex(a.clone());
        changes.add_vertex(b.clone());
        eval.enqueue(changes).unwrap();
        eval.unevaluated().remove_vertex(&b.key()).unwrap();

        let mut dep = GraphChanges::default();
        dep.add_edge(a.key(), b.key());
        eval.enqueue(dep).unwrap();
        assert!(eval.graph().has_edge(&a.key(), &b.key()));
        assert!(eval.is_evaluated(&b.key()));
        assert!(eval.unevaluated().successors(&a.key()).is_empty());
    }

    #[test]
    fn test_non_property_dependency_without_vertex_fails() {
        let eval = evaluator();
        let a = property("aws:vpc:a", "Cidr");
        let mut changes = GraphChanges::default();
        changes.add_vertex(a.clone());
        changes.add_edge(a.key(), Key::GraphState(GraphQuery::new("hasUpstream", id("aws:x"), id("aws:vpc:a"))));
        assert!(eval.enqueue(changes).is_err());
    }
}
