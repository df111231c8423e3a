//! Registering and retracting work.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::{EdgeVertex, Evaluator, GraphChanges, Key, PathExpandVertex, PropertyVertex, Vertex};
use crate::model::{PropertyRef, Resource, ResourceId, SimpleEdge};
use crate::path::build_template_graph;
use crate::{Error, Result, ResultExt};

impl Evaluator {
    /// Register one property vertex per concrete property path of each
    /// resource. Already-known vertices are merged, not re-queued.
    pub fn add_resources(&self, resources: Vec<Resource>) -> Result<()> {
        let kb = self.solution().knowledge_base();
        let mut changes = GraphChanges::default();
        let mut errs = Vec::new();
        for res in resources {
            let template = match kb.resource_template(&res.id) {
                Ok(t) => t,
                Err(err) => {
                    errs.push(err.context(format!("could not add resource {}", res.id)));
                    continue;
                }
            };
            for (path, prop) in template.loop_properties(&res) {
                let vertex = PropertyVertex::new(PropertyRef::new(res.id.clone(), path), Some(prop.clone()));
                if let Err(err) = changes.add_vertex_and_deps(self, Vertex::Property(vertex)) {
                    errs.push(err);
                }
            }
        }
        Error::join(errs)?;
        self.enqueue(changes)
    }

    /// Register edges: edges with a template get an edge vertex for their
    /// rules, edges without one are abstract and need a path.
    pub fn add_edges(&self, edges: Vec<SimpleEdge>) -> Result<()> {
        let mut changes = GraphChanges::default();
        for edge in edges {
            if self.solution().knowledge_base().edge_template(&edge.source, &edge.target).is_some() {
                self.stage_edge_vertex(&mut changes, &edge)?;
            } else {
                self.stage_path(&mut changes, &edge)?;
            }
        }
        self.enqueue(changes)
    }

    /// One path-expansion vertex per satisfaction requirement of the pair.
    pub fn add_path(&self, source: &ResourceId, target: &ResourceId) -> Result<()> {
        let mut changes = GraphChanges::default();
        self.stage_path(&mut changes, &SimpleEdge::new(source.clone(), target.clone()))?;
        self.enqueue(changes)
    }

    pub(crate) fn stage_edge_vertex(&self, changes: &mut GraphChanges, edge: &SimpleEdge) -> Result<()> {
        let Some(template) = self.solution().knowledge_base().edge_template(&edge.source, &edge.target) else {
            return Ok(());
        };
        if template.operational_rules.is_empty() {
            return Ok(());
        }
        let vertex = EdgeVertex::new(edge.clone(), template.operational_rules.clone());
        changes.add_vertex_and_deps(self, Vertex::Edge(vertex))
    }

    fn stage_path(&self, changes: &mut GraphChanges, edge: &SimpleEdge) -> Result<()> {
        let kb = self.solution().knowledge_base();
        for satisfaction in kb.path_satisfactions(&edge.source, &edge.target) {
            let (classification, traversal) = satisfaction.route();
            let template_graph = match traversal {
                Some(_) => None,
                None => Some(Arc::new(
                    build_template_graph(edge, kb, classification)
                        .context(|| format!("could not build template graph for {edge}"))?,
                )),
            };
            let vertex = PathExpandVertex::new(edge.clone(), satisfaction.clone(), template_graph);
            changes.add_vertex_and_deps(self, Vertex::PathExpand(vertex))?;
        }
        Ok(())
    }

    /// Drop every vertex tied to `id` and every edge rule that mentions it.
    pub fn remove_resource(&self, id: &ResourceId) -> Result<()> {
        let mut states = BTreeSet::new();
        for key in self.graph().keys() {
            if key.references(id) {
                states.extend(self.graph_state_successors(&key));
                self.remove_vertex(&key)?;
                continue;
            }
            self.graph().update_vertex(&key, |v| {
                if let Vertex::Property(p) = v {
                    p.edge_rules.retain(|edge, _| !edge.touches(id));
                    p.transform_rules.retain(|edge, _| !edge.touches(id));
                }
            })?;
        }
        self.collect_graph_states(states)
    }

    /// Drop the vertices of one edge and the rules it routed to properties.
    pub fn remove_edge(&self, edge: &SimpleEdge) -> Result<()> {
        let mut states = BTreeSet::new();
        for key in self.graph().keys() {
            let owned = match &key {
                Key::Edge(e) | Key::PathExpand { edge: e, .. } => e == edge,
                _ => false,
            };
            if owned {
                states.extend(self.graph_state_successors(&key));
                self.remove_vertex(&key)?;
                continue;
            }
            self.graph().update_vertex(&key, |v| {
                if let Vertex::Property(p) = v {
                    p.edge_rules.remove(edge);
                    p.transform_rules.remove(edge);
                }
            })?;
        }
        self.collect_graph_states(states)
    }

    /// Remove `key` from both stores.
    pub(crate) fn remove_vertex(&self, key: &Key) -> Result<()> {
        self.graph().remove_vertex(key)?;
        if self.unevaluated().contains(key) {
            self.unevaluated().remove_vertex(key)?;
        }
        Ok(())
    }

    fn graph_state_successors(&self, key: &Key) -> Vec<Key> {
        self.graph()
            .successors(key)
            .into_iter()
            .filter(|k| matches!(k, Key::GraphState(_)))
            .collect()
    }

    /// Graph states nobody depends on anymore are garbage.
    fn collect_graph_states(&self, candidates: BTreeSet<Key>) -> Result<()> {
        for key in candidates {
            if self.graph().contains(&key) && self.graph().predecessors(&key).is_empty() {
                debug!(%key, "removing orphaned graph state");
                self.remove_vertex(&key)?;
            }
        }
        Ok(())
    }
}
