//! # Path Expansion Seam
//!
//! Turns an abstract edge ("these two resources need to talk, through
//! something that provides *network*") into a concrete chain of resources.
//!
//! The evaluator only depends on the [`EdgeExpander`] trait. The default
//! [`KbPathExpander`] does a shortest-path search over the knowledge base's
//! edge templates; embedders with a smarter search plug in their own.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::knowledge::KnowledgeBase;
use crate::model::{Resource, ResourceId, SimpleEdge};
use crate::solution::Solution;
use crate::{Error, Result};

/// Longest expansion considered, in edges.
pub const MAX_PATH_LENGTH: usize = 4;

// ============================================================================
// Seam types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionInput {
    pub edge: SimpleEdge,
    /// Bare classification (no field traversal); empty accepts any path.
    pub classification: String,
    pub template_graph: Option<Arc<TemplateGraph>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionResult {
    pub graph: ResourceGraph,
}

/// A resource subgraph containing both endpoints of the expanded edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    pub resources: BTreeMap<ResourceId, Resource>,
    pub edges: BTreeSet<SimpleEdge>,
}

impl ResourceGraph {
    /// Just the two endpoints joined by one edge.
    pub fn is_direct(&self) -> bool {
        self.resources.len() == 2 && self.edges.len() == 1
    }
}

pub trait EdgeExpander: Send + Sync {
    fn expand(&self, solution: &Solution, input: &ExpansionInput) -> Result<ExpansionResult>;
}

// ============================================================================
// Template graph
// ============================================================================

/// Type-level picture of every expansion shape an edge could take: the two
/// concrete endpoints plus type-only ids (`provider:type`) for intermediates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateGraph {
    pub nodes: BTreeSet<ResourceId>,
    pub edges: BTreeSet<SimpleEdge>,
}

impl TemplateGraph {
    /// Nodes reachable from `id`, excluding `id`.
    pub fn downstream_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.reachable(id, |e| (&e.source, &e.target))
    }

    /// Nodes that reach `id`, excluding `id`.
    pub fn upstream_of(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.reachable(id, |e| (&e.target, &e.source))
    }

    fn reachable<'a>(
        &'a self,
        start: &ResourceId,
        orient: impl Fn(&'a SimpleEdge) -> (&'a ResourceId, &'a ResourceId),
    ) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            for edge in &self.edges {
                let (from, to) = orient(edge);
                if *from == current && to != start && seen.insert(to.clone()) {
                    queue.push_back(to.clone());
                }
            }
        }
        seen
    }

    /// Qualified types of every node.
    pub fn types(&self) -> BTreeSet<String> {
        self.nodes.iter().map(ResourceId::qualified_type).collect()
    }
}

/// Build the subgraph of every type-level path from `edge.source` to
/// `edge.target` of at most [`MAX_PATH_LENGTH`] edges. When `classification`
/// is set and no type within reach declares it, only the endpoints are returned.
pub fn build_template_graph(edge: &SimpleEdge, kb: &KnowledgeBase, classification: &str) -> Result<TemplateGraph> {
    let source_type = edge.source.qualified_type();
    let target_type = edge.target.qualified_type();
    let forward = distances(&source_type, |t| kb.edges_from(t));
    let backward = distances(&target_type, |t| kb.edges_to(t));

    let node_for = |t: &str| -> Result<ResourceId> {
        if t == source_type {
            Ok(edge.source.clone())
        } else if t == target_type {
            Ok(edge.target.clone())
        } else {
            t.parse()
        }
    };
    let on_path = |t: &str| match (forward.get(t), backward.get(t)) {
        (Some(f), Some(b)) => f + b <= MAX_PATH_LENGTH,
        _ => false,
    };

    let mut graph = TemplateGraph::default();
    graph.nodes.insert(edge.source.clone());
    graph.nodes.insert(edge.target.clone());

    let satisfiable = classification.is_empty()
        || forward
            .keys()
            .filter(|t| on_path(t))
            .any(|t| node_for(t).is_ok_and(|id| kb.has_classification(&id, classification)));
    if !satisfiable {
        return Ok(graph);
    }

    for (t, f) in &forward {
        if !on_path(t) {
            continue;
        }
        for next in kb.edges_from(t) {
            let Some(b) = backward.get(next) else { continue };
            if f + 1 + b > MAX_PATH_LENGTH {
                continue;
            }
            let (from, to) = (node_for(t)?, node_for(next)?);
            graph.nodes.insert(from.clone());
            graph.nodes.insert(to.clone());
            graph.edges.insert(SimpleEdge::new(from, to));
        }
    }
    Ok(graph)
}

/// Hop counts from `start` following `next`, bounded by [`MAX_PATH_LENGTH`].
fn distances<'kb>(start: &str, next: impl Fn(&str) -> Vec<&'kb str>) -> HashMap<String, usize> {
    let mut dist: HashMap<String, usize> = HashMap::new();
    dist.insert(start.to_string(), 0);
    let mut queue = VecDeque::from([start.to_string()]);
    while let Some(current) = queue.pop_front() {
        let d = dist[&current];
        if d >= MAX_PATH_LENGTH {
            continue;
        }
        for n in next(&current) {
            if !dist.contains_key(n) {
                dist.insert(n.to_string(), d + 1);
                queue.push_back(n.to_string());
            }
        }
    }
    dist
}

// ============================================================================
// KbPathExpander
// ============================================================================

/// Shortest path over edge templates. Intermediates are named
/// `<source name>-<target name>` and reused when a resource with that id
/// already exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct KbPathExpander;

impl EdgeExpander for KbPathExpander {
    fn expand(&self, solution: &Solution, input: &ExpansionInput) -> Result<ExpansionResult> {
        let kb = solution.knowledge_base();
        let edge = &input.edge;
        let types = shortest_type_path(kb, edge, &input.classification, input.template_graph.as_deref())?;
        debug!(%edge, path = ?types, "expanding edge");

        let mut graph = ResourceGraph::default();
        let mut chain = Vec::with_capacity(types.len());
        let last = types.len() - 1;
        for (i, t) in types.iter().enumerate() {
            let id = if i == 0 {
                edge.source.clone()
            } else if i == last {
                edge.target.clone()
            } else {
                let ty: ResourceId = t.parse()?;
                ResourceId::new(ty.provider, ty.kind, format!("{}-{}", edge.source.name, edge.target.name))
            };
            let resource = solution.resource(&id).unwrap_or_else(|| Resource::new(id.clone()));
            graph.resources.insert(id.clone(), resource);
            chain.push(id);
        }
        for pair in chain.windows(2) {
            graph.edges.insert(SimpleEdge::new(pair[0].clone(), pair[1].clone()));
        }
        Ok(ExpansionResult { graph })
    }
}

fn shortest_type_path(
    kb: &KnowledgeBase,
    edge: &SimpleEdge,
    classification: &str,
    template_graph: Option<&TemplateGraph>,
) -> Result<Vec<String>> {
    let source_type = edge.source.qualified_type();
    let target_type = edge.target.qualified_type();
    let allowed = template_graph.map(TemplateGraph::types);
    let classified = |t: &str| -> bool {
        classification.is_empty() || t.parse::<ResourceId>().is_ok_and(|id| kb.has_classification(&id, classification))
    };

    // state: (type, classification satisfied so far)
    let start = (source_type.clone(), classified(&source_type));
    let mut parents: HashMap<(String, bool), (String, bool)> = HashMap::new();
    let mut seen: HashSet<(String, bool)> = HashSet::new();
    seen.insert(start.clone());
    let mut queue = VecDeque::from([(start, 0usize)]);

    while let Some(((current, satisfied), depth)) = queue.pop_front() {
        if depth >= MAX_PATH_LENGTH {
            continue;
        }
        for next in kb.edges_from(&current) {
            if let Some(allowed) = &allowed {
                if !allowed.contains(next) {
                    continue;
                }
            }
            if next == target_type {
                if satisfied || classified(next) {
                    let mut path = vec![next.to_string(), current.clone()];
                    let mut cursor = (current.clone(), satisfied);
                    while let Some(parent) = parents.get(&cursor) {
                        path.push(parent.0.clone());
                        cursor = parent.clone();
                    }
                    path.reverse();
                    return Ok(path);
                }
                continue;
            }
            if next == source_type {
                continue;
            }
            let state = (next.to_string(), satisfied || classified(next));
            if seen.insert(state.clone()) {
                parents.insert(state.clone(), (current.clone(), satisfied));
                queue.push_back((state, depth + 1));
            }
        }
    }
    let class = if classification.is_empty() { "any" } else { classification };
    Err(Error::NotFound(format!("path from {} satisfying {class}", edge)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{EdgeTemplate, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::new()
            .with_resource(ResourceTemplate::new("aws:lambda_function"))
            .with_resource(ResourceTemplate::new("aws:rds_proxy"))
            .with_resource(ResourceTemplate::new("aws:security_group").with_classification("network"))
            .with_resource(ResourceTemplate::new("aws:rds_instance"))
            .with_edge(EdgeTemplate::new(id("aws:lambda_function"), id("aws:rds_instance")))
            .with_edge(EdgeTemplate::new(id("aws:lambda_function"), id("aws:rds_proxy")))
            .with_edge(EdgeTemplate::new(id("aws:rds_proxy"), id("aws:rds_instance")))
            .with_edge(EdgeTemplate::new(id("aws:lambda_function"), id("aws:security_group")))
            .with_edge(EdgeTemplate::new(id("aws:security_group"), id("aws:rds_instance")))
    }

    fn solution() -> Solution {
        let sol = Solution::new(Arc::new(kb()));
        sol.add_resource(Resource::new(id("aws:lambda_function:api"))).unwrap();
        sol.add_resource(Resource::new(id("aws:rds_instance:db"))).unwrap();
        sol
    }

    fn input(classification: &str) -> ExpansionInput {
        ExpansionInput {
            edge: SimpleEdge::new(id("aws:lambda_function:api"), id("aws:rds_instance:db")),
            classification: classification.into(),
            template_graph: None,
        }
    }

    #[test]
    fn test_direct_expansion() {
        let result = KbPathExpander.expand(&solution(), &input("")).unwrap();
        assert!(result.graph.is_direct());
    }

    #[test]
    fn test_classified_expansion_adds_intermediate() {
        let result = KbPathExpander.expand(&solution(), &input("network")).unwrap();
        let sg = id("aws:security_group:api-db");
        assert_eq!(result.graph.resources.len(), 3);
        assert!(result.graph.resources.contains_key(&sg));
        assert!(result.graph.edges.contains(&SimpleEdge::new(id("aws:lambda_function:api"), sg.clone())));
        assert!(result.graph.edges.contains(&SimpleEdge::new(sg, id("aws:rds_instance:db"))));
    }

    #[test]
    fn test_no_path() {
        assert!(KbPathExpander.expand(&solution(), &input("storage")).is_err());
    }

    #[test]
    fn test_template_graph() {
        let edge = SimpleEdge::new(id("aws:lambda_function:api"), id("aws:rds_instance:db"));
        let graph = build_template_graph(&edge, &kb(), "").unwrap();
        assert!(graph.nodes.contains(&id("aws:rds_proxy")));
        assert!(graph.nodes.contains(&id("aws:security_group")));
        let down = graph.downstream_of(&edge.source);
        assert!(down.contains(&id("aws:rds_proxy")));
        assert!(down.contains(&edge.target));
        assert!(graph.upstream_of(&edge.target).contains(&edge.source));
    }
}
