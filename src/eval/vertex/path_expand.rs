use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use crate::eval::{Evaluator, GraphChanges, Key};
use crate::knowledge::{Direction, PathSatisfaction};
use crate::model::{PropertyRef, ResourceId, SimpleEdge, Value};
use crate::path::{ExpansionInput, ExpansionResult, TemplateGraph};
use crate::rules;
use crate::solution::{ConfigureAction, DynamicContext, Solution};
use crate::template::DynamicData;
use crate::{Error, Result, ResultExt};

/// An abstract edge waiting to be realized as a chain of resources that
/// meets one path-satisfaction requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpandVertex {
    pub edge: SimpleEdge,
    pub satisfaction: PathSatisfaction,
    /// Every expansion shape the edge could take. Only built when the
    /// satisfaction has no field traversal.
    pub template_graph: Option<Arc<TemplateGraph>>,
}

impl PathExpandVertex {
    pub fn new(edge: SimpleEdge, satisfaction: PathSatisfaction, template_graph: Option<Arc<TemplateGraph>>) -> Self {
        Self { edge, satisfaction, template_graph }
    }

    pub fn key(&self) -> Key {
        Key::PathExpand { edge: self.edge.clone(), satisfaction: self.satisfaction.clone() }
    }

    pub fn update_from(&mut self, other: &PathExpandVertex) {
        if self.edge != other.edge || self.satisfaction != other.satisfaction {
            panic!("cannot merge path expansion {} into {}", other.key(), self.key());
        }
        if self.template_graph.is_none() {
            self.template_graph = other.template_graph.clone();
        }
    }

    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> PathExpandVertex {
        let rename = |id: &ResourceId| if id == old { new.clone() } else { id.clone() };
        let template_graph = self.template_graph.as_ref().map(|tg| {
            Arc::new(TemplateGraph {
                nodes: tg.nodes.iter().map(rename).collect(),
                edges: tg.edges.iter().map(|e| e.with_renamed(old, new)).collect(),
            })
        });
        PathExpandVertex::new(self.edge.with_renamed(old, new), self.satisfaction.clone(), template_graph)
    }

    /// The endpoint a field traversal starts from.
    fn traversal_start(&self) -> &ResourceId {
        if self.satisfaction.as_target { &self.edge.target } else { &self.edge.source }
    }

    pub fn dependencies(&self, eval: &Evaluator) -> Result<GraphChanges> {
        let key = self.key();
        let mut changes = GraphChanges::default();

        if let (_, Some(traversal)) = self.satisfaction.route() {
            walk_traversal(eval.solution(), self.traversal_start(), traversal, |hop| {
                changes.add_edge(key.clone(), Key::Property(hop.clone()));
            });
        }

        if let Some(tg) = &self.template_graph {
            self.add_deps_from_props(eval, &mut changes, &self.edge.source, &tg.downstream_of(&self.edge.source));
            self.add_deps_from_props(eval, &mut changes, &self.edge.target, &tg.upstream_of(&self.edge.target));
            self.add_deps_from_edges(eval, &mut changes, tg);
        }
        Ok(changes)
    }

    /// Expansion waits for endpoint properties whose operational rule could
    /// create or pick one of the intermediates itself.
    fn add_deps_from_props(
        &self,
        eval: &Evaluator,
        changes: &mut GraphChanges,
        endpoint: &ResourceId,
        reachable: &BTreeSet<ResourceId>,
    ) {
        let solution = eval.solution();
        let Ok(template) = solution.knowledge_base().resource_template(endpoint) else { return };
        let Some(res) = solution.resource(endpoint) else { return };
        let intermediates: Vec<&ResourceId> =
            reachable.iter().filter(|n| **n != self.edge.source && **n != self.edge.target).collect();

        for (path, prop) in template.loop_properties(&res) {
            let Some(rule) = &prop.operational_rule else { continue };
            if !intermediates.iter().any(|n| prop.kind.accepts_resource(n)) {
                continue;
            }
            let data = DynamicData::for_resource(endpoint.clone())
                .with_path(path.clone())
                .with_tag(solution.global_tag());
            if !DynamicContext::new(solution).evaluate_condition(&rule.if_condition, &data).unwrap_or(false) {
                continue;
            }
            changes.add_edge(self.key(), Key::property(endpoint.clone(), path));
        }
    }

    /// Endpoint properties configured by edges of a candidate expansion
    /// cannot be evaluated until the expansion has happened.
    fn add_deps_from_edges(&self, eval: &Evaluator, changes: &mut GraphChanges, tg: &TemplateGraph) {
        let key = self.key();
        let solution = eval.solution();
        for edge in &tg.edges {
            let Some(template) = solution.knowledge_base().edge_template(&edge.source, &edge.target) else { continue };
            let data = DynamicData::for_edge(edge.clone()).with_tag(solution.global_tag());
            for cfg in template.operational_rules.iter().flat_map(|r| &r.configuration_rules) {
                let mut ctx = DynamicContext::new(solution);
                let Ok(reference) = rules::configuration_target(&mut ctx, cfg, &data) else { continue };
                if !self.edge.touches(&reference.resource) {
                    continue;
                }
                let pkey = Key::Property(reference);
                if !eval.unevaluated().contains(&pkey) {
                    continue;
                }
                if changes.edges.get(&key).is_some_and(|deps| deps.contains(&pkey)) {
                    continue;
                }
                changes.add_edge(pkey, key.clone());
            }
        }
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<()> {
        let _span = debug_span!("expand", edge = %self.edge, satisfaction = %self.satisfaction).entered();
        let solution = eval.solution();
        let source = solution.get_resource(&self.edge.source)?;
        let target = solution.get_resource(&self.edge.target)?;
        if source.imported && target.imported {
            if !solution.has_edge(&self.edge) {
                solution.add_edge(&self.edge)?;
            }
            return Ok(());
        }

        let mut errs = Vec::new();
        for edge in self.concrete_edges(solution) {
            if let Err(err) = self.expand(eval, &edge) {
                errs.push(err.context(format!("could not expand {edge}")));
            }
        }
        Error::join(errs)
    }

    /// Source/target pairs to expand; a field traversal can fan out to
    /// several ids on its side.
    fn concrete_edges(&self, solution: &Solution) -> Vec<SimpleEdge> {
        let mut sources = vec![self.edge.source.clone()];
        let mut targets = vec![self.edge.target.clone()];
        if let (_, Some(traversal)) = self.satisfaction.route() {
            let resolved = walk_traversal(solution, self.traversal_start(), traversal, |_| {});
            if resolved.is_empty() {
                warn!(edge = %self.edge, traversal, "field traversal resolved to nothing, skipping expansion");
                return Vec::new();
            }
            if self.satisfaction.as_target {
                targets = resolved;
            } else {
                sources = resolved;
            }
        }
        let mut edges = Vec::new();
        for s in &sources {
            for t in &targets {
                if s != t {
                    edges.push(SimpleEdge::new(s.clone(), t.clone()));
                }
            }
        }
        edges
    }

    fn expand(&self, eval: &Evaluator, edge: &SimpleEdge) -> Result<()> {
        let (classification, _) = self.satisfaction.route();
        let input = ExpansionInput {
            edge: edge.clone(),
            classification: classification.to_string(),
            template_graph: self.template_graph.clone(),
        };
        let result = eval.expander().expand(eval.solution(), &input)?;
        let solution = eval.solution();

        if result.graph.is_direct() {
            debug!(%edge, "direct expansion");
            if !solution.has_edge(edge) {
                solution.add_edge(edge)?;
            }
            return eval.make_edges_operational(vec![edge.clone()]);
        }

        debug!(%edge, resources = result.graph.resources.len(), "expanded into a chain");
        if solution.has_edge(edge) {
            solution.remove_edge(edge)?;
        }
        for res in result.graph.resources.values() {
            if !solution.has_resource(&res.id) {
                solution.add_resource(res.clone())?;
            }
        }
        for e in &result.graph.edges {
            if !solution.has_edge(e) {
                solution.add_edge(e)?;
            }
        }
        handle_result_properties(solution, &result).context(|| format!("could not configure expansion of {edge}"))?;

        let resources = result
            .graph
            .resources
            .keys()
            .map(|id| solution.get_resource(id))
            .collect::<Result<Vec<_>>>()?;
        eval.add_resources(resources)?;
        eval.make_edges_operational(result.graph.edges.iter().cloned().collect())
    }
}

/// Follow `a#b#c` field hops from `start`; each hop reads the named field on
/// every id reached so far. Returns the ids reached by the last hop.
fn walk_traversal(
    solution: &Solution,
    start: &ResourceId,
    traversal: &str,
    mut on_hop: impl FnMut(&PropertyRef),
) -> Vec<ResourceId> {
    let mut current = vec![start.clone()];
    for field in traversal.split('#').filter(|f| !f.is_empty()) {
        let mut next = Vec::new();
        for id in &current {
            let hop = PropertyRef::new(id.clone(), field);
            on_hop(&hop);
            if let Ok(value) = solution.property(&hop) {
                for found in value.resource_ids() {
                    if !next.contains(&found) {
                        next.push(found);
                    }
                }
            }
        }
        current = next;
    }
    current
}

/// Pre-fill properties whose operational-rule steps would otherwise create
/// a resource the expansion just placed next to them.
fn handle_result_properties(solution: &Solution, result: &ExpansionResult) -> Result<()> {
    let kb = solution.knowledge_base();
    for id in result.graph.resources.keys() {
        let Ok(template) = kb.resource_template(id) else { continue };
        let res = solution.get_resource(id)?;
        for (path, prop) in template.loop_properties(&res) {
            let Some(rule) = &prop.operational_rule else { continue };
            let data = DynamicData::for_resource(id.clone()).with_path(path.clone()).with_tag(solution.global_tag());
            for step in &rule.steps {
                let neighbours: Vec<&ResourceId> = result
                    .graph
                    .edges
                    .iter()
                    .filter_map(|e| match step.direction {
                        Direction::Downstream if e.source == *id => Some(&e.target),
                        Direction::Upstream if e.target == *id => Some(&e.source),
                        _ => None,
                    })
                    .collect();
                for neighbour in neighbours {
                    let mut matched = false;
                    for selector in &step.resources {
                        if rules::selector_matches(solution, selector, neighbour, &data)? {
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        continue;
                    }
                    let (value, action) = if prop.kind.is_collection() {
                        (Value::List(vec![Value::ResourceId(neighbour.clone())]), ConfigureAction::Add)
                    } else {
                        (Value::ResourceId(neighbour.clone()), ConfigureAction::Set)
                    };
                    solution.configure(id, &path, value, action)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeBase, PropertyTemplate, ResourceTemplate};
    use crate::model::Resource;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_traversal_registers_hops() {
        let kb = KnowledgeBase::new()
            .with_resource(ResourceTemplate::new("aws:lambda_function").with_property(PropertyTemplate::new("Subnets", "list(resource(aws:subnet))".parse().unwrap())));
        let eval = Evaluator::new(Solution::new(Arc::new(kb)));
        eval.solution().add_resource(Resource::new(id("aws:lambda_function:api"))).unwrap();
        eval.solution().add_resource(Resource::new(id("aws:rds_instance:db"))).unwrap();
        let v = PathExpandVertex::new(
            SimpleEdge::new(id("aws:lambda_function:api"), id("aws:rds_instance:db")),
            PathSatisfaction::new("network#Subnets", false),
            None,
        );
        let changes = v.dependencies(&eval).unwrap();
        assert_eq!(changes.edges[&v.key()], BTreeSet::from([Key::property(id("aws:lambda_function:api"), "Subnets")]));
        assert!(v.concrete_edges(eval.solution()).is_empty());

        eval.solution()
            .configure(
                &id("aws:lambda_function:api"),
                "Subnets",
                Value::List(vec![id("aws:subnet:a").into(), id("aws:subnet:b").into()]),
                ConfigureAction::Set,
            )
            .unwrap();
        assert_eq!(v.concrete_edges(eval.solution()), vec![
            SimpleEdge::new(id("aws:subnet:a"), id("aws:rds_instance:db")),
            SimpleEdge::new(id("aws:subnet:b"), id("aws:rds_instance:db")),
        ]);
    }

    #[test]
    fn test_renamed_rewrites_template_graph() {
        let old = id("aws:subnet:a");
        let new = id("aws:subnet:net:a");
        let tg = TemplateGraph {
            nodes: BTreeSet::from([old.clone(), id("aws:vpc:v")]),
            edges: BTreeSet::from([SimpleEdge::new(old.clone(), id("aws:vpc:v"))]),
        };
        let v = PathExpandVertex::new(SimpleEdge::new(old.clone(), id("aws:vpc:v")), PathSatisfaction::default(), Some(Arc::new(tg)));
        let r = v.renamed(&old, &new);
        let tg = r.template_graph.unwrap();
        assert!(tg.nodes.contains(&new) && !tg.nodes.contains(&old));
        assert!(tg.edges.iter().all(|e| !e.touches(&old)));
        assert_eq!(r.edge.source, new);
    }
}
