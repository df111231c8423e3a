use crate::eval::capture::DependencyCapture;
use crate::eval::{Evaluator, GraphChanges, Key};
use crate::knowledge::{ConfigurationRule, OperationalRule};
use crate::model::{ResourceId, SimpleEdge};
use crate::rules;
use crate::solution::{ConfigureAction, DynamicContext};
use crate::template::DynamicData;
use crate::{Error, Result, ResultExt};

use super::{PropertyVertex, Vertex};

/// Whole-edge operational rules of one live edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeVertex {
    pub edge: SimpleEdge,
    pub rules: Vec<OperationalRule>,
}

impl EdgeVertex {
    pub fn new(edge: SimpleEdge, rules: Vec<OperationalRule>) -> Self {
        Self { edge, rules }
    }

    pub fn key(&self) -> Key {
        Key::Edge(self.edge.clone())
    }

    pub fn update_from(&mut self, other: &EdgeVertex) {
        if self.edge != other.edge {
            panic!("cannot merge edge {} into {}", other.edge, self.edge);
        }
        for rule in &other.rules {
            if !self.rules.contains(rule) {
                self.rules.push(rule.clone());
            }
        }
    }

    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> EdgeVertex {
        EdgeVertex::new(self.edge.with_renamed(old, new), self.rules.clone())
    }

    fn data(&self, eval: &Evaluator) -> DynamicData {
        DynamicData::for_edge(self.edge.clone()).with_tag(eval.solution().global_tag())
    }

    pub fn dependencies(&self, eval: &Evaluator) -> Result<GraphChanges> {
        let key = self.key();
        let data = self.data(eval);
        let mut capture = DependencyCapture::new(eval, key.clone());
        for rule in &self.rules {
            capture.execute_rule(&data, rule);
        }
        let mut changes = capture.into_changes();

        // A property that is already evaluated cannot wait for this edge.
        changes.edges.retain(|src, targets| {
            if eval.is_evaluated(src) {
                targets.remove(&key);
            }
            !targets.is_empty()
        });
        Ok(changes)
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<()> {
        let data = self.data(eval);
        let mut errs = Vec::new();
        for rule in &self.rules {
            match DynamicContext::new(eval.solution()).evaluate_condition(&rule.if_condition, &data) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    errs.push(err.context(format!("could not evaluate condition of {}", self.edge)));
                    continue;
                }
            }
            for step in &rule.steps {
                if let Err(err) = rules::handle_step(eval, step, &data) {
                    errs.push(err);
                }
            }
            for cfg in &rule.configuration_rules {
                if let Err(err) = self.route_configuration(eval, rule, cfg, &data) {
                    errs.push(err);
                }
            }
        }
        Error::join(errs).context(|| format!("could not apply rules of edge {}", self.edge))
    }

    /// Hand one configuration rule to the property vertex it writes.
    fn route_configuration(
        &self,
        eval: &Evaluator,
        rule: &OperationalRule,
        cfg: &ConfigurationRule,
        data: &DynamicData,
    ) -> Result<()> {
        let mut ctx = DynamicContext::new(eval.solution());
        let reference = rules::configuration_target(&mut ctx, cfg, data)?;
        let key = Key::Property(reference.clone());
        let edge_rule = OperationalRule {
            if_condition: rule.if_condition.clone(),
            steps: Vec::new(),
            configuration_rules: vec![cfg.clone()],
        };

        if eval.unevaluated().contains(&key) {
            eval.graph().update_vertex(&key, |v| {
                if let Vertex::Property(p) = v {
                    p.add_edge_rule(self.edge.clone(), edge_rule);
                }
            })?;
            return Ok(());
        }

        if !eval.graph().contains(&key) {
            let template = eval.solution().knowledge_base().property_template(&reference).cloned();
            let mut vertex = PropertyVertex::new(reference, template);
            vertex.add_edge_rule(self.edge.clone(), edge_rule);
            let mut changes = GraphChanges::default();
            changes.add_vertex_and_deps(eval, Vertex::Property(vertex))?;
            return eval.enqueue(changes);
        }

        let consumers: Vec<String> = eval
            .graph()
            .predecessors(&key)
            .into_iter()
            .filter(|k| eval.is_evaluated(k))
            .map(|k| k.to_string())
            .collect();
        if !consumers.is_empty() {
            return Err(Error::OperationalRule(format!(
                "cannot add rules to evaluated node {key}: already used by {}",
                consumers.join(", ")
            )));
        }
        rules::handle_operational_rule(eval, &edge_rule, data, ConfigureAction::Add)?;

        let container = eval
            .solution()
            .knowledge_base()
            .property_template(&reference)
            .is_some_and(|t| t.kind.is_collection() || t.kind.is_map());
        if container {
            let res = eval.solution().get_resource(&reference.resource)?;
            eval.add_resources(vec![res])?;
        }
        Ok(())
    }
}
