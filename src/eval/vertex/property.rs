use std::collections::BTreeMap;

use tracing::debug;

use crate::eval::capture::DependencyCapture;
use crate::eval::{Evaluator, GraphChanges, Key, ReadyPriority, Vertex};
use crate::knowledge::{OperationalRule, PropertyTemplate};
use crate::model::{PropertyRef, Resource, ResourceId, SimpleEdge};
use crate::rules;
use crate::solution::{ConfigureAction, ConstraintOperator, DynamicContext, ResourceConstraint};
use crate::template::DynamicData;
use crate::{Error, Result, ResultExt};

/// One property of one resource.
///
/// `edge_rules` holds the configuration rules adjacent edges route here;
/// they run as part of this vertex so the property is only written once
/// everything that feeds it is known. Rules whose value reads the property
/// itself move to `transform_rules` and run last, replacing the value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyVertex {
    pub reference: PropertyRef,
    /// `None` for placeholders created before the resource existed.
    pub template: Option<PropertyTemplate>,
    pub edge_rules: BTreeMap<SimpleEdge, Vec<OperationalRule>>,
    pub transform_rules: BTreeMap<SimpleEdge, Vec<OperationalRule>>,
}

impl PropertyVertex {
    pub fn new(reference: PropertyRef, template: Option<PropertyTemplate>) -> Self {
        Self { reference, template, edge_rules: BTreeMap::new(), transform_rules: BTreeMap::new() }
    }

    pub fn key(&self) -> Key {
        Key::Property(self.reference.clone())
    }

    pub fn add_edge_rule(&mut self, edge: SimpleEdge, rule: OperationalRule) {
        if self.transform_rules.get(&edge).is_some_and(|t| t.contains(&rule)) {
            return;
        }
        let rules = self.edge_rules.entry(edge).or_default();
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    }

    /// Register `rule` as a transform, taking it out of the plain edge rules.
    pub fn add_transform_rule(&mut self, edge: SimpleEdge, rule: OperationalRule) {
        if let Some(rules) = self.edge_rules.get_mut(&edge) {
            rules.retain(|r| *r != rule);
            if rules.is_empty() {
                self.edge_rules.remove(&edge);
            }
        }
        let rules = self.transform_rules.entry(edge).or_default();
        if !rules.contains(&rule) {
            rules.push(rule);
        }
    }

    pub fn update_from(&mut self, other: &PropertyVertex) {
        if self.reference != other.reference {
            panic!("cannot merge property {} into {}", other.reference, self.reference);
        }
        if self.template.is_none() {
            self.template = other.template.clone();
        }
        for (edge, rules) in &other.transform_rules {
            for rule in rules {
                self.add_transform_rule(edge.clone(), rule.clone());
            }
        }
        for (edge, rules) in &other.edge_rules {
            for rule in rules {
                self.add_edge_rule(edge.clone(), rule.clone());
            }
        }
    }

    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> PropertyVertex {
        let mut reference = self.reference.clone();
        if reference.resource == *old {
            reference.resource = new.clone();
        }
        let mut renamed = PropertyVertex::new(reference, self.template.clone());
        for (edge, rules) in &self.transform_rules {
            for rule in rules {
                renamed.add_transform_rule(edge.with_renamed(old, new), rule.clone());
            }
        }
        for (edge, rules) in &self.edge_rules {
            for rule in rules {
                renamed.add_edge_rule(edge.with_renamed(old, new), rule.clone());
            }
        }
        renamed
    }

    fn data(&self, eval: &Evaluator) -> DynamicData {
        DynamicData::for_resource(self.reference.resource.clone())
            .with_path(self.reference.property.clone())
            .with_tag(eval.solution().global_tag())
    }

    /// Edge rules are skipped when a user constraint pins a scalar value.
    fn should_eval_edges(&self, eval: &Evaluator) -> bool {
        if let Some(t) = &self.template {
            if t.kind.is_collection() || t.kind.is_map() {
                return true;
            }
        }
        !eval
            .solution()
            .constraints_for(&self.reference)
            .iter()
            .any(|c| c.operator == ConstraintOperator::Equals)
    }

    pub fn dependencies(&self, eval: &Evaluator) -> Result<GraphChanges> {
        let mut changes = GraphChanges::default();
        let Some(template) = &self.template else {
            return Ok(changes);
        };
        let key = self.key();
        let data = self.data(eval);

        let mut capture = DependencyCapture::new(eval, key.clone());
        if let Some(default) = &template.default_value {
            capture.execute_value(default, &data);
        }
        if let Some(rule) = &template.operational_rule {
            capture.execute_rule(&data, rule);
        }
        changes.merge(capture.into_changes());

        if self.should_eval_edges(eval) {
            let mut classified = self.clone();
            for (edge, rules) in self.edge_rules.iter().chain(&self.transform_rules) {
                let edge_data = DynamicData::for_edge(edge.clone()).with_tag(data.tag.clone());
                for rule in rules {
                    let mut capture = DependencyCapture::new(eval, key.clone());
                    capture.execute_rule(&edge_data, rule);
                    if capture.self_references() {
                        classified.add_transform_rule(edge.clone(), rule.clone());
                    }
                    changes.merge(capture.into_changes());
                }
            }
            if classified.transform_rules != self.transform_rules {
                debug!(reference = %self.reference, "edge rules read the property they configure");
                changes.add_vertex(Vertex::Property(classified));
            }
        }

        if !template.namespace {
            let namespace = eval
                .solution()
                .knowledge_base()
                .resource_template(&self.reference.resource)
                .ok()
                .and_then(|t| t.namespace_property())
                .map(|ns| ns.path.clone());
            if let Some(path) = namespace {
                changes.add_edge(key, Key::property(self.reference.resource.clone(), path));
            }
        }
        Ok(changes)
    }

    pub fn ready(&self, eval: &Evaluator) -> ReadyPriority {
        let Some(template) = &self.template else {
            return ReadyPriority::NotReadyMax;
        };
        if template.operational_rule.is_some() {
            return ReadyPriority::ReadyNow;
        }
        if template.is_unbounded_container() {
            return ReadyPriority::NotReadyHigh;
        }
        if let Some(default) = &template.default_value {
            let mut ctx = DynamicContext::new(eval.solution());
            match ctx.resolve_value(default, &self.data(eval)) {
                Ok(v) if !v.is_null() => return ReadyPriority::ReadyNow,
                Ok(_) => {}
                Err(_) => return ReadyPriority::NotReadyMid,
            }
        }
        if !self.edge_rules.is_empty() || !self.transform_rules.is_empty() {
            return ReadyPriority::ReadyNow;
        }
        ReadyPriority::NotReadyMid
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<()> {
        let reference = &self.reference;
        let template = match &self.template {
            Some(t) => t.clone(),
            None => match eval.solution().knowledge_base().property_template(reference) {
                Some(t) => t.clone(),
                None => {
                    debug!(%reference, "no template, nothing to evaluate");
                    return Ok(());
                }
            },
        };
        let res = eval
            .solution()
            .get_resource(&reference.resource)
            .context(|| format!("could not get resource to evaluate {reference}"))?;
        let data = self.data(eval);

        let constraints: Vec<ResourceConstraint> =
            eval.solution().constraints_for(reference).into_iter().cloned().collect();
        let pinned = self.apply_constraints(eval, &template, &res, &constraints, &data)?;

        // Imported resources skip defaults and edge rules, never their own rule.
        if let Some(rule) = &template.operational_rule {
            rules::handle_property_rule(eval, reference, &template, rule, &data)
                .context(|| format!("could not run operational rule for {reference}"))?;
        }

        if self.should_eval_edges(eval) && !res.imported {
            let mut errs = Vec::new();
            let passes = [(&self.edge_rules, ConfigureAction::Add), (&self.transform_rules, ConfigureAction::Set)];
            for (edge_rules, action) in passes {
                for (edge, rules) in edge_rules {
                    let edge_data = DynamicData::for_edge(edge.clone()).with_tag(data.tag.clone());
                    for rule in rules {
                        if let Err(err) = rules::handle_operational_rule(eval, rule, &edge_data, action) {
                            errs.push(err.context(format!("could not apply rule of edge {edge}")));
                        }
                    }
                }
            }
            Error::join(errs)?;
        }

        let mut id = reference.resource.clone();
        if template.namespace {
            let namespaced = eval.solution().namespaced_id(&id)?;
            if namespaced != id {
                eval.update_id(&id, &namespaced)?;
                id = namespaced;
            }
        }

        let current = PropertyRef::new(id.clone(), reference.property.clone());
        if template.kind.is_collection() || template.kind.is_map() {
            let res = eval.solution().get_resource(&id)?;
            if !res.get_property(&current.property)?.is_null() {
                self.resubmit(eval, res, &current)?;
            }
        }

        if template.required && eval.solution().property(&current)?.is_null() {
            return Err(Error::Unresolved { reference: current.to_string() });
        }
        Ok(())
    }

    /// Constraints first: `equals` pins the value outright; otherwise the
    /// default fills an empty slot and the remaining operators apply on
    /// top. Returns whether the value is pinned.
    fn apply_constraints(
        &self,
        eval: &Evaluator,
        template: &PropertyTemplate,
        res: &Resource,
        constraints: &[ResourceConstraint],
        data: &DynamicData,
    ) -> Result<bool> {
        let solution = eval.solution();
        let reference = &self.reference;
        let mut pinned = false;
        for c in constraints.iter().filter(|c| c.operator == ConstraintOperator::Equals) {
            solution.configure(&reference.resource, &reference.property, c.value.clone(), ConfigureAction::Set)?;
            pinned = true;
        }

        if !pinned && !res.imported && res.get_property(&reference.property)?.is_null() {
            if let Some(default) = &template.default_value {
                let value = DynamicContext::new(solution)
                    .resolve_value(default, data)
                    .context(|| format!("could not resolve default value of {reference}"))?;
                if !value.is_null() {
                    solution.configure(&reference.resource, &reference.property, value, ConfigureAction::Set)?;
                }
            }
        }

        for c in constraints.iter().filter(|c| c.operator != ConstraintOperator::Equals) {
            solution.configure(&reference.resource, &reference.property, c.value.clone(), c.operator.action())?;
        }
        Ok(pinned)
    }

    /// A container changed: drop element vertices whose element is gone and
    /// re-submit the resource so new elements get their own vertices.
    fn resubmit(&self, eval: &Evaluator, res: Resource, container: &PropertyRef) -> Result<()> {
        let prefix = format!("{}[", container.property);
        for key in eval.graph().keys() {
            let Key::Property(r) = &key else { continue };
            if r.resource == res.id && r.property.starts_with(&prefix) && !res.path_exists(&r.property) {
                debug!(%key, "removing stale element property");
                eval.remove_vertex(&key)?;
            }
        }
        eval.add_resources(vec![res])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::knowledge::{ConfigurationRule, KnowledgeBase, PropertyType, ResourceTemplate};
    use crate::model::Value;
    use crate::solution::Solution;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn evaluator(kb: KnowledgeBase) -> Evaluator {
        Evaluator::new(Solution::new(Arc::new(kb)))
    }

    fn vertex(eval: &Evaluator, reference: PropertyRef) -> PropertyVertex {
        let template = eval.solution().knowledge_base().property_template(&reference).cloned();
        PropertyVertex::new(reference, template)
    }

    #[test]
    fn test_ready_tiers() {
        let kb = KnowledgeBase::new().with_resource(
            ResourceTemplate::new("aws:subnet")
                .with_property(PropertyTemplate::new("Cidr", PropertyType::String).with_default("10.0.0.0/24"))
                .with_property(PropertyTemplate::new("Name", PropertyType::String))
                .with_property(PropertyTemplate::new("Tags", "list(string)".parse().unwrap()))
                .with_property(PropertyTemplate::new("Vpc", "resource(aws:vpc)".parse().unwrap()).with_rule(OperationalRule::default())),
        );
        let eval = evaluator(kb);
        eval.solution().add_resource(Resource::new(id("aws:subnet:a"))).unwrap();
        let tier = |p: &str| vertex(&eval, PropertyRef::new(id("aws:subnet:a"), p)).ready(&eval);
        assert_eq!(tier("Cidr"), ReadyPriority::ReadyNow);
        assert_eq!(tier("Name"), ReadyPriority::NotReadyMid);
        assert_eq!(tier("Tags"), ReadyPriority::NotReadyHigh);
        assert_eq!(tier("Vpc"), ReadyPriority::ReadyNow);
        assert_eq!(tier("Unknown"), ReadyPriority::NotReadyMax);
    }

    #[test]
    fn test_edge_rule_makes_ready() {
        let kb = KnowledgeBase::new()
            .with_resource(ResourceTemplate::new("aws:subnet").with_property(PropertyTemplate::new("Name", PropertyType::String)));
        let eval = evaluator(kb);
        let mut v = vertex(&eval, PropertyRef::new(id("aws:subnet:a"), "Name"));
        v.add_edge_rule(SimpleEdge::new(id("aws:vpc:v"), id("aws:subnet:a")), OperationalRule::default());
        assert_eq!(v.ready(&eval), ReadyPriority::ReadyNow);
    }

    #[test]
    fn test_update_from_merges_rules_and_template() {
        let reference = PropertyRef::new(id("aws:subnet:a"), "Name");
        let edge = SimpleEdge::new(id("aws:vpc:v"), id("aws:subnet:a"));
        let mut placeholder = PropertyVertex::new(reference.clone(), None);
        let mut full = PropertyVertex::new(reference, Some(PropertyTemplate::new("Name", PropertyType::String)));
        full.add_edge_rule(edge.clone(), OperationalRule::default().when("true"));
        placeholder.update_from(&full);
        assert!(placeholder.template.is_some());
        assert_eq!(placeholder.edge_rules[&edge].len(), 1);
    }

    #[test]
    #[should_panic(expected = "cannot merge property")]
    fn test_update_from_mismatch_panics() {
        let mut a = PropertyVertex::new(PropertyRef::new(id("aws:subnet:a"), "Name"), None);
        let b = PropertyVertex::new(PropertyRef::new(id("aws:subnet:b"), "Name"), None);
        a.update_from(&b);
    }

    #[test]
    fn test_renamed_rewrites_edge_rules() {
        let old = id("aws:subnet:a");
        let new = id("aws:subnet:vpc:a");
        let mut v = PropertyVertex::new(PropertyRef::new(old.clone(), "Name"), None);
        v.add_edge_rule(SimpleEdge::new(id("aws:vpc:v"), old.clone()), OperationalRule::default());
        let r = v.renamed(&old, &new);
        assert_eq!(r.reference.resource, new);
        assert!(r.edge_rules.keys().all(|e| !e.touches(&old)));
    }

    #[test]
    fn test_self_referencing_edge_rule_runs_last_as_transform() {
        let kb = KnowledgeBase::new()
            .with_resource(ResourceTemplate::new("aws:lambda_function"))
            .with_resource(ResourceTemplate::new("aws:rds_instance").with_property(PropertyTemplate::new("Name", PropertyType::String)));
        let mut eval = evaluator(kb);
        eval.solution().add_resource(Resource::new(id("aws:lambda_function:api"))).unwrap();
        eval.solution().add_resource(Resource::new(id("aws:rds_instance:db"))).unwrap();
        let edge = SimpleEdge::new(id("aws:lambda_function:api"), id("aws:rds_instance:db"));
        let suffix = OperationalRule::default().with_config(ConfigurationRule::new(
            "{{ .Target }}",
            "Name",
            r#"{{ fieldValue "Name" .Target }}-prod"#,
        ));
        let base = OperationalRule::default().with_config(ConfigurationRule::new("{{ .Target }}", "Name", "db"));

        let mut v = vertex(&eval, PropertyRef::new(id("aws:rds_instance:db"), "Name"));
        v.add_edge_rule(edge.clone(), suffix.clone());
        v.add_edge_rule(edge.clone(), base.clone());
        let changes = v.dependencies(&eval).unwrap();
        let Some(Vertex::Property(classified)) = changes.nodes.get(&v.key()) else { panic!("rules not reclassified") };
        v.update_from(classified);
        assert_eq!(v.edge_rules[&edge], vec![base.clone()]);
        assert_eq!(v.transform_rules[&edge], vec![suffix.clone()]);

        // Routing the same rule again keeps it a transform.
        v.add_edge_rule(edge.clone(), suffix);
        assert_eq!(v.edge_rules[&edge], vec![base]);

        v.evaluate(&mut eval).unwrap();
        let name = eval.solution().property(&PropertyRef::new(id("aws:rds_instance:db"), "Name")).unwrap();
        assert_eq!(name, Value::from("db-prod"));
    }

    #[test]
    fn test_renamed_keeps_transform_rules() {
        let old = id("aws:subnet:a");
        let new = id("aws:subnet:vpc:a");
        let mut v = PropertyVertex::new(PropertyRef::new(old.clone(), "Name"), None);
        v.add_transform_rule(SimpleEdge::new(id("aws:vpc:v"), old.clone()), OperationalRule::default());
        let r = v.renamed(&old, &new);
        assert!(r.edge_rules.is_empty());
        assert_eq!(r.transform_rules.keys().cloned().collect::<Vec<_>>(), vec![SimpleEdge::new(id("aws:vpc:v"), new)]);
    }

    #[test]
    fn test_dependencies_include_namespace() {
        let kb = KnowledgeBase::new().with_resource(
            ResourceTemplate::new("aws:subnet")
                .with_property(PropertyTemplate::new("Vpc", "resource(aws:vpc)".parse().unwrap()).namespace())
                .with_property(PropertyTemplate::new("Name", PropertyType::String).with_default("{{ .Self }}")),
        );
        let eval = evaluator(kb);
        eval.solution().add_resource(Resource::new(id("aws:subnet:a"))).unwrap();
        let name = vertex(&eval, PropertyRef::new(id("aws:subnet:a"), "Name"));
        let changes = name.dependencies(&eval).unwrap();
        assert!(changes.edges[&name.key()].contains(&Key::property(id("aws:subnet:a"), "Vpc")));

        let vpc = vertex(&eval, PropertyRef::new(id("aws:subnet:a"), "Vpc"));
        assert!(vpc.dependencies(&eval).unwrap().is_empty());
    }
}
