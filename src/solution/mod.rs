//! # Solution
//!
//! The live resource graph the evaluator configures, plus the knowledge base
//! and user constraints it is configured against.
//!
//! Methods here are the *raw* view: they change the graph and nothing else.
//! The operational view that also registers new elements for evaluation
//! lives on [`crate::Evaluator`].

pub mod constraints;
pub mod dynamic;

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashSet;
use tracing::info;

use crate::knowledge::KnowledgeBase;
use crate::model::{PropertyRef, Resource, ResourceId, SimpleEdge, Value};
use crate::storage::MemoryStore;
use crate::{Error, Result};

pub use constraints::{ConfigureAction, ConstraintOperator, ResourceConstraint};
pub use dynamic::DynamicContext;

pub struct Solution {
    kb: Arc<KnowledgeBase>,
    /// Resource graph; an edge `a -> b` means `a` uses `b`. Cycles allowed.
    graph: MemoryStore<ResourceId, Resource>,
    constraints: Vec<ResourceConstraint>,
    global_tag: String,
}

impl Solution {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self {
            kb,
            graph: MemoryStore::new(),
            constraints: Vec::new(),
            global_tag: String::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: ResourceConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_global_tag(mut self, tag: impl Into<String>) -> Self {
        self.global_tag = tag.into();
        self
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn global_tag(&self) -> &str {
        &self.global_tag
    }

    pub fn set_global_tag(&mut self, tag: impl Into<String>) {
        self.global_tag = tag.into();
    }

    pub fn constraints(&self) -> &[ResourceConstraint] {
        &self.constraints
    }

    pub fn add_constraint(&mut self, constraint: ResourceConstraint) {
        self.constraints.push(constraint);
    }

    /// Constraints targeting exactly `reference`.
    pub fn constraints_for(&self, reference: &PropertyRef) -> Vec<&ResourceConstraint> {
        self.constraints.iter().filter(|c| c.applies_to(reference)).collect()
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub fn add_resource(&self, resource: Resource) -> Result<()> {
        self.graph.add_vertex(resource.id.clone(), resource)?;
        Ok(())
    }

    pub fn resource(&self, id: &ResourceId) -> Option<Resource> {
        self.graph.vertex(id)
    }

    pub fn get_resource(&self, id: &ResourceId) -> Result<Resource> {
        self.graph.vertex(id).ok_or_else(|| Error::NotFound(format!("resource {id}")))
    }

    pub fn has_resource(&self, id: &ResourceId) -> bool {
        self.graph.contains(id)
    }

    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.graph.keys()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.graph.snapshot().vertices.into_iter().map(|(_, r, _)| r).collect()
    }

    /// Remove a resource and every edge touching it.
    pub fn remove_resource(&self, id: &ResourceId) -> Result<Resource> {
        Ok(self.graph.remove_vertex(id)?)
    }

    /// Read a property; `Null` when unset.
    pub fn property(&self, reference: &PropertyRef) -> Result<Value> {
        self.get_resource(&reference.resource)?.get_property(&reference.property)
    }

    // ========================================================================
    // Edges
    // ========================================================================

    pub fn add_edge(&self, edge: &SimpleEdge) -> Result<()> {
        self.graph.add_edge(&edge.source, &edge.target)?;
        Ok(())
    }

    pub fn remove_edge(&self, edge: &SimpleEdge) -> Result<()> {
        self.graph.remove_edge(&edge.source, &edge.target)?;
        Ok(())
    }

    pub fn has_edge(&self, edge: &SimpleEdge) -> bool {
        self.graph.has_edge(&edge.source, &edge.target)
    }

    pub fn edges(&self) -> Vec<SimpleEdge> {
        self.graph.edges().into_iter().map(|(s, t)| SimpleEdge::new(s, t)).collect()
    }

    /// Resources `id` points at directly.
    pub fn direct_downstream(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.graph.successors(id)
    }

    /// Resources pointing at `id` directly.
    pub fn direct_upstream(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.graph.predecessors(id)
    }

    /// Every resource reachable from `id`, nearest first, ties by id.
    pub fn downstream(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.walk(id, |k| self.graph.successors(k))
    }

    /// Every resource that reaches `id`, nearest first, ties by id.
    pub fn upstream(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.walk(id, |k| self.graph.predecessors(k))
    }

    fn walk(&self, start: &ResourceId, next: impl Fn(&ResourceId) -> BTreeSet<ResourceId>) -> Vec<ResourceId> {
        let mut seen: HashSet<ResourceId> = HashSet::new();
        seen.insert(start.clone());
        let mut out = Vec::new();
        let mut level: BTreeSet<ResourceId> = next(start);
        while !level.is_empty() {
            let mut following = BTreeSet::new();
            for id in level {
                if !seen.insert(id.clone()) {
                    continue;
                }
                following.extend(next(&id));
                out.push(id);
            }
            level = following;
        }
        out
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Apply `value` to `field` of resource `id`. The value is coerced to
    /// the property's declared type when the knowledge base knows it.
    pub fn configure(&self, id: &ResourceId, field: &str, value: Value, action: ConfigureAction) -> Result<()> {
        let template = self.kb.resource_template(id).ok().and_then(|t| t.property(field));
        let value = match template {
            Some(t) => t.kind.coerce(value)?,
            None => value,
        };
        self.graph.update_vertex(id, |res| apply_configuration(res, field, value, action))??;
        Ok(())
    }

    /// The id `id` should have given its namespace property's current value.
    pub fn namespaced_id(&self, id: &ResourceId) -> Result<ResourceId> {
        let res = self.get_resource(id)?;
        let Some(ns) = self.kb.resource_template(id)?.namespace_property() else {
            return Ok(id.clone());
        };
        match res.get_property(&ns.path)? {
            Value::ResourceId(ns_id) if !ns_id.is_zero() && ns_id.name != id.namespace => {
                Ok(id.clone().with_namespace(ns_id.name))
            }
            _ => Ok(id.clone()),
        }
    }

    /// Rename a resource, keeping its edges, and rewrite every reference to
    /// it in other resources' properties and in the constraints.
    pub fn update_id(&mut self, old: &ResourceId, new: &ResourceId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let mut res = self.get_resource(old)?;
        res.id = new.clone();
        res.replace_references(old, new);
        self.graph.replace_vertex(old, new.clone(), res)?;
        for id in self.graph.keys() {
            self.graph.update_vertex(&id, |r| r.replace_references(old, new))?;
        }
        for constraint in &mut self.constraints {
            if constraint.target == *old {
                constraint.target = new.clone();
            }
            constraint.value.replace_resource_id(old, new);
        }
        info!(%old, %new, "renamed resource");
        Ok(())
    }
}

fn apply_configuration(res: &mut Resource, field: &str, value: Value, action: ConfigureAction) -> Result<()> {
    if action == ConfigureAction::Set {
        return res.set_property(field, value);
    }
    if action == ConfigureAction::Remove {
        let current = res.get_property(field)?;
        let remaining = match (current, value) {
            (Value::List(items), Value::List(remove)) => {
                Some(Value::List(items.into_iter().filter(|v| !remove.contains(v)).collect()))
            }
            (Value::List(items), remove) => Some(Value::List(items.into_iter().filter(|v| *v != remove).collect())),
            (Value::Map(mut m), Value::Map(remove)) => {
                m.retain(|k, _| !remove.contains_key(k));
                Some(Value::Map(m))
            }
            (Value::Map(mut m), Value::String(key)) => {
                m.remove(&key);
                Some(Value::Map(m))
            }
            _ => None,
        };
        match remaining {
            Some(v) => res.set_property(field, v)?,
            None => {
                res.remove_property(field)?;
            }
        }
        return Ok(());
    }

    let dedupe = action == ConfigureAction::Add;
    let slot = res.property_mut(field)?;
    match (slot, value) {
        (slot @ Value::Null, v) => *slot = v,
        (Value::List(items), Value::List(new)) => {
            for item in new {
                if !dedupe || !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        (Value::List(items), item) => {
            if !dedupe || !items.contains(&item) {
                items.push(item);
            }
        }
        (Value::Map(m), Value::Map(new)) => m.extend(new),
        (slot, v) => *slot = v,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{PropertyTemplate, PropertyType, ResourceTemplate};

    fn kb() -> Arc<KnowledgeBase> {
        Arc::new(
            KnowledgeBase::new()
                .with_resource(
                    ResourceTemplate::new("aws:subnet")
                        .with_property(PropertyTemplate::new("Vpc", "resource(aws:vpc)".parse().unwrap()).namespace())
                        .with_property(PropertyTemplate::new("Cidrs", "set(string)".parse().unwrap())),
                )
                .with_resource(ResourceTemplate::new("aws:vpc"))
                .with_resource(
                    ResourceTemplate::new("aws:lambda_function")
                        .with_property(PropertyTemplate::new("Subnets", "list(resource(aws:subnet))".parse().unwrap()))
                        .with_property(PropertyTemplate::new("Memory", PropertyType::Int)),
                ),
        )
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_upstream_downstream_nearest_first() {
        let sol = Solution::new(kb());
        for r in ["aws:a:x", "aws:b:y", "aws:b:z", "aws:c:w"] {
            sol.add_resource(Resource::new(id(r))).unwrap();
        }
        sol.add_edge(&SimpleEdge::new(id("aws:a:x"), id("aws:b:z"))).unwrap();
        sol.add_edge(&SimpleEdge::new(id("aws:a:x"), id("aws:b:y"))).unwrap();
        sol.add_edge(&SimpleEdge::new(id("aws:b:y"), id("aws:c:w"))).unwrap();
        sol.add_edge(&SimpleEdge::new(id("aws:c:w"), id("aws:a:x"))).unwrap();
        assert_eq!(sol.downstream(&id("aws:a:x")), vec![id("aws:b:y"), id("aws:b:z"), id("aws:c:w")]);
        assert_eq!(sol.upstream(&id("aws:c:w")), vec![id("aws:b:y"), id("aws:a:x")]);
    }

    #[test]
    fn test_configure_actions() {
        let sol = Solution::new(kb());
        let subnet = id("aws:subnet:a");
        sol.add_resource(Resource::new(subnet.clone())).unwrap();
        sol.configure(&subnet, "Cidrs", Value::from("10.0.0.0/24"), ConfigureAction::Add).unwrap();
        sol.configure(&subnet, "Cidrs", Value::from("10.0.0.0/24"), ConfigureAction::Add).unwrap();
        sol.configure(&subnet, "Cidrs", Value::from("10.0.1.0/24"), ConfigureAction::Append).unwrap();
        let cidrs = PropertyRef::new(subnet.clone(), "Cidrs");
        assert_eq!(sol.property(&cidrs).unwrap(), Value::from(vec!["10.0.0.0/24", "10.0.1.0/24"]));
        sol.configure(&subnet, "Cidrs", Value::from("10.0.0.0/24"), ConfigureAction::Remove).unwrap();
        assert_eq!(sol.property(&cidrs).unwrap(), Value::from(vec!["10.0.1.0/24"]));

        let lambda = id("aws:lambda_function:api");
        sol.add_resource(Resource::new(lambda.clone())).unwrap();
        sol.configure(&lambda, "Memory", Value::from("512"), ConfigureAction::Set).unwrap();
        assert_eq!(sol.property(&PropertyRef::new(lambda.clone(), "Memory")).unwrap(), Value::Int(512));
        assert!(sol.configure(&lambda, "Subnets", Value::from("aws:vpc:v"), ConfigureAction::Add).is_err());
    }

    #[test]
    fn test_update_id_propagates() {
        let mut sol = Solution::new(kb()).with_constraint(ResourceConstraint::new(
            ConstraintOperator::Equals,
            id("aws:subnet:a"),
            "Cidrs",
            vec!["10.0.0.0/24"],
        ));
        let lambda = id("aws:lambda_function:api");
        let old = id("aws:subnet:a");
        let new = id("aws:subnet:main:a");
        sol.add_resource(Resource::new(old.clone())).unwrap();
        sol.add_resource(Resource::new(lambda.clone()).with_property("Subnets", vec![Value::ResourceId(old.clone())]))
            .unwrap();
        sol.add_edge(&SimpleEdge::new(lambda.clone(), old.clone())).unwrap();

        sol.update_id(&old, &new).unwrap();
        assert!(!sol.has_resource(&old));
        assert_eq!(sol.get_resource(&new).unwrap().id, new);
        assert!(sol.has_edge(&SimpleEdge::new(lambda.clone(), new.clone())));
        assert_eq!(
            sol.property(&PropertyRef::new(lambda, "Subnets")).unwrap(),
            Value::List(vec![Value::ResourceId(new.clone())])
        );
        assert_eq!(sol.constraints()[0].target, new);
    }

    #[test]
    fn test_namespaced_id() {
        let sol = Solution::new(kb());
        let subnet = id("aws:subnet:a");
        sol.add_resource(Resource::new(subnet.clone())).unwrap();
        assert_eq!(sol.namespaced_id(&subnet).unwrap(), subnet);
        sol.configure(&subnet, "Vpc", Value::from("aws:vpc:main"), ConfigureAction::Set).unwrap();
        assert_eq!(sol.namespaced_id(&subnet).unwrap(), id("aws:subnet:main:a"));
    }
}
