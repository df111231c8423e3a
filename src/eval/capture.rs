//! Dependency capture.
//!
//! Runs configuration templates against the live graph as it is now and
//! records every property and graph query they touch, instead of failing
//! on what is not known yet. Template errors are discarded here; the real
//! evaluation later runs the same templates and reports them.

use tracing::trace;

use super::vertex::{GraphStateVertex, Vertex};
use super::{Evaluator, GraphChanges, GraphQuery, Key};
use crate::knowledge::OperationalRule;
use crate::model::{PropertyRef, ResourceId, Value};
use crate::solution::dynamic::{
    decode_resource_id, decode_string, execute_str, field_arg, resolve_value, two_args, DynamicContext,
};
use crate::template::{arg_to_resource_id, ids_to_value, DynamicData, TemplateFunctions};
use crate::Result;

pub struct DependencyCapture<'a> {
    eval: &'a Evaluator,
    /// Vertex the discovered dependencies are attributed to.
    src: Key,
    changes: GraphChanges,
    /// A template read the very value it is configuring.
    self_reference: bool,
}

impl<'a> DependencyCapture<'a> {
    pub fn new(eval: &'a Evaluator, src: Key) -> Self {
        Self { eval, src, changes: GraphChanges::default(), self_reference: false }
    }

    /// Whether anything captured so far read the value it configures.
    pub fn self_references(&self) -> bool {
        self.self_reference
    }

    pub fn into_changes(self) -> GraphChanges {
        self.changes
    }

    fn real(&self) -> DynamicContext<'a> {
        DynamicContext::new(self.eval.solution())
    }

    fn depend_on(&mut self, key: Key) {
        if key == self.src {
            self.self_reference = true;
        }
        self.changes.add_edge(self.src.clone(), key);
    }

    /// Resolve `value` (templates inside lists and maps included) for its
    /// side effects only.
    pub fn execute_value(&mut self, value: &Value, data: &DynamicData) {
        if let Err(err) = resolve_value(self, value, data) {
            trace!(src = %self.src, %err, "ignoring capture error");
        }
    }

    pub fn execute_template(&mut self, source: &str, data: &DynamicData) {
        if source.is_empty() {
            return;
        }
        if let Err(err) = execute_str(self, source, data) {
            trace!(src = %self.src, %err, "ignoring capture error");
        }
    }

    /// Capture an operational rule. Dependencies of a configuration value
    /// belong to the property it configures, which in turn depends on the
    /// current source.
    pub fn execute_rule(&mut self, data: &DynamicData, rule: &OperationalRule) {
        self.execute_template(&rule.if_condition, data);

        for cfg in &rule.configuration_rules {
            self.execute_template(&cfg.resource, data);
            self.execute_template(&cfg.config.field, data);

            let original = self.src.clone();
            let target = self.configured_property(&cfg.resource, &cfg.config.field, data);
            if let Some(reference) = &target {
                self.src = Key::Property(reference.clone());
            }
            self.execute_value(&cfg.config.value, data);
            self.src = original;
            if let Some(reference) = target {
                self.changes.add_edge(Key::Property(reference), self.src.clone());
            }
        }

        for step in &rule.steps {
            self.execute_template(&step.resource, data);
            for selector in &step.resources {
                self.execute_template(&selector.selector, data);
                for value in selector.properties.values() {
                    self.execute_value(value, data);
                }
            }
        }
    }

    fn configured_property(&mut self, resource: &str, field: &str, data: &DynamicData) -> Option<PropertyRef> {
        let res = if resource.is_empty() {
            data.resource.clone()?
        } else {
            decode_resource_id(self, resource, data).ok()?
        };
        let field = decode_string(self, field, data).ok()?;
        if field.is_empty() {
            return None;
        }
        Some(PropertyRef::new(res, field))
    }

    fn add_graph_state(&mut self, query: GraphQuery) {
        let vertex = GraphStateVertex::new(query);
        let key = vertex.key();
        self.changes.add_vertex(Vertex::GraphState(vertex));
        self.depend_on(key);
    }

    // ========================================================================
    // Captured functions
    // ========================================================================

    fn field_value(&mut self, field: &str, resource: &ResourceId) -> Value {
        let property = field.split('[').next().unwrap_or(field);
        self.depend_on(Key::property(resource.clone(), property));
        match self.real().field_value(field, resource) {
            Ok(v) => v,
            Err(_) => {
                let reference = PropertyRef::new(resource.clone(), property);
                self.eval
                    .solution()
                    .knowledge_base()
                    .property_template(&reference)
                    .map(|t| t.kind.zero_value())
                    .unwrap_or_default()
            }
        }
    }

    fn has_field(&mut self, field: &str, resource: &ResourceId) -> bool {
        let property = field.split('[').next().unwrap_or(field);
        self.depend_on(Key::property(resource.clone(), property));
        self.real().has_field(field, resource).unwrap_or(false)
    }

    /// `hasUpstream`/`upstream` and their downstream twins: a resolved
    /// query needs nothing more, an unresolved one waits for the graph.
    fn neighbour(&mut self, name: &str, selector: ResourceId, resource: ResourceId) -> Value {
        let upstream = name.contains("pstream");
        let matches = if upstream {
            self.real().upstream_matches(&selector, &resource)
        } else {
            self.real().downstream_matches(&selector, &resource)
        };
        let answer = match name {
            "hasUpstream" | "hasDownstream" => Value::Bool(!matches.is_empty()),
            _ => matches.first().cloned().map(Value::ResourceId).unwrap_or_default(),
        };
        if matches.is_empty() {
            self.add_graph_state(GraphQuery::new(name, selector, resource));
        }
        answer
    }

    /// `allUpstream`, `allDownstream`, `closestDownstream`: more matches can
    /// always appear, so these wait at a fixed tier.
    fn open_query(&mut self, name: &str, selector: ResourceId, resource: ResourceId) -> Value {
        let ctx = self.real();
        let answer = match name {
            "allUpstream" => ids_to_value(ctx.upstream_matches(&selector, &resource)),
            "allDownstream" => ids_to_value(ctx.downstream_matches(&selector, &resource)),
            _ => ctx.downstream_matches(&selector, &resource).into_iter().next().map(Value::ResourceId).unwrap_or_default(),
        };
        self.add_graph_state(GraphQuery::new(name, selector, resource));
        answer
    }
}

impl TemplateFunctions for DependencyCapture<'_> {
    fn call(&mut self, name: &str, args: Vec<Value>, data: &DynamicData) -> Result<Value> {
        let [first, second] = two_args(name, args)?;
        match name {
            "fieldValue" => Ok(self.field_value(&field_arg(&first), &arg_to_resource_id(&second)?)),
            "hasField" => Ok(Value::Bool(self.has_field(&field_arg(&first), &arg_to_resource_id(&second)?))),
            "hasUpstream" | "upstream" | "hasDownstream" | "downstream" => {
                Ok(self.neighbour(name, arg_to_resource_id(&first)?, arg_to_resource_id(&second)?))
            }
            "allUpstream" | "allDownstream" | "closestDownstream" => {
                Ok(self.open_query(name, arg_to_resource_id(&first)?, arg_to_resource_id(&second)?))
            }
            other => self.real().call(other, vec![first, second], data),
        }
    }
}
