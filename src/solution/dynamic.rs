//! The real template-evaluation context.
//!
//! [`DynamicContext`] answers graph queries from templates against the live
//! resource graph. The decode helpers are free functions over any
//! [`TemplateFunctions`] so the dependency-capturing context can reuse them.

use std::collections::BTreeMap;

use super::Solution;
use crate::model::{ResourceId, Value};
use crate::template::{arg_to_resource_id, execute, ids_to_value, DynamicData, Template, TemplateFunctions};
use crate::{Error, Result};

/// Names of the graph functions every context must provide.
pub const GRAPH_FUNCTIONS: &[&str] = &[
    "fieldValue",
    "hasField",
    "hasUpstream",
    "upstream",
    "allUpstream",
    "hasDownstream",
    "downstream",
    "closestDownstream",
    "allDownstream",
];

pub struct DynamicContext<'a> {
    solution: &'a Solution,
}

impl<'a> DynamicContext<'a> {
    pub fn new(solution: &'a Solution) -> Self {
        Self { solution }
    }

    pub fn solution(&self) -> &'a Solution {
        self.solution
    }

    /// Data for templates evaluated on behalf of `resource`.
    pub fn data_for(&self, resource: &ResourceId) -> DynamicData {
        DynamicData::for_resource(resource.clone()).with_tag(self.solution.global_tag())
    }

    pub fn execute(&mut self, source: &str, data: &DynamicData) -> Result<Value> {
        execute_str(self, source, data)
    }

    pub fn decode_resource_id(&mut self, source: &str, data: &DynamicData) -> Result<ResourceId> {
        decode_resource_id(self, source, data)
    }

    pub fn decode_resource_ids(&mut self, source: &str, data: &DynamicData) -> Result<Vec<ResourceId>> {
        decode_resource_ids(self, source, data)
    }

    pub fn decode_string(&mut self, source: &str, data: &DynamicData) -> Result<String> {
        decode_string(self, source, data)
    }

    pub fn resolve_value(&mut self, value: &Value, data: &DynamicData) -> Result<Value> {
        resolve_value(self, value, data)
    }

    pub fn evaluate_condition(&mut self, source: &str, data: &DynamicData) -> Result<bool> {
        evaluate_condition(self, source, data)
    }

    // ========================================================================
    // Graph queries
    // ========================================================================

    /// Value of `field` on `resource`; errors when the resource is missing
    /// or the field is unset.
    pub fn field_value(&self, field: &str, resource: &ResourceId) -> Result<Value> {
        let value = self.solution.get_resource(resource)?.get_property(field)?;
        if value.is_null() {
            return Err(Error::NotFound(format!("field {field} on {resource}")));
        }
        Ok(value)
    }

    pub fn has_field(&self, field: &str, resource: &ResourceId) -> Result<bool> {
        Ok(!self.solution.get_resource(resource)?.get_property(field)?.is_null())
    }

    /// Resources upstream of `resource` matching `selector`, nearest first.
    pub fn upstream_matches(&self, selector: &ResourceId, resource: &ResourceId) -> Vec<ResourceId> {
        self.solution.upstream(resource).into_iter().filter(|id| selector.matches(id)).collect()
    }

    /// Resources downstream of `resource` matching `selector`, nearest first.
    pub fn downstream_matches(&self, selector: &ResourceId, resource: &ResourceId) -> Vec<ResourceId> {
        self.solution.downstream(resource).into_iter().filter(|id| selector.matches(id)).collect()
    }
}

impl TemplateFunctions for DynamicContext<'_> {
    fn call(&mut self, name: &str, args: Vec<Value>, _data: &DynamicData) -> Result<Value> {
        let [first, second] = two_args(name, args)?;
        match name {
            "fieldValue" => self.field_value(&field_arg(&first), &arg_to_resource_id(&second)?),
            "hasField" => self.has_field(&field_arg(&first), &arg_to_resource_id(&second)?).map(Value::Bool),
            _ => {
                let selector = arg_to_resource_id(&first)?;
                let resource = arg_to_resource_id(&second)?;
                match name {
                    "hasUpstream" => Ok(Value::Bool(!self.upstream_matches(&selector, &resource).is_empty())),
                    "upstream" => self.upstream_matches(&selector, &resource).into_iter().next()
                        .map(Value::ResourceId)
                        .ok_or_else(|| Error::NotFound(format!("no upstream {selector} of {resource}"))),
                    "allUpstream" => Ok(ids_to_value(self.upstream_matches(&selector, &resource))),
                    "hasDownstream" => Ok(Value::Bool(!self.downstream_matches(&selector, &resource).is_empty())),
                    "downstream" => self.downstream_matches(&selector, &resource).into_iter().next()
                        .map(Value::ResourceId)
                        .ok_or_else(|| Error::NotFound(format!("no downstream {selector} of {resource}"))),
                    "closestDownstream" => Ok(self.downstream_matches(&selector, &resource).into_iter().next()
                        .map(Value::ResourceId)
                        .unwrap_or_default()),
                    "allDownstream" => Ok(ids_to_value(self.downstream_matches(&selector, &resource))),
                    other => Err(Error::Template(format!("function \"{other}\" not defined"))),
                }
            }
        }
    }
}

/// Every graph function takes exactly two arguments.
pub(crate) fn two_args(name: &str, args: Vec<Value>) -> Result<[Value; 2]> {
    let got = args.len();
    args.try_into()
        .map_err(|_| Error::Template(format!("wrong number of args for {name}: want 2 got {got}")))
}

pub(crate) fn field_arg(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Decoding helpers
// ============================================================================

pub fn execute_str(funcs: &mut dyn TemplateFunctions, source: &str, data: &DynamicData) -> Result<Value> {
    let template = Template::parse(source)?;
    execute(&template, funcs, data)
}

/// Execute a template that must produce one non-empty resource id.
pub fn decode_resource_id(funcs: &mut dyn TemplateFunctions, source: &str, data: &DynamicData) -> Result<ResourceId> {
    let id = match execute_str(funcs, source, data)? {
        Value::Null => ResourceId::default(),
        other => arg_to_resource_id(&other)?,
    };
    if id.is_zero() {
        return Err(Error::Template(format!("'{source}' resolved to an empty resource id")));
    }
    Ok(id)
}

/// Execute a template producing one id or a list of ids.
pub fn decode_resource_ids(
    funcs: &mut dyn TemplateFunctions,
    source: &str,
    data: &DynamicData,
) -> Result<Vec<ResourceId>> {
    match execute_str(funcs, source, data)? {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(arg_to_resource_id)
            .filter(|id| id.as_ref().map_or(true, |id| !id.is_zero()))
            .collect(),
        other => {
            let id = arg_to_resource_id(&other)?;
            Ok(if id.is_zero() { Vec::new() } else { vec![id] })
        }
    }
}

pub fn decode_string(funcs: &mut dyn TemplateFunctions, source: &str, data: &DynamicData) -> Result<String> {
    Ok(match execute_str(funcs, source, data)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Resolve templates anywhere inside `value`: strings are executed, lists
/// and maps are resolved element by element (map keys included).
pub fn resolve_value(funcs: &mut dyn TemplateFunctions, value: &Value, data: &DynamicData) -> Result<Value> {
    match value {
        Value::String(s) if s.contains("{{") => execute_str(funcs, s, data),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(funcs, item, data)?);
            }
            Ok(Value::List(out))
        }
        Value::Map(m) => {
            let mut out = BTreeMap::new();
            for (k, v) in m {
                let key = if k.contains("{{") { decode_string(funcs, k, data)? } else { k.clone() };
                out.insert(key, resolve_value(funcs, v, data)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

/// An empty condition holds.
pub fn evaluate_condition(funcs: &mut dyn TemplateFunctions, source: &str, data: &DynamicData) -> Result<bool> {
    if source.trim().is_empty() {
        return Ok(true);
    }
    Ok(match execute_str(funcs, source, data)? {
        Value::String(s) => match s.trim() {
            "true" => true,
            "false" | "" | "<no value>" => false,
            _ => true,
        },
        other => other.is_truthy(),
    })
}
