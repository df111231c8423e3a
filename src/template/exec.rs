//! Template executor.
//!
//! Walks a parsed [`Template`] against a [`TemplateFunctions`] implementation.
//! Built-ins are pure and handled here; every other function name is
//! delegated, which is how the real and the capturing contexts plug in.

use crate::model::{PropertyRef, ResourceId, SimpleEdge, Value};
use crate::{Error, Result};
use super::ast::*;

/// Data visible to a template through field references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicData {
    /// `.Self`
    pub resource: Option<ResourceId>,
    /// `.Source` / `.Target`
    pub edge: Option<SimpleEdge>,
    /// `.Path`
    pub path: Option<String>,
    /// `.Tag`
    pub tag: String,
}

impl DynamicData {
    pub fn for_resource(resource: ResourceId) -> Self {
        Self { resource: Some(resource), ..Self::default() }
    }

    pub fn for_edge(edge: SimpleEdge) -> Self {
        Self { edge: Some(edge), ..Self::default() }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

/// Non-builtin functions callable from templates.
pub trait TemplateFunctions {
    fn call(&mut self, name: &str, args: Vec<Value>, data: &DynamicData) -> Result<Value>;
}

/// Names resolved by the executor itself.
pub const BUILTINS: &[&str] = &["eq", "ne", "not", "and", "or", "len", "toJson", "split", "join"];

/// Execute `template`. A template that is exactly one action yields that
/// action's value; anything else renders to a string.
pub fn execute(template: &Template, funcs: &mut dyn TemplateFunctions, data: &DynamicData) -> Result<Value> {
    if let Some(pipeline) = template.single_action() {
        return eval_pipeline(pipeline, funcs, data);
    }
    if template.is_static() {
        let text: String = template.nodes.iter().map(|n| match n {
            Node::Text(t) => t.as_str(),
            _ => "",
        }).collect();
        return Ok(Value::String(text));
    }
    let mut out = String::new();
    render_nodes(&template.nodes, funcs, data, &mut out)?;
    Ok(Value::String(out))
}

fn render_nodes(nodes: &[Node], funcs: &mut dyn TemplateFunctions, data: &DynamicData, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Action(p) => {
                let v = eval_pipeline(p, funcs, data)?;
                out.push_str(&v.to_string());
            }
            Node::If { condition, then, otherwise } => {
                let cond = eval_pipeline(condition, funcs, data)?;
                let branch = if cond.is_truthy() { then } else { otherwise };
                render_nodes(branch, funcs, data, out)?;
            }
        }
    }
    Ok(())
}

fn eval_pipeline(pipeline: &Pipeline, funcs: &mut dyn TemplateFunctions, data: &DynamicData) -> Result<Value> {
    let mut piped: Option<Value> = None;
    for cmd in &pipeline.commands {
        piped = Some(eval_command(cmd, piped.take(), funcs, data)?);
    }
    Ok(piped.unwrap_or_default())
}

fn eval_command(
    cmd: &Command,
    piped: Option<Value>,
    funcs: &mut dyn TemplateFunctions,
    data: &DynamicData,
) -> Result<Value> {
    let Some((head, rest)) = cmd.args.split_first() else {
        return Err(Error::Template("empty command".into()));
    };
    match head {
        Operand::Function(name) => {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for arg in rest {
                args.push(eval_operand(arg, funcs, data)?);
            }
            if let Some(v) = piped {
                args.push(v);
            }
            call(name, args, funcs, data)
        }
        operand => {
            if !rest.is_empty() || piped.is_some() {
                return Err(Error::Template(format!("can't give argument to non-function {operand:?}")));
            }
            eval_operand(operand, funcs, data)
        }
    }
}

fn eval_operand(operand: &Operand, funcs: &mut dyn TemplateFunctions, data: &DynamicData) -> Result<Value> {
    match operand {
        Operand::Literal(v) => Ok(v.clone()),
        Operand::Field(path) => resolve_field(path, data),
        Operand::Nested(p) => eval_pipeline(p, funcs, data),
        Operand::Function(name) => call(name, Vec::new(), funcs, data),
    }
}

fn call(name: &str, args: Vec<Value>, funcs: &mut dyn TemplateFunctions, data: &DynamicData) -> Result<Value> {
    if BUILTINS.contains(&name) {
        builtin(name, args).map_err(|e| e.context(format!("error calling {name}")))
    } else {
        funcs.call(name, args, data).map_err(|e| e.context(format!("error calling {name}")))
    }
}

// ============================================================================
// Fields
// ============================================================================

fn resolve_field(path: &[String], data: &DynamicData) -> Result<Value> {
    let Some((root, rest)) = path.split_first() else {
        return Err(Error::Template("empty field reference".into()));
    };
    let mut value = match root.as_str() {
        "Self" => data.resource.clone().map(Value::ResourceId)
            .ok_or_else(|| Error::Template("no .Self is set".into()))?,
        "Source" => data.edge.as_ref().map(|e| Value::ResourceId(e.source.clone()))
            .ok_or_else(|| Error::Template("no .Source is set".into()))?,
        "Target" => data.edge.as_ref().map(|e| Value::ResourceId(e.target.clone()))
            .ok_or_else(|| Error::Template("no .Target is set".into()))?,
        "Tag" => Value::String(data.tag.clone()),
        "Path" => data.path.clone().map(Value::String).unwrap_or_default(),
        other => return Err(Error::Template(format!("can't evaluate field {other}"))),
    };
    for field in rest {
        value = field_of(&value, field)?;
    }
    Ok(value)
}

fn field_of(value: &Value, field: &str) -> Result<Value> {
    match (value, field) {
        (Value::ResourceId(id), "Provider") => Ok(Value::from(id.provider.as_str())),
        (Value::ResourceId(id), "Type") => Ok(Value::from(id.kind.as_str())),
        (Value::ResourceId(id), "Namespace") => Ok(Value::from(id.namespace.as_str())),
        (Value::ResourceId(id), "Name") => Ok(Value::from(id.name.as_str())),
        (Value::PropertyRef(r), "Resource") => Ok(Value::ResourceId(r.resource.clone())),
        (Value::PropertyRef(r), "Property") => Ok(Value::from(r.property.as_str())),
        (Value::Map(m), key) => Ok(m.get(key).cloned().unwrap_or_default()),
        (other, _) => Err(Error::Template(format!("can't evaluate field {field} in type {}", other.type_name()))),
    }
}

// ============================================================================
// Built-ins
// ============================================================================

fn builtin(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "eq" => {
            let (first, rest) = args.split_first()
                .ok_or_else(|| Error::Template("missing argument for comparison".into()))?;
            if rest.is_empty() {
                return Err(Error::Template("missing argument for comparison".into()));
            }
            Ok(Value::Bool(rest.iter().any(|v| loose_eq(first, v))))
        }
        "ne" => {
            let [a, b] = arity::<2>(name, args)?;
            Ok(Value::Bool(!loose_eq(&a, &b)))
        }
        "not" => {
            let [a] = arity::<1>(name, args)?;
            Ok(Value::Bool(!a.is_truthy()))
        }
        "and" => Ok(args.iter().find(|v| !v.is_truthy()).or(args.last()).cloned().unwrap_or_default()),
        "or" => Ok(args.iter().find(|v| v.is_truthy()).or(args.last()).cloned().unwrap_or_default()),
        "len" => {
            let [a] = arity::<1>(name, args)?;
            a.len().map(Value::from)
                .ok_or_else(|| Error::Template(format!("len of type {}", a.type_name())))
        }
        "toJson" => {
            let [a] = arity::<1>(name, args)?;
            Ok(Value::String(serde_json::to_string(&a)?))
        }
        "split" => {
            let [s, sep] = arity::<2>(name, args)?;
            let (Some(s), Some(sep)) = (s.as_str(), sep.as_str()) else {
                return Err(Error::Template("split expects (string, separator)".into()));
            };
            Ok(Value::List(s.split(sep).map(Value::from).collect()))
        }
        "join" => {
            let [list, sep] = arity::<2>(name, args)?;
            let (Some(list), Some(sep)) = (list.as_list(), sep.as_str()) else {
                return Err(Error::Template("join expects (list, separator)".into()));
            };
            Ok(Value::from(list.iter().map(ToString::to_string).collect::<Vec<_>>().join(sep)))
        }
        other => Err(Error::Template(format!("function \"{other}\" not defined"))),
    }
}

fn arity<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N]> {
    let got = args.len();
    args.try_into()
        .map_err(|_| Error::Template(format!("wrong number of args for {name}: want {N} got {got}")))
}

/// Equality that treats ids and property refs as equal to their string form
/// and integers as equal to the same float.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => (*i as f64) == *f,
        (Value::String(s), Value::ResourceId(_) | Value::PropertyRef(_)) => *s == b.to_string(),
        (Value::ResourceId(_) | Value::PropertyRef(_), Value::String(s)) => a.to_string() == *s,
        _ => a == b,
    }
}

// ============================================================================
// Resource id coercion
// ============================================================================

/// Accept a resource id argument given as an id, a property ref's resource,
/// or the id's string form.
pub fn arg_to_resource_id(arg: &Value) -> Result<ResourceId> {
    match arg {
        Value::ResourceId(id) => Ok(id.clone()),
        Value::PropertyRef(PropertyRef { resource, .. }) => Ok(resource.clone()),
        Value::String(s) => s.parse(),
        other => Err(Error::TypeError { expected: "resource id".into(), got: other.type_name().into() }),
    }
}

/// Map helper used by context functions returning id lists.
pub fn ids_to_value(ids: impl IntoIterator<Item = ResourceId>) -> Value {
    Value::List(ids.into_iter().map(Value::ResourceId).collect())
}
