//! Dynamic property values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{PropertyRef, ResourceId};

/// Value of a resource property or of a template expression.
///
/// Maps are ordered so that rendering and iteration are reproducible.
/// Serialized through JSON: ids and property refs become strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    ResourceId(ResourceId),
    PropertyRef(PropertyRef),
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::ResourceId(_) => "resource",
            Value::PropertyRef(_) => "property_ref",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Template truthiness: null, false, zero, and empty strings/collections are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::ResourceId(id) => !id.is_zero(),
            Value::PropertyRef(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_resource_id(&self) -> Option<&ResourceId> {
        match self {
            Value::ResourceId(id) => Some(id),
            _ => None,
        }
    }

    /// Every resource id contained in this value, in order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        match self {
            Value::ResourceId(id) => vec![id.clone()],
            Value::PropertyRef(r) => vec![r.resource.clone()],
            Value::List(items) => items.iter().flat_map(Value::resource_ids).collect(),
            Value::Map(m) => m.values().flat_map(Value::resource_ids).collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every occurrence of `old` (as an id or inside a property ref).
    /// Returns whether anything changed.
    pub fn replace_resource_id(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        match self {
            Value::ResourceId(id) if id == old => {
                *id = new.clone();
                true
            }
            Value::PropertyRef(r) if r.resource == *old => {
                r.resource = new.clone();
                true
            }
            Value::List(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    changed |= item.replace_resource_id(old, new);
                }
                changed
            }
            Value::Map(m) => {
                let mut changed = false;
                for item in m.values_mut() {
                    changed |= item.replace_resource_id(old, new);
                }
                changed
            }
            _ => false,
        }
    }

    /// Number of elements for collections and strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.len()),
            Value::List(l) => Some(l.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(i64::from(v)) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<usize> for Value { fn from(v: usize) -> Self { Value::Int(v as i64) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<ResourceId> for Value { fn from(v: ResourceId) -> Self { Value::ResourceId(v) } }
impl From<PropertyRef> for Value { fn from(v: PropertyRef) -> Self { Value::PropertyRef(v) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(m) => Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Value::Map(m) => serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect()),
            Value::ResourceId(id) => serde_json::Value::String(id.to_string()),
            Value::PropertyRef(r) => serde_json::Value::String(r.to_string()),
        }
    }
}

// ============================================================================
// Display
// ============================================================================

/// Renders the way a template would print the value: strings bare, ids in
/// their textual form, collections in brackets.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, " ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "map[")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 { write!(f, " ")?; }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "]")
            }
            Value::ResourceId(id) => write!(f, "{id}"),
            Value::PropertyRef(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(!Value::ResourceId(ResourceId::default()).is_truthy());
    }

    #[test]
    fn test_replace_resource_id_nested() {
        let old = ResourceId::new("aws", "vpc", "a");
        let new = ResourceId::new("aws", "vpc", "b");
        let mut v = Value::List(vec![
            Value::ResourceId(old.clone()),
            Value::PropertyRef(PropertyRef::new(old.clone(), "cidr")),
        ]);
        assert!(v.replace_resource_id(&old, &new));
        assert_eq!(v.resource_ids(), vec![new.clone(), new]);
    }

    #[test]
    fn test_json_roundtrip_keeps_structure() {
        let v: Value = serde_json::from_str(r#"{"ports": [80, 443], "name": "web"}"#).unwrap();
        let Value::Map(m) = &v else { panic!("expected map") };
        assert_eq!(m["ports"], Value::List(vec![Value::Int(80), Value::Int(443)]));
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"name":"web","ports":[80,443]}"#);
    }
}
