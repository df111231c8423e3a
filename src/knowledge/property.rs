//! Property types and property templates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::OperationalRule;
use crate::model::{ResourceId, Value};
use crate::{Error, Result};

// ============================================================================
// PropertyType
// ============================================================================

/// Declared type of a property, written as a string in knowledge bases:
/// `string`, `int`, `number`, `float`, `bool`, `any`, `object`,
/// `resource`, `resource(aws:subnet)`, `list`, `list(string)`, `set(T)`,
/// `map`, `map(string,string)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    String,
    Int,
    Float,
    Bool,
    Any,
    Object,
    /// Optional selector the referenced id must match.
    Resource(Option<ResourceId>),
    List(Option<Box<PropertyType>>),
    Set(Option<Box<PropertyType>>),
    Map(Option<(Box<PropertyType>, Box<PropertyType>)>),
}

impl PropertyType {
    /// Value a template sees for a property that has not been set yet.
    pub fn zero_value(&self) -> Value {
        match self {
            PropertyType::String => Value::String(String::new()),
            PropertyType::Int => Value::Int(0),
            PropertyType::Float => Value::Float(0.0),
            PropertyType::Bool => Value::Bool(false),
            PropertyType::List(_) | PropertyType::Set(_) => Value::List(Vec::new()),
            PropertyType::Map(_) | PropertyType::Object => Value::Map(BTreeMap::new()),
            PropertyType::Resource(_) | PropertyType::Any => Value::Null,
        }
    }

    /// List or set.
    pub fn is_collection(&self) -> bool {
        matches!(self, PropertyType::List(_) | PropertyType::Set(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, PropertyType::Map(_) | PropertyType::Object)
    }

    /// Element type of a list or set, value type of a map.
    pub fn element(&self) -> Option<&PropertyType> {
        match self {
            PropertyType::List(Some(t)) | PropertyType::Set(Some(t)) => Some(t),
            PropertyType::Map(Some((_, v))) => Some(v),
            _ => None,
        }
    }

    /// Whether values of this type can hold a reference to `id`.
    pub fn accepts_resource(&self, id: &ResourceId) -> bool {
        match self {
            PropertyType::Resource(None) => true,
            PropertyType::Resource(Some(selector)) => selector.matches(id),
            PropertyType::List(Some(t)) | PropertyType::Set(Some(t)) => t.accepts_resource(id),
            _ => false,
        }
    }

    /// Convert a template result into a value of this type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |v: &Value| Error::TypeError { expected: self.to_string(), got: v.type_name().into() };
        match self {
            PropertyType::Any | PropertyType::Object => Ok(value),
            PropertyType::String => match value {
                Value::String(_) => Ok(value),
                Value::List(_) | Value::Map(_) => Err(mismatch(&value)),
                other => Ok(Value::String(other.to_string())),
            },
            PropertyType::Int => match value {
                Value::Int(_) => Ok(value),
                Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
                Value::String(ref s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch(&value)),
                other => Err(mismatch(&other)),
            },
            PropertyType::Float => match value {
                Value::Float(_) => Ok(value),
                Value::Int(i) => Ok(Value::Float(i as f64)),
                Value::String(ref s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| mismatch(&value)),
                other => Err(mismatch(&other)),
            },
            PropertyType::Bool => match value {
                Value::Bool(_) => Ok(value),
                Value::String(ref s) => s.trim().parse::<bool>().map(Value::Bool).map_err(|_| mismatch(&value)),
                other => Err(mismatch(&other)),
            },
            PropertyType::Resource(selector) => {
                let id = match value {
                    Value::PropertyRef(_) => return Ok(value),
                    Value::ResourceId(id) => id,
                    Value::String(s) => s.parse::<ResourceId>()?,
                    other => return Err(mismatch(&other)),
                };
                match selector {
                    Some(sel) if !id.is_zero() && !sel.matches(&id) => Err(Error::TypeError {
                        expected: self.to_string(),
                        got: id.to_string(),
                    }),
                    _ => Ok(Value::ResourceId(id)),
                }
            }
            PropertyType::List(element) | PropertyType::Set(element) => {
                let items = match value {
                    Value::List(items) => items,
                    single => vec![single],
                };
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let item = match element {
                        Some(t) => t.coerce(item)?,
                        None => item,
                    };
                    if matches!(self, PropertyType::Set(_)) && out.contains(&item) {
                        continue;
                    }
                    out.push(item);
                }
                Ok(Value::List(out))
            }
            PropertyType::Map(types) => match value {
                Value::Map(m) => {
                    let Some((_, value_type)) = types else { return Ok(Value::Map(m)) };
                    let mut out = BTreeMap::new();
                    for (k, v) in m {
                        out.insert(k, value_type.coerce(v)?);
                    }
                    Ok(Value::Map(out))
                }
                other => Err(mismatch(&other)),
            },
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::String => write!(f, "string"),
            PropertyType::Int => write!(f, "int"),
            PropertyType::Float => write!(f, "float"),
            PropertyType::Bool => write!(f, "bool"),
            PropertyType::Any => write!(f, "any"),
            PropertyType::Object => write!(f, "object"),
            PropertyType::Resource(None) => write!(f, "resource"),
            PropertyType::Resource(Some(sel)) => write!(f, "resource({sel})"),
            PropertyType::List(None) => write!(f, "list"),
            PropertyType::List(Some(t)) => write!(f, "list({t})"),
            PropertyType::Set(None) => write!(f, "set"),
            PropertyType::Set(Some(t)) => write!(f, "set({t})"),
            PropertyType::Map(None) => write!(f, "map"),
            PropertyType::Map(Some((k, v))) => write!(f, "map({k},{v})"),
        }
    }
}

impl FromStr for PropertyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, args) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..].strip_suffix(')').ok_or_else(|| Error::TypeError {
                    expected: "closing ')' in property type".into(),
                    got: format!("'{s}'"),
                })?;
                (&s[..open], Some(inner))
            }
            None => (s, None),
        };
        let ty = match (name, args) {
            ("string", None) => PropertyType::String,
            ("int", None) => PropertyType::Int,
            ("float" | "number", None) => PropertyType::Float,
            ("bool", None) => PropertyType::Bool,
            ("any", None) => PropertyType::Any,
            ("object", None) => PropertyType::Object,
            ("resource", None) => PropertyType::Resource(None),
            ("resource", Some(sel)) => PropertyType::Resource(Some(sel.trim().parse()?)),
            ("list", None) => PropertyType::List(None),
            ("list", Some(t)) => PropertyType::List(Some(Box::new(t.parse()?))),
            ("set", None) => PropertyType::Set(None),
            ("set", Some(t)) => PropertyType::Set(Some(Box::new(t.parse()?))),
            ("map", None) => PropertyType::Map(None),
            ("map", Some(kv)) => {
                let (k, v) = split_top_level(kv).ok_or_else(|| Error::TypeError {
                    expected: "map(key,value)".into(),
                    got: format!("'{s}'"),
                })?;
                PropertyType::Map(Some((Box::new(k.parse()?), Box::new(v.parse()?))))
            }
            _ => {
                return Err(Error::TypeError { expected: "property type".into(), got: format!("'{s}'") });
            }
        };
        Ok(ty)
    }
}

/// Split `a,b` at the first comma that is not nested inside parentheses.
fn split_top_level(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

impl Serialize for PropertyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PropertyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// PropertyTemplate
// ============================================================================

/// Knowledge-base description of one property of a resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyTemplate {
    #[serde(default)]
    pub name: String,
    /// Dotted path from the resource root, list indices omitted.
    #[serde(skip)]
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PropertyType,
    /// Literal or template string; templates may appear inside lists and maps.
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub operational_rule: Option<OperationalRule>,
    /// Sub-properties of a map/object, or of each element of a list/set.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyTemplate>,
    /// Setting this property moves the resource into the referenced namespace.
    #[serde(default)]
    pub namespace: bool,
    #[serde(default)]
    pub required: bool,
}

impl PropertyTemplate {
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            kind,
            default_value: None,
            operational_rule: None,
            properties: BTreeMap::new(),
            namespace: false,
            required: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_rule(mut self, rule: OperationalRule) -> Self {
        self.operational_rule = Some(rule);
        self
    }

    pub fn with_sub_property(mut self, sub: PropertyTemplate) -> Self {
        self.properties.insert(sub.name.clone(), sub);
        let path = self.path.clone();
        self.assign_paths(&path);
        self
    }

    pub fn namespace(mut self) -> Self {
        self.namespace = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Lists, sets and maps without declared sub-properties: values that
    /// edges keep adding to, so they are never confidently complete.
    pub fn is_unbounded_container(&self) -> bool {
        self.kind.is_collection() || (self.kind.is_map() && self.properties.is_empty())
    }

    /// Recompute `path` for this template and every sub-property.
    pub(crate) fn assign_paths(&mut self, path: &str) {
        self.path = path.to_string();
        for (key, sub) in self.properties.iter_mut() {
            if sub.name.is_empty() {
                sub.name = key.clone();
            }
            let child = format!("{path}.{}", sub.name);
            sub.assign_paths(&child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_types() {
        let t: PropertyType = "map(string,list(resource(aws:subnet)))".parse().unwrap();
        assert_eq!(t.to_string(), "map(string,list(resource(aws:subnet)))");
        assert!(t.is_map());
        assert!(t.element().unwrap().is_collection());
        assert!("list(string".parse::<PropertyType>().is_err());
        assert!("tuple".parse::<PropertyType>().is_err());
        assert_eq!("number".parse::<PropertyType>().unwrap(), PropertyType::Float);
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(PropertyType::String.zero_value(), Value::from(""));
        assert_eq!(PropertyType::List(None).zero_value(), Value::List(vec![]));
        assert_eq!(PropertyType::Resource(None).zero_value(), Value::Null);
    }

    #[test]
    fn test_coerce() {
        let subnet = ResourceId::new("aws", "subnet", "a");
        let ty: PropertyType = "list(resource(aws:subnet))".parse().unwrap();
        assert_eq!(
            ty.coerce(Value::from("aws:subnet:a")).unwrap(),
            Value::List(vec![Value::ResourceId(subnet.clone())])
        );
        assert!(ty.coerce(Value::from("aws:vpc:a")).is_err());

        let set: PropertyType = "set(int)".parse().unwrap();
        assert_eq!(set.coerce(Value::from(vec![1, 1, 2])).unwrap(), Value::from(vec![1, 2]));
        assert_eq!(PropertyType::Int.coerce(Value::from("80")).unwrap(), Value::Int(80));
        assert_eq!(PropertyType::String.coerce(Value::ResourceId(subnet)).unwrap(), Value::from("aws:subnet:a"));
    }

    #[test]
    fn test_unbounded_container() {
        assert!(PropertyTemplate::new("Tags", PropertyType::Map(None)).is_unbounded_container());
        let obj = PropertyTemplate::new("Config", PropertyType::Map(None))
            .with_sub_property(PropertyTemplate::new("Port", PropertyType::Int));
        assert!(!obj.is_unbounded_container());
        assert_eq!(obj.properties["Port"].path, "Config.Port");
        assert!(PropertyTemplate::new("Ids", "list".parse().unwrap()).is_unbounded_container());
    }
}
