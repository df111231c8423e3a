//! Resource identifiers, property references and simple edges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Identifier of a resource in the live graph.
///
/// Textual form is `provider:type:name` or `provider:type:namespace:name`.
/// Used with empty fields it doubles as a selector (see [`ResourceId::matches`]).
/// Field order drives the derived ordering, which is lexicographic on the
/// textual parts and is what the evaluator's tie-breaking relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub provider: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(provider: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
            namespace: String::new(),
            name: name.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn is_zero(&self) -> bool {
        self.provider.is_empty() && self.kind.is_empty() && self.namespace.is_empty() && self.name.is_empty()
    }

    /// `provider:type`, the key used for template lookups.
    pub fn qualified_type(&self) -> String {
        format!("{}:{}", self.provider, self.kind)
    }

    /// Selector semantics: every non-empty field of `self` must equal the
    /// corresponding field of `other`.
    pub fn matches(&self, other: &ResourceId) -> bool {
        let field = |sel: &str, val: &str| sel.is_empty() || sel == val;
        field(&self.provider, &other.provider)
            && field(&self.kind, &other.kind)
            && field(&self.namespace, &other.namespace)
            && field(&self.name, &other.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.kind)?;
        if !self.namespace.is_empty() {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() || !self.namespace.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let id = match parts.as_slice() {
            [provider] if provider.is_empty() => ResourceId::default(),
            [provider, kind] => ResourceId::new(*provider, *kind, ""),
            [provider, kind, name] => ResourceId::new(*provider, *kind, *name),
            [provider, kind, namespace, name] => {
                ResourceId::new(*provider, *kind, *name).with_namespace(*namespace)
            }
            _ => {
                return Err(Error::TypeError {
                    expected: "resource id (provider:type[:namespace]:name)".into(),
                    got: format!("'{s}'"),
                });
            }
        };
        Ok(id)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A specific field on a specific resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyRef {
    pub resource: ResourceId,
    pub property: String,
}

impl PropertyRef {
    pub fn new(resource: ResourceId, property: impl Into<String>) -> Self {
        Self { resource, property: property.into() }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.property)
    }
}

/// A directed edge between two resources, without any edge data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimpleEdge {
    pub source: ResourceId,
    pub target: ResourceId,
}

impl SimpleEdge {
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        Self { source, target }
    }

    pub fn touches(&self, id: &ResourceId) -> bool {
        self.source == *id || self.target == *id
    }

    /// The same edge with `old` replaced by `new` on whichever end holds it.
    pub fn with_renamed(&self, old: &ResourceId, new: &ResourceId) -> SimpleEdge {
        let mut edge = self.clone();
        if edge.source == *old {
            edge.source = new.clone();
        }
        if edge.target == *old {
            edge.target = new.clone();
        }
        edge
    }
}

impl fmt::Display for SimpleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: ResourceId = "aws:subnet:vpc-1:private".parse().unwrap();
        assert_eq!(id.provider, "aws");
        assert_eq!(id.kind, "subnet");
        assert_eq!(id.namespace, "vpc-1");
        assert_eq!(id.name, "private");
        assert_eq!(id.to_string(), "aws:subnet:vpc-1:private");

        let short: ResourceId = "aws:vpc".parse().unwrap();
        assert_eq!(short.to_string(), "aws:vpc");
        assert!("a:b:c:d:e".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_selector_matches() {
        let selector: ResourceId = "aws:subnet".parse().unwrap();
        assert!(selector.matches(&ResourceId::new("aws", "subnet", "a")));
        assert!(!selector.matches(&ResourceId::new("aws", "vpc", "a")));
        assert!(ResourceId::default().matches(&ResourceId::new("x", "y", "z")));
    }

    #[test]
    fn test_edge_rename() {
        let a = ResourceId::new("aws", "vpc", "a");
        let b = ResourceId::new("aws", "subnet", "b");
        let c = ResourceId::new("aws", "vpc", "c");
        let edge = SimpleEdge::new(a.clone(), b.clone());
        assert_eq!(edge.with_renamed(&a, &c), SimpleEdge::new(c, b));
    }
}
