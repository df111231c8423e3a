//! Vertex identity.

use std::fmt;

use crate::knowledge::PathSatisfaction;
use crate::model::{PropertyRef, ResourceId, SimpleEdge};

/// Identity of one unit of work in the evaluation graph.
///
/// The derived ordering (properties, then edges, then path expansions,
/// then graph states; each by its contents) is the in-round evaluation
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Property(PropertyRef),
    Edge(SimpleEdge),
    PathExpand {
        edge: SimpleEdge,
        satisfaction: PathSatisfaction,
    },
    GraphState(GraphQuery),
}

/// A graph query that found nothing yet, e.g. `downstream(aws:vpc, aws:subnet:a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphQuery {
    pub function: String,
    pub selector: ResourceId,
    pub resource: ResourceId,
}

impl GraphQuery {
    pub fn new(function: impl Into<String>, selector: ResourceId, resource: ResourceId) -> Self {
        Self { function: function.into(), selector, resource }
    }

    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> GraphQuery {
        let swap = |id: &ResourceId| if id == old { new.clone() } else { id.clone() };
        GraphQuery { function: self.function.clone(), selector: swap(&self.selector), resource: swap(&self.resource) }
    }
}

impl fmt::Display for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.function, self.selector, self.resource)
    }
}

impl Key {
    pub fn property(resource: ResourceId, property: impl Into<String>) -> Self {
        Key::Property(PropertyRef::new(resource, property))
    }

    pub fn as_property(&self) -> Option<&PropertyRef> {
        match self {
            Key::Property(r) => Some(r),
            _ => None,
        }
    }

    /// Whether the key names `id` anywhere.
    pub fn references(&self, id: &ResourceId) -> bool {
        match self {
            Key::Property(r) => r.resource == *id,
            Key::Edge(e) | Key::PathExpand { edge: e, .. } => e.touches(id),
            Key::GraphState(q) => q.resource == *id || q.selector == *id,
        }
    }

    /// The same key with `old` replaced by `new`.
    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> Key {
        match self {
            Key::Property(r) if r.resource == *old => Key::Property(PropertyRef::new(new.clone(), r.property.clone())),
            Key::Edge(e) => Key::Edge(e.with_renamed(old, new)),
            Key::PathExpand { edge, satisfaction } => Key::PathExpand {
                edge: edge.with_renamed(old, new),
                satisfaction: satisfaction.clone(),
            },
            Key::GraphState(q) => Key::GraphState(q.renamed(old, new)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Property(r) => write!(f, "{r}"),
            Key::Edge(e) => write!(f, "{e}"),
            Key::PathExpand { edge, satisfaction } => write!(f, "{edge} <{satisfaction}>"),
            Key::GraphState(q) => write!(f, "{q}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_properties_first() {
        let a = ResourceId::new("aws", "vpc", "a");
        let b = ResourceId::new("aws", "subnet", "b");
        let mut keys = vec![
            Key::GraphState(GraphQuery::new("hasUpstream", ResourceId::new("aws", "vpc", ""), b.clone())),
            Key::Edge(SimpleEdge::new(b.clone(), a.clone())),
            Key::property(b.clone(), "Cidr"),
            Key::property(a.clone(), "Cidr"),
        ];
        keys.sort();
        assert_eq!(keys[0], Key::property(b, "Cidr"));
        assert_eq!(keys[1], Key::property(a, "Cidr"));
        assert!(matches!(keys[2], Key::Edge(_)));
        assert!(matches!(keys[3], Key::GraphState(_)));
    }

    #[test]
    fn test_renamed() {
        let old = ResourceId::new("aws", "subnet", "b");
        let new = ResourceId::new("aws", "subnet", "b").with_namespace("vpc");
        let vpc = ResourceId::new("aws", "vpc", "a");
        let key = Key::Edge(SimpleEdge::new(old.clone(), vpc.clone()));
        assert_eq!(key.renamed(&old, &new), Key::Edge(SimpleEdge::new(new.clone(), vpc.clone())));
        assert!(!key.renamed(&old, &new).references(&old));
        let prop = Key::property(vpc.clone(), "Cidr");
        assert_eq!(prop.renamed(&old, &new), prop);
    }

    #[test]
    fn test_graph_query_renamed() {
        let old = ResourceId::new("aws", "subnet", "a");
        let new = ResourceId::new("aws", "subnet", "a").with_namespace("main");
        let key = Key::GraphState(GraphQuery::new("hasDownstream", ResourceId::new("aws", "igw", ""), old.clone()));
        assert!(key.references(&old));
        let renamed = key.renamed(&old, &new);
        assert_eq!(renamed.to_string(), "hasDownstream(aws:igw, aws:subnet:main:a)");
        assert!(!renamed.references(&old));
    }
}
