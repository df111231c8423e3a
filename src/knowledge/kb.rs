//! Resource templates, edge templates and the registry holding them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{OperationalRule, PropertyTemplate};
use crate::model::{PropertyRef, Resource, ResourceId, Value};
use crate::{Error, Result};

// ============================================================================
// ResourceTemplate
// ============================================================================

/// Shape of one resource type: its properties, what it is, and how paths
/// through it must be satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// `provider:type`
    pub qualified_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyTemplate>,
    #[serde(default)]
    pub classifications: Vec<String>,
    #[serde(default)]
    pub path_satisfaction: PathSatisfactionRoutes,
}

/// Routes (`classification[#field#field]`) a path through this type must
/// satisfy, by the role the type plays on the edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSatisfactionRoutes {
    #[serde(default)]
    pub as_source: Vec<String>,
    #[serde(default)]
    pub as_target: Vec<String>,
}

impl ResourceTemplate {
    pub fn new(qualified_type: impl Into<String>) -> Self {
        Self {
            qualified_type: qualified_type.into(),
            properties: BTreeMap::new(),
            classifications: Vec::new(),
            path_satisfaction: PathSatisfactionRoutes::default(),
        }
    }

    pub fn with_property(mut self, property: PropertyTemplate) -> Self {
        self.properties.insert(property.name.clone(), property);
        self.assign_paths();
        self
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classifications.push(classification.into());
        self
    }

    pub fn satisfies_as_source(mut self, route: impl Into<String>) -> Self {
        self.path_satisfaction.as_source.push(route.into());
        self
    }

    pub fn satisfies_as_target(mut self, route: impl Into<String>) -> Self {
        self.path_satisfaction.as_target.push(route.into());
        self
    }

    /// Type-only id (`provider:type`), usable as a selector.
    pub fn id(&self) -> Result<ResourceId> {
        self.qualified_type.parse()
    }

    pub fn is(&self, classification: &str) -> bool {
        self.classifications.iter().any(|c| c == classification)
    }

    /// Template for a property path; list indices (`Rules[0].Port`) are ignored.
    pub fn property(&self, path: &str) -> Option<&PropertyTemplate> {
        let mut parts = path.split('.').map(|p| p.split('[').next().unwrap_or(p));
        let mut current = self.properties.get(parts.next()?)?;
        for part in parts {
            current = current.properties.get(part)?;
        }
        Some(current)
    }

    /// Top-level property flagged as the resource's namespace.
    pub fn namespace_property(&self) -> Option<&PropertyTemplate> {
        self.properties.values().find(|p| p.namespace)
    }

    /// Every concrete property path of `resource` that gets its own vertex:
    /// all declared properties, map sub-properties, and the sub-properties
    /// of each element currently present in a list or set.
    pub fn loop_properties<'a>(&'a self, resource: &Resource) -> Vec<(String, &'a PropertyTemplate)> {
        let mut out = Vec::new();
        for (name, prop) in &self.properties {
            collect_properties(name.clone(), prop, resource, &mut out);
        }
        out
    }

    pub(crate) fn assign_paths(&mut self) {
        for (key, prop) in self.properties.iter_mut() {
            if prop.name.is_empty() {
                prop.name = key.clone();
            }
            let path = prop.name.clone();
            prop.assign_paths(&path);
        }
    }
}

fn collect_properties<'a>(
    path: String,
    prop: &'a PropertyTemplate,
    resource: &Resource,
    out: &mut Vec<(String, &'a PropertyTemplate)>,
) {
    if !prop.properties.is_empty() {
        if prop.kind.is_collection() {
            let len = match resource.get_property(&path) {
                Ok(Value::List(items)) => items.len(),
                _ => 0,
            };
            for i in 0..len {
                for (name, sub) in &prop.properties {
                    collect_properties(format!("{path}[{i}].{name}"), sub, resource, out);
                }
            }
        } else {
            for (name, sub) in &prop.properties {
                collect_properties(format!("{path}.{name}"), sub, resource, out);
            }
        }
    }
    out.push((path, prop));
}

// ============================================================================
// EdgeTemplate
// ============================================================================

/// Rules that apply when a resource of type `source` points at one of type
/// `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTemplate {
    pub source: ResourceId,
    pub target: ResourceId,
    #[serde(default)]
    pub operational_rules: Vec<OperationalRule>,
}

impl EdgeTemplate {
    pub fn new(source: ResourceId, target: ResourceId) -> Self {
        Self { source, target, operational_rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: OperationalRule) -> Self {
        self.operational_rules.push(rule);
        self
    }
}

// ============================================================================
// PathSatisfaction
// ============================================================================

/// One requirement an abstract edge's expansion must meet.
///
/// `classification` may carry a field traversal (`network#Subnets`); the
/// traversal starts at the source, or at the target when `as_target`.
/// An empty classification means any path will do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSatisfaction {
    pub classification: String,
    #[serde(default)]
    pub as_target: bool,
}

impl PathSatisfaction {
    pub fn new(classification: impl Into<String>, as_target: bool) -> Self {
        Self { classification: classification.into(), as_target }
    }

    /// Split into the bare classification and the optional field traversal.
    pub fn route(&self) -> (&str, Option<&str>) {
        match self.classification.split_once('#') {
            Some((class, traversal)) => (class, Some(traversal)),
            None => (self.classification.as_str(), None),
        }
    }
}

impl fmt::Display for PathSatisfaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = if self.classification.is_empty() { "<default>" } else { &self.classification };
        if self.as_target {
            write!(f, "{class} (target)")
        } else {
            write!(f, "{class}")
        }
    }
}

// ============================================================================
// KnowledgeBase
// ============================================================================

/// Registry of resource and edge templates, keyed by qualified type.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    resources: BTreeMap<String, ResourceTemplate>,
    edges: BTreeMap<(String, String), EdgeTemplate>,
}

#[derive(Deserialize)]
struct KnowledgeBaseFile {
    #[serde(default)]
    resources: Vec<ResourceTemplate>,
    #[serde(default)]
    edges: Vec<EdgeTemplate>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"resources": [...], "edges": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: KnowledgeBaseFile = serde_json::from_str(json)?;
        let mut kb = KnowledgeBase::new();
        for template in file.resources {
            kb.add_resource_template(template);
        }
        for template in file.edges {
            kb.add_edge_template(template);
        }
        Ok(kb)
    }

    pub fn with_resource(mut self, template: ResourceTemplate) -> Self {
        self.add_resource_template(template);
        self
    }

    pub fn with_edge(mut self, template: EdgeTemplate) -> Self {
        self.add_edge_template(template);
        self
    }

    pub fn add_resource_template(&mut self, mut template: ResourceTemplate) {
        template.assign_paths();
        self.resources.insert(template.qualified_type.clone(), template);
    }

    pub fn add_edge_template(&mut self, template: EdgeTemplate) {
        let key = (template.source.qualified_type(), template.target.qualified_type());
        self.edges.insert(key, template);
    }

    pub fn resource_template(&self, id: &ResourceId) -> Result<&ResourceTemplate> {
        self.resources
            .get(&id.qualified_type())
            .ok_or_else(|| Error::NotFound(format!("resource template for {}", id.qualified_type())))
    }

    pub fn resource_templates(&self) -> impl Iterator<Item = &ResourceTemplate> {
        self.resources.values()
    }

    pub fn property_template(&self, reference: &PropertyRef) -> Option<&PropertyTemplate> {
        self.resource_template(&reference.resource).ok()?.property(&reference.property)
    }

    pub fn edge_template(&self, source: &ResourceId, target: &ResourceId) -> Option<&EdgeTemplate> {
        self.edges.get(&(source.qualified_type(), target.qualified_type()))
    }

    /// Whether the type of `id` declares `classification`.
    pub fn has_classification(&self, id: &ResourceId, classification: &str) -> bool {
        self.resource_template(id).is_ok_and(|t| t.is(classification))
    }

    /// Qualified types `qualified_type` has an edge template towards, sorted.
    pub fn edges_from(&self, qualified_type: &str) -> Vec<&str> {
        self.edges
            .keys()
            .filter(|(s, _)| s == qualified_type)
            .map(|(_, t)| t.as_str())
            .collect()
    }

    /// Qualified types with an edge template towards `qualified_type`, sorted.
    pub fn edges_to(&self, qualified_type: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .edges
            .keys()
            .filter(|(_, t)| t == qualified_type)
            .map(|(s, _)| s.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Requirements for expanding `source -> target`: the source type's
    /// as-source routes, then the target type's as-target routes, or a single
    /// default requirement when neither declares any.
    pub fn path_satisfactions(&self, source: &ResourceId, target: &ResourceId) -> Vec<PathSatisfaction> {
        let mut out = Vec::new();
        if let Ok(t) = self.resource_template(source) {
            out.extend(t.path_satisfaction.as_source.iter().map(|c| PathSatisfaction::new(c.clone(), false)));
        }
        if let Ok(t) = self.resource_template(target) {
            out.extend(t.path_satisfaction.as_target.iter().map(|c| PathSatisfaction::new(c.clone(), true)));
        }
        if out.is_empty() {
            out.push(PathSatisfaction::default());
        }
        out
    }
}
