//! Operational rules: the template-driven procedures attached to
//! properties and edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Value;

/// A rule gated by an optional `if` template. Steps create or connect
/// resources; configuration rules set fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalRule {
    #[serde(rename = "if", default, skip_serializing_if = "String::is_empty")]
    pub if_condition: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<OperationalStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configuration_rules: Vec<ConfigurationRule>,
}

impl OperationalRule {
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.if_condition = condition.into();
        self
    }

    pub fn with_step(mut self, step: OperationalStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_config(mut self, rule: ConfigurationRule) -> Self {
        self.configuration_rules.push(rule);
        self
    }
}

/// Set `config.field` on the resource the `resource` template names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRule {
    /// Template resolving to a resource id; empty means `.Self`.
    #[serde(default)]
    pub resource: String,
    #[serde(rename = "configuration")]
    pub config: Configuration,
}

impl ConfigurationRule {
    pub fn new(resource: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            resource: resource.into(),
            config: Configuration { field: field.into(), value: value.into() },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Template resolving to a property path.
    pub field: String,
    /// Literal value; strings (also inside lists and maps) are templates.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upstream,
    #[default]
    Downstream,
}

/// Ensure the step's resource is connected to `num_needed` resources
/// matching one of `resources`, creating them when none can be reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalStep {
    /// Template naming the resource the step applies to; empty means `.Self`.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub resources: Vec<ResourceSelector>,
    #[serde(default = "default_num_needed")]
    pub num_needed: usize,
    /// Always create dedicated resources instead of reusing existing ones.
    #[serde(default)]
    pub unique: bool,
}

fn default_num_needed() -> usize {
    1
}

impl OperationalStep {
    pub fn new(direction: Direction, selector: impl Into<ResourceSelector>) -> Self {
        Self {
            resource: String::new(),
            direction,
            resources: vec![selector.into()],
            num_needed: 1,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn num_needed(mut self, n: usize) -> Self {
        self.num_needed = n;
        self
    }
}

/// Which resources a step may use. Written in knowledge bases either as a
/// bare selector template (`"aws:subnet"`) or as a full object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SelectorRepr")]
pub struct ResourceSelector {
    /// Template resolving to a (possibly partial) resource id.
    pub selector: String,
    /// Properties a reused resource must have, set on created ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// Classifications the resource's template must declare.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Bare(String),
    Full {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        properties: BTreeMap<String, Value>,
        #[serde(default)]
        classifications: Vec<String>,
    },
}

impl From<SelectorRepr> for ResourceSelector {
    fn from(repr: SelectorRepr) -> Self {
        match repr {
            SelectorRepr::Bare(selector) => ResourceSelector { selector, ..Default::default() },
            SelectorRepr::Full { selector, properties, classifications } => {
                ResourceSelector { selector, properties, classifications }
            }
        }
    }
}

impl From<&str> for ResourceSelector {
    fn from(selector: &str) -> Self {
        ResourceSelector { selector: selector.to_string(), ..Default::default() }
    }
}

impl ResourceSelector {
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}
