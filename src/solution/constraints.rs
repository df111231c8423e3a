//! User-supplied property constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{PropertyRef, ResourceId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintOperator {
    /// Force the value outright; defaults and edge rules no longer apply.
    Equals,
    Add,
    Remove,
    Append,
}

impl ConstraintOperator {
    pub fn action(self) -> ConfigureAction {
        match self {
            ConstraintOperator::Equals => ConfigureAction::Set,
            ConstraintOperator::Add => ConfigureAction::Add,
            ConstraintOperator::Remove => ConfigureAction::Remove,
            ConstraintOperator::Append => ConfigureAction::Append,
        }
    }
}

/// How [`super::Solution::configure`] combines a new value with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigureAction {
    /// Replace.
    Set,
    /// Insert into a collection unless already present, merge maps, set scalars.
    Add,
    /// Remove elements or keys; a scalar is cleared.
    Remove,
    /// Insert into a collection unconditionally, merge maps, set scalars.
    Append,
}

impl fmt::Display for ConfigureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigureAction::Set => "set",
            ConfigureAction::Add => "add",
            ConfigureAction::Remove => "remove",
            ConfigureAction::Append => "append",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    pub operator: ConstraintOperator,
    pub target: ResourceId,
    pub property: String,
    pub value: Value,
}

impl ResourceConstraint {
    pub fn new(
        operator: ConstraintOperator,
        target: ResourceId,
        property: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self { operator, target, property: property.into(), value: value.into() }
    }

    pub fn applies_to(&self, reference: &PropertyRef) -> bool {
        self.target == reference.resource && self.property == reference.property
    }
}
