//! # Knowledge Base
//!
//! What the evaluator knows about resource types without looking at any
//! particular graph: property templates, edge rules, classifications and
//! path-satisfaction routes.

pub mod kb;
pub mod property;
pub mod rule;

pub use kb::{EdgeTemplate, KnowledgeBase, PathSatisfaction, PathSatisfactionRoutes, ResourceTemplate};
pub use property::{PropertyTemplate, PropertyType};
pub use rule::{
    ConfigurationRule, Configuration, Direction, OperationalRule, OperationalStep, ResourceSelector,
};
