//! # Resource Graph Model
//!
//! Plain data that crosses every boundary: knowledge base ↔ solution ↔
//! evaluator ↔ caller. No graph state, no evaluation logic.

pub mod resource;
pub mod resource_id;
pub mod value;

pub use resource::{PathSegment, PropertyPath, Resource};
pub use resource_id::{PropertyRef, ResourceId, SimpleEdge};
pub use value::Value;
