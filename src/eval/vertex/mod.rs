//! Evaluation graph vertices.
//!
//! A closed set of four kinds behind one capability surface: identity,
//! dependency discovery, evaluation, merging and readiness.

mod edge;
mod graph_state;
mod path_expand;
mod property;

pub use edge::EdgeVertex;
pub use graph_state::GraphStateVertex;
pub use path_expand::PathExpandVertex;
pub use property::PropertyVertex;

use super::{Evaluator, GraphChanges, Key, ReadyPriority};
use crate::model::ResourceId;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    Property(PropertyVertex),
    Edge(EdgeVertex),
    GraphState(GraphStateVertex),
    PathExpand(PathExpandVertex),
}

impl Vertex {
    pub fn key(&self) -> Key {
        match self {
            Vertex::Property(v) => v.key(),
            Vertex::Edge(v) => v.key(),
            Vertex::GraphState(v) => v.key(),
            Vertex::PathExpand(v) => v.key(),
        }
    }

    /// Discover what this vertex needs evaluated first, against the graph
    /// as it is now. Never mutates the evaluator.
    pub fn dependencies(&self, eval: &Evaluator) -> Result<GraphChanges> {
        match self {
            Vertex::Property(v) => v.dependencies(eval),
            Vertex::Edge(v) => v.dependencies(eval),
            Vertex::GraphState(_) => Ok(GraphChanges::default()),
            Vertex::PathExpand(v) => v.dependencies(eval),
        }
    }

    pub fn evaluate(&self, eval: &mut Evaluator) -> Result<()> {
        match self {
            Vertex::Property(v) => v.evaluate(eval),
            Vertex::Edge(v) => v.evaluate(eval),
            Vertex::GraphState(_) => Ok(()),
            Vertex::PathExpand(v) => v.evaluate(eval),
        }
    }

    pub fn ready(&self, eval: &Evaluator) -> Result<ReadyPriority> {
        match self {
            Vertex::Property(v) => Ok(v.ready(eval)),
            Vertex::GraphState(v) => v.ready(eval),
            Vertex::Edge(_) | Vertex::PathExpand(_) => Ok(ReadyPriority::ReadyNow),
        }
    }

    /// Merge `other`, which shares this vertex's key, into `self`.
    ///
    /// # Panics
    ///
    /// When the two vertices are of different kinds or identities.
    pub fn update_from(&mut self, other: &Vertex) {
        match (self, other) {
            (Vertex::Property(a), Vertex::Property(b)) => a.update_from(b),
            (Vertex::Edge(a), Vertex::Edge(b)) => a.update_from(b),
            (Vertex::GraphState(a), Vertex::GraphState(b)) => a.update_from(b),
            (Vertex::PathExpand(a), Vertex::PathExpand(b)) => a.update_from(b),
            (a, b) => panic!("cannot merge vertex {} into {}", b.key(), a.key()),
        }
    }

    /// The vertex as it must look after resource `old` became `new`.
    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> Vertex {
        match self {
            Vertex::Property(v) => Vertex::Property(v.renamed(old, new)),
            Vertex::Edge(v) => Vertex::Edge(v.renamed(old, new)),
            Vertex::GraphState(v) => Vertex::GraphState(v.renamed(old, new)),
            Vertex::PathExpand(v) => Vertex::PathExpand(v.renamed(old, new)),
        }
    }
}
