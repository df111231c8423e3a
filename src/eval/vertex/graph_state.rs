use crate::eval::{Evaluator, GraphQuery, Key, ReadyPriority};
use crate::model::ResourceId;
use crate::solution::dynamic::DynamicContext;
use crate::Result;

/// A coarse dependency on the shape of the whole graph ("some upstream vpc
/// exists") rather than on one property.
///
/// Readiness is recomputed from the query against the live graph each time
/// the vertex is a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStateVertex {
    pub query: GraphQuery,
}

impl GraphStateVertex {
    pub fn new(query: GraphQuery) -> Self {
        Self { query }
    }

    pub fn key(&self) -> Key {
        Key::GraphState(self.query.clone())
    }

    pub fn ready(&self, eval: &Evaluator) -> Result<ReadyPriority> {
        let q = &self.query;
        let tier = match q.function.as_str() {
            // More matches can always appear.
            "allUpstream" | "allDownstream" => ReadyPriority::NotReadyHigh,
            "closestDownstream" => ReadyPriority::NotReadyMid,
            name => {
                let ctx = DynamicContext::new(eval.solution());
                let found = if name.contains("pstream") {
                    !ctx.upstream_matches(&q.selector, &q.resource).is_empty()
                } else {
                    !ctx.downstream_matches(&q.selector, &q.resource).is_empty()
                };
                if found { ReadyPriority::ReadyNow } else { ReadyPriority::NotReadyMid }
            }
        };
        Ok(tier)
    }

    pub fn update_from(&mut self, other: &GraphStateVertex) {
        if self.query != other.query {
            panic!("cannot merge graph state {} into {}", other.query, self.query);
        }
    }

    pub fn renamed(&self, old: &ResourceId, new: &ResourceId) -> GraphStateVertex {
        GraphStateVertex { query: self.query.renamed(old, new) }
    }
}
