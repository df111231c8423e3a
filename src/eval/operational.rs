//! Operational view: mutate the live graph and register the change with
//! the evaluator in one call.

use super::{Evaluator, GraphChanges};
use crate::model::{Resource, ResourceId, SimpleEdge};
use crate::Result;

impl Evaluator {
    pub fn add_operational_resource(&self, resource: Resource) -> Result<()> {
        self.solution().add_resource(resource.clone())?;
        self.add_resources(vec![resource])
    }

    pub fn add_operational_edge(&self, edge: SimpleEdge) -> Result<()> {
        if !self.solution().has_edge(&edge) {
            self.solution().add_edge(&edge)?;
        }
        self.add_edges(vec![edge])
    }

    /// Register the rules of edges that already exist concretely. Edges
    /// without a template need nothing more.
    pub fn make_edges_operational(&self, edges: Vec<SimpleEdge>) -> Result<()> {
        let mut changes = GraphChanges::default();
        for edge in &edges {
            self.stage_edge_vertex(&mut changes, edge)?;
        }
        self.enqueue(changes)
    }

    pub fn remove_operational_resource(&self, id: &ResourceId) -> Result<()> {
        self.remove_resource(id)?;
        self.solution().remove_resource(id)?;
        Ok(())
    }

    pub fn remove_operational_edge(&self, edge: &SimpleEdge) -> Result<()> {
        self.remove_edge(edge)?;
        self.solution().remove_edge(edge)
    }
}
