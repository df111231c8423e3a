//! # Graph Store
//!
//! A directed graph keyed by an opaque, ordered identifier, storing one value
//! per vertex plus string attributes for diagnostics. Every mutation goes
//! through one coarse `RwLock`, so other subsystems (the diagnostic exporter)
//! may read a snapshot while nobody is writing.
//!
//! ## Instances
//!
//! | Instance | Cycles | Description |
//! |----------|--------|-------------|
//! | evaluator `graph` | rejected | Full evaluation history |
//! | evaluator `unevaluated` | rejected | Working set of pending keys |
//! | solution live graph | allowed | Concrete resources and their edges |

pub mod memory;

pub use memory::MemoryStore;

// ============================================================================
// Errors
// ============================================================================

/// Graph-mutation errors. Keys are carried in their display form so the
/// error type stays independent of the store's key type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("vertex {0} already exists with a different value")]
    VertexExists(String),

    #[error("vertex {0} not found")]
    VertexNotFound(String),

    #[error("edge {from} -> {to} not found")]
    EdgeNotFound { from: String, to: String },

    #[error("edge {from} -> {to} would create a cycle")]
    WouldCycle { from: String, to: String },

    #[error("graph contains a cycle ({remaining} vertices unsorted)")]
    CycleDetected { remaining: usize },
}
