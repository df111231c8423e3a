//! # opgraph: Operational Evaluation Engine
//!
//! Takes a graph of infrastructure resources whose properties are only
//! partially known and configures it until every resource is operational:
//! all required fields set, all implied sub-resources created, every
//! abstract edge expanded into a concrete chain of resources.
//!
//! ## Design Principles
//!
//! 1. **Discover, then schedule**: dependencies are found by running each
//!    configuration template against a capturing context, never declared.
//! 2. **The graph moves under you**: evaluating one vertex may add resources,
//!    edges and brand-new vertices; the working set is recomputed each round.
//! 3. **Determinism is a contract**: ready batches are sorted, topological
//!    walks are stable, and the round history is kept for inspection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opgraph::{Evaluator, KnowledgeBase, Resource, ResourceId, Solution};
//!
//! # fn example(kb: KnowledgeBase) -> opgraph::Result<()> {
//! let mut eval = Evaluator::new(Solution::new(Arc::new(kb)));
//! let function = Resource::new(ResourceId::new("aws", "lambda_function", "api"));
//! eval.add_operational_resource(function)?;
//! eval.evaluate()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Subsystems
//!
//! | Module | Role |
//! |--------|------|
//! | `storage` | Cycle-rejecting graph store shared by the evaluator and the live graph |
//! | `template` | Configuration template language (lexer, parser, executor) |
//! | `knowledge` | Resource/edge templates and path-satisfaction metadata |
//! | `solution` | Live resource graph, constraints, template functions |
//! | `eval` | Vertices, dependency capture, readiness tiers, the evaluation loop |
//! | `path` | Path-search seam turning abstract edges into resource chains |

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod eval;
pub mod export;
pub mod knowledge;
pub mod model;
pub mod path;
pub mod rules;
pub mod solution;
pub mod storage;
pub mod template;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::EvalConfig;
pub use eval::{Evaluator, GraphQuery, Key, ReadyPriority, Vertex};
pub use knowledge::{
    EdgeTemplate, KnowledgeBase, OperationalRule, PathSatisfaction, PropertyTemplate,
    PropertyType, ResourceTemplate,
};
pub use model::{PropertyRef, Resource, ResourceId, SimpleEdge, Value};
pub use path::{EdgeExpander, ExpansionInput, ExpansionResult, KbPathExpander};
pub use solution::{ConfigureAction, ConstraintOperator, ResourceConstraint, Solution};
pub use storage::{GraphError, MemoryStore};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("template syntax error at position {position}: {message}")]
    TemplateSyntax { position: usize, message: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("possible circular dependency detected in properties graph: {remaining} remaining")]
    CircularDependency { remaining: usize },

    #[error("operational rule error: {0}")]
    OperationalRule(String),

    #[error("required property {reference} has no value")]
    Unresolved { reference: String },

    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_messages(errs: &[Error]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

impl Error {
    /// Prefix this error with a description of what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context { context: context.into(), source: Box::new(self) }
    }

    /// Fold a batch of errors into one: none is success, one is itself,
    /// several become [`Error::Multiple`] (nested batches are flattened).
    pub fn join(errs: Vec<Error>) -> Result<()> {
        let mut flat = Vec::with_capacity(errs.len());
        for err in errs {
            match err {
                Error::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Multiple(flat)),
        }
    }

    /// Every leaf error, with `Context` wrappers and `Multiple` batches unwound.
    pub fn leaves(&self) -> Vec<&Error> {
        match self {
            Error::Context { source, .. } => source.leaves(),
            Error::Multiple(errs) => errs.iter().flat_map(Error::leaves).collect(),
            other => vec![other],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach context to the error side of a `Result`.
pub(crate) trait ResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_empty_is_ok() {
        assert!(Error::join(Vec::new()).is_ok());
    }

    #[test]
    fn test_join_flattens_batches() {
        let err = Error::join(vec![
            Error::NotFound("a".into()),
            Error::Multiple(vec![Error::NotFound("b".into()), Error::NotFound("c".into())]),
        ])
        .unwrap_err();
        match err {
            Error::Multiple(errs) => assert_eq!(errs.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_context_leaves() {
        let err = Error::NotFound("x".into()).context("failed to evaluate y");
        assert_eq!(err.to_string(), "failed to evaluate y: not found: x");
        assert!(matches!(err.leaves()[0], Error::NotFound(_)));
    }
}
