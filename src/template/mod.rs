//! # Template Language
//!
//! The small Go-template-like language knowledge-base templates are written
//! in: text with `{{ }}` actions, `if`/`else`/`end`, function commands and
//! pipes. Pure functions: parsing needs no context, execution is driven by
//! whatever [`TemplateFunctions`] the caller passes in.

pub mod ast;
pub mod exec;
pub mod lexer;
pub mod parser;

use crate::Result;

pub use ast::Template;
pub use exec::{arg_to_resource_id, execute, ids_to_value, DynamicData, TemplateFunctions, BUILTINS};

impl Template {
    /// Parse a template string into an AST.
    pub fn parse(source: &str) -> Result<Template> {
        let tokens = lexer::tokenize(source)?;
        parser::parse_template(source, &tokens)
    }
}
