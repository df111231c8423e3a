//! Template AST.
//!
//! Pure data: parsed templates hold no references to a graph or context.

use crate::model::Value;

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub source: String,
    pub nodes: Vec<Node>,
}

/// One element of a template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text copied to the output.
    Text(String),
    /// `{{ pipeline }}`
    Action(Pipeline),
    /// `{{ if cond }} ... {{ else }} ... {{ end }}`; `else if` nests
    /// another `If` as the sole node of `otherwise`.
    If {
        condition: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// `cmd | cmd | cmd`: each command's result is appended as the last
/// argument of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// `func arg arg` or a single operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Function name, only valid as the first word of a command.
    Function(String),
    /// `.Self.Name` → `["Self", "Name"]`
    Field(Vec<String>),
    Literal(Value),
    /// `( pipeline )`
    Nested(Box<Pipeline>),
}

impl Template {
    /// The lone pipeline when the template is exactly one action
    /// (surrounding whitespace ignored).
    pub fn single_action(&self) -> Option<&Pipeline> {
        let mut actions = self.nodes.iter().filter(|n| match n {
            Node::Text(t) => !t.trim().is_empty(),
            _ => true,
        });
        match (actions.next(), actions.next()) {
            (Some(Node::Action(p)), None) => Some(p),
            _ => None,
        }
    }

    /// Whether the template contains no actions at all.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }
}
