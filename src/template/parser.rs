//! Template recursive descent parser.
//!
//! Parses token streams into AST nodes. Supports:
//! - text runs and `{{ }}` actions
//! - `if` / `else` / `else if` / `end`
//! - commands, parenthesised pipelines and `|` pipes

use crate::{Error, Result};
use crate::model::Value;
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Parser state: wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// Kind of the token after the current one.
    fn peek_next_kind(&self) -> TokenKind {
        self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::TemplateSyntax {
            position: self.peek().span.start,
            message: msg,
        }
    }
}

/// What ended a list of nodes.
#[derive(Debug, PartialEq)]
enum Terminator {
    Eof,
    Else,
    ElseIf,
    End,
}

/// Parse a complete template from tokens.
pub fn parse_template(source: &str, tokens: &[Token]) -> Result<Template> {
    let mut p = Parser::new(tokens);
    let (nodes, term) = parse_nodes(&mut p)?;
    if term != Terminator::Eof {
        return Err(p.error(format!("Unexpected {term:?} outside of an if block")));
    }
    Ok(Template { source: source.to_string(), nodes })
}

fn parse_nodes(p: &mut Parser) -> Result<(Vec<Node>, Terminator)> {
    let mut nodes = Vec::new();
    loop {
        match p.peek_kind() {
            TokenKind::Eof => return Ok((nodes, Terminator::Eof)),
            TokenKind::Text => {
                let text = p.advance().text.clone();
                nodes.push(Node::Text(text));
            }
            TokenKind::LeftDelim => {
                p.advance();
                match p.peek_kind() {
                    TokenKind::End => {
                        p.advance();
                        p.expect(TokenKind::RightDelim)?;
                        return Ok((nodes, Terminator::End));
                    }
                    TokenKind::Else if p.peek_next_kind() == TokenKind::If => {
                        // leave `if` for the caller, which parses the nested block
                        p.advance();
                        return Ok((nodes, Terminator::ElseIf));
                    }
                    TokenKind::Else => {
                        p.advance();
                        p.expect(TokenKind::RightDelim)?;
                        return Ok((nodes, Terminator::Else));
                    }
                    TokenKind::If => nodes.push(parse_if(p)?),
                    _ => {
                        let pipeline = parse_pipeline(p)?;
                        p.expect(TokenKind::RightDelim)?;
                        nodes.push(Node::Action(pipeline));
                    }
                }
            }
            other => return Err(p.error(format!("Unexpected token {other:?}"))),
        }
    }
}

/// Parse from the `if` keyword through the matching `end`.
fn parse_if(p: &mut Parser) -> Result<Node> {
    p.expect(TokenKind::If)?;
    let condition = parse_pipeline(p)?;
    p.expect(TokenKind::RightDelim)?;

    let (then, term) = parse_nodes(p)?;
    let otherwise = match term {
        Terminator::End => Vec::new(),
        Terminator::Else => {
            let (otherwise, term) = parse_nodes(p)?;
            if term != Terminator::End {
                return Err(p.error("Expected {{ end }} after else branch".into()));
            }
            otherwise
        }
        // `else if` shares the outer block's `end`
        Terminator::ElseIf => vec![parse_if(p)?],
        Terminator::Eof => return Err(p.error("Unterminated if block".into())),
    };
    Ok(Node::If { condition, then, otherwise })
}

fn parse_pipeline(p: &mut Parser) -> Result<Pipeline> {
    let mut commands = vec![parse_command(p)?];
    while p.eat(TokenKind::Pipe) {
        let cmd = parse_command(p)?;
        if !matches!(cmd.args.first(), Some(Operand::Function(_))) {
            return Err(p.error("Pipeline stage must be a function call".into()));
        }
        commands.push(cmd);
    }
    Ok(Pipeline { commands })
}

fn parse_command(p: &mut Parser) -> Result<Command> {
    let mut args = Vec::new();
    while !matches!(p.peek_kind(), TokenKind::RightDelim | TokenKind::Pipe | TokenKind::RParen | TokenKind::Eof) {
        let first = args.is_empty();
        args.push(parse_operand(p, first)?);
    }
    if args.is_empty() {
        return Err(p.error("Missing command".into()));
    }
    Ok(Command { args })
}

fn parse_operand(p: &mut Parser, first: bool) -> Result<Operand> {
    let tok = p.peek().clone();
    let operand = match tok.kind {
        TokenKind::Identifier if first => Operand::Function(tok.text),
        TokenKind::Identifier => {
            return Err(p.error(format!("Function '{}' must be parenthesised when used as an argument", tok.text)));
        }
        TokenKind::Field => Operand::Field(tok.text.split('.').map(str::to_string).collect()),
        TokenKind::StringLiteral => Operand::Literal(Value::String(tok.text)),
        TokenKind::Integer => Operand::Literal(Value::Int(
            tok.text.parse().map_err(|_| p.error(format!("Invalid integer '{}'", tok.text)))?,
        )),
        TokenKind::Float => Operand::Literal(Value::Float(
            tok.text.parse().map_err(|_| p.error(format!("Invalid float '{}'", tok.text)))?,
        )),
        TokenKind::True => Operand::Literal(Value::Bool(true)),
        TokenKind::False => Operand::Literal(Value::Bool(false)),
        TokenKind::Nil => Operand::Literal(Value::Null),
        TokenKind::LParen => {
            p.advance();
            let inner = parse_pipeline(p)?;
            p.expect(TokenKind::RParen)?;
            return Ok(Operand::Nested(Box::new(inner)));
        }
        other => return Err(p.error(format!("Unexpected token {other:?} '{}'", tok.text))),
    };
    p.advance();
    Ok(operand)
}

// ============================================================================
// Tests
// ============================================================================
