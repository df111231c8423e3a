//! Template lexer: splits a template into text runs and action tokens.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal text outside `{{ }}`
    Text,
    LeftDelim,  // {{
    RightDelim, // }}

    // Keywords
    If, Else, End, True, False, Nil,

    // Literals
    Integer, Float, StringLiteral,

    /// Function name
    Identifier,
    /// `.Self.Name` (text holds `Self.Name`)
    Field,

    // Punctuation
    LParen, RParen, Pipe,

    Eof,
}

/// Tokenize a template string.
///
/// `{{-` trims whitespace before the action and `-}}` trims it after,
/// the same trim markers Go templates use.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut trim_next_text = false;

    while pos < input.len() {
        let rest = &input[pos..];
        let text_len = rest.find("{{").unwrap_or(rest.len());
        let mut text = &rest[..text_len];
        if trim_next_text {
            text = text.trim_start();
        }
        let action_start = pos + text_len;
        let trims_left = input[action_start..].starts_with("{{- ");
        if trims_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Text,
                span: Span { start: pos, end: pos + text_len },
                text: text.to_string(),
            });
        }
        if action_start >= input.len() {
            break;
        }

        tokens.push(punct(TokenKind::LeftDelim, action_start, "{{"));
        let inner_start = action_start + if trims_left { 3 } else { 2 };
        let (end, trims_right) = lex_action(input, inner_start, &mut tokens)?;
        trim_next_text = trims_right;
        pos = end;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });

    Ok(tokens)
}

/// Lex the inside of one action starting at `start`. Returns the byte
/// offset just past the closing `}}` and whether it carried a trim marker.
fn lex_action(input: &str, start: usize, tokens: &mut Vec<Token>) -> Result<(usize, bool)> {
    let mut chars = input[start..].char_indices().map(|(i, c)| (i + start, c)).peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                if input[pos..].trim_start().starts_with("-}}") {
                    let close = pos + (input[pos..].len() - input[pos..].trim_start().len());
                    tokens.push(punct(TokenKind::RightDelim, close + 1, "}}"));
                    return Ok((close + 3, true));
                }
                chars.next();
            }

            '}' if input[pos..].starts_with("}}") => {
                tokens.push(punct(TokenKind::RightDelim, pos, "}}"));
                return Ok((pos + 2, false));
            }

            // String literals
            '"' | '`' => {
                let quote = ch;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) if quote == '"' => {
                            if let Some((_, escaped)) = chars.next() {
                                match escaped {
                                    'n' => s.push('\n'),
                                    't' => s.push('\t'),
                                    '\\' => s.push('\\'),
                                    '"' => s.push('"'),
                                    c => { s.push('\\'); s.push(c); }
                                }
                            }
                        }
                        Some((end, c)) if c == quote => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start: pos, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err(Error::TemplateSyntax {
                            position: pos,
                            message: "Unterminated string literal".into(),
                        }),
                    }
                }
            }

            // Numbers, optionally negative
            c if c.is_ascii_digit()
                || (c == '-' && input[pos + 1..].starts_with(|d: char| d.is_ascii_digit())) =>
            {
                let mut num = String::new();
                num.push(c);
                chars.next();
                let mut is_float = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: if is_float { TokenKind::Float } else { TokenKind::Integer },
                    span: Span { start: pos, end: pos + num.len() },
                    text: num,
                });
            }

            // Field chain: .Self.Name
            '.' => {
                chars.next();
                let mut path = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        path.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
                    return Err(Error::TemplateSyntax {
                        position: pos,
                        message: format!("Invalid field reference '.{path}'"),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Field,
                    span: Span { start: pos, end: pos + path.len() + 1 },
                    text: path,
                });
            }

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = keyword_or_ident(&ident);
                tokens.push(Token {
                    kind,
                    span: Span { start: pos, end: pos + ident.len() },
                    text: ident,
                });
            }

            '(' => { chars.next(); tokens.push(punct(TokenKind::LParen, pos, "(")); }
            ')' => { chars.next(); tokens.push(punct(TokenKind::RParen, pos, ")")); }
            '|' => { chars.next(); tokens.push(punct(TokenKind::Pipe, pos, "|")); }

            other => {
                return Err(Error::TemplateSyntax {
                    position: pos,
                    message: format!("Unexpected character: '{other}'"),
                });
            }
        }
    }

    Err(Error::TemplateSyntax {
        position: start,
        message: "Unclosed action".into(),
    })
}

fn punct(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + text.len() },
        text: text.to_string(),
    }
}

fn keyword_or_ident(s: &str) -> TokenKind {
    match s {
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "end" => TokenKind::End,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        _ => TokenKind::Identifier,
    }
}
