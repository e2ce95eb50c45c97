//! Infix arithmetic parser.
//!
//! Grammar (usual precedence, left-associative binary operators):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := number | '(' expr ')'
//! ```
//!
//! Unary minus is folded away: `-<literal>` becomes a negative literal and
//! `-<subtree>` becomes `0 - <subtree>`, so the resulting tree only holds
//! literals and binary operations.

use super::ast::{Expr, Operator};

/// Deepest parenthesis / unary-minus nesting the parser accepts.
pub const MAX_DEPTH: usize = 256;

/// Most binary operations one expression may hold. Decomposition and
/// evaluation recurse over the tree, and a tree is never deeper than its
/// operation count.
pub const MAX_OPERATIONS: usize = 2048;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expression is empty")]
    Empty,

    #[error("Invalid character '{ch}' at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("Invalid number '{literal}' at position {position}")]
    InvalidNumber { literal: String, position: usize },

    #[error("Unexpected '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unbalanced parentheses at position {position}")]
    UnbalancedParentheses { position: usize },

    #[error("Expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    #[error("Expression has more than {} operations", MAX_OPERATIONS)]
    TooManyOperations,
}

/// Fast pre-validation: reject blank input and any character outside
/// `[0-9+\-*/().]` and whitespace, without tokenizing.
pub fn validate(input: &str) -> Result<(), ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    for (position, ch) in input.chars().enumerate() {
        if !is_allowed(ch) {
            return Err(ParseError::InvalidCharacter { ch, position });
        }
    }
    Ok(())
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_digit() || matches!(ch, '+' | '-' | '*' | '/' | '.' | '(' | ')') || ch.is_whitespace()
}

/// Parse an expression into a tree.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    validate(input)?;
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let (expr, _) = parser.expr(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) if token.kind == TokenKind::RParen => Err(ParseError::UnbalancedParentheses {
            position: token.position,
        }),
        Some(token) => Err(ParseError::UnexpectedToken {
            token: token.kind.to_string(),
            position: token.position,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Op(Operator),
    LParen,
    RParen,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Op(op) => write!(f, "{}", op),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let kind = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = parse_number(&literal).ok_or_else(|| ParseError::InvalidNumber {
                    literal: literal.clone(),
                    position: start,
                })?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    position: start,
                });
                continue;
            }
            '+' => TokenKind::Op(Operator::Add),
            '-' => TokenKind::Op(Operator::Subtract),
            '*' => TokenKind::Op(Operator::Multiply),
            '/' => TokenKind::Op(Operator::Divide),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            other => {
                return Err(ParseError::InvalidCharacter {
                    ch: other,
                    position: i,
                })
            }
        };
        tokens.push(Token { kind, position: i });
        i += 1;
    }

    Ok(tokens)
}

/// Accepts `12`, `1.5`, `.5` and `5.`; rejects a bare `.` or repeated dots.
fn parse_number(literal: &str) -> Option<f64> {
    if literal == "." || literal.matches('.').count() > 1 {
        return None;
    }
    literal.parse::<f64>().ok().filter(|v| v.is_finite())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_op(&self, ops: &[Operator]) -> Option<Operator> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    // Each production returns the subtree with its operation count.

    fn expr(&mut self, nesting: usize) -> Result<(Expr, usize), ParseError> {
        let (mut left, mut ops) = self.term(nesting)?;
        while let Some(op) = self.peek_op(&[Operator::Add, Operator::Subtract]) {
            self.pos += 1;
            let (right, right_ops) = self.term(nesting)?;
            ops = check_operations(ops + right_ops + 1)?;
            left = Expr::binary(op, left, right);
        }
        Ok((left, ops))
    }

    fn term(&mut self, nesting: usize) -> Result<(Expr, usize), ParseError> {
        let (mut left, mut ops) = self.unary(nesting)?;
        while let Some(op) = self.peek_op(&[Operator::Multiply, Operator::Divide]) {
            self.pos += 1;
            let (right, right_ops) = self.unary(nesting)?;
            ops = check_operations(ops + right_ops + 1)?;
            left = Expr::binary(op, left, right);
        }
        Ok((left, ops))
    }

    fn unary(&mut self, nesting: usize) -> Result<(Expr, usize), ParseError> {
        if self.peek_op(&[Operator::Subtract]).is_some() {
            self.pos += 1;
            let nesting = check_nesting(nesting + 1)?;
            let (operand, ops) = self.unary(nesting)?;
            return Ok(match operand {
                Expr::Literal(value) => (Expr::Literal(-value), ops),
                subtree => (
                    Expr::binary(Operator::Subtract, Expr::Literal(0.0), subtree),
                    check_operations(ops + 1)?,
                ),
            });
        }
        self.primary(nesting)
    }

    fn primary(&mut self, nesting: usize) -> Result<(Expr, usize), ParseError> {
        let token = self.next().ok_or(ParseError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(value) => Ok((Expr::Literal(value), 0)),
            TokenKind::LParen => {
                let nesting = check_nesting(nesting + 1)?;
                let inner = self.expr(nesting)?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(ParseError::UnexpectedToken {
                        token: other.kind.to_string(),
                        position: other.position,
                    }),
                    None => Err(ParseError::UnbalancedParentheses {
                        position: token.position,
                    }),
                }
            }
            TokenKind::RParen => Err(ParseError::UnbalancedParentheses {
                position: token.position,
            }),
            other => Err(ParseError::UnexpectedToken {
                token: other.to_string(),
                position: token.position,
            }),
        }
    }
}

fn check_nesting(nesting: usize) -> Result<usize, ParseError> {
    if nesting > MAX_DEPTH {
        Err(ParseError::TooDeep)
    } else {
        Ok(nesting)
    }
}

fn check_operations(ops: usize) -> Result<usize, ParseError> {
    if ops > MAX_OPERATIONS {
        Err(ParseError::TooManyOperations)
    } else {
        Ok(ops)
    }
}
