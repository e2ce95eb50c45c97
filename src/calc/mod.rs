//! Arithmetic expressions: syntax tree and parser.

mod ast;
mod parser;

pub use ast::{Expr, Operator};
pub use parser::{parse, validate, ParseError, MAX_DEPTH, MAX_OPERATIONS};
