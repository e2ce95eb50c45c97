//! Expression tree produced by the parser.
//!
//! The tree is closed: every node is either a literal or a binary operation.
//! Unary minus never survives parsing (see [`super::parser`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
}

impl Operator {
    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
        }
    }

    /// Apply the operator to two operands.
    ///
    /// Division by zero yields `0.0` instead of an infinity or NaN.
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => {
                if rhs == 0.0 {
                    0.0
                } else {
                    lhs / rhs
                }
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Abstract syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    BinaryOp {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: Operator, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate the tree in place.
    ///
    /// The coordinator never calls this: every operation is dispatched to a
    /// worker. It exists as the reference result for tests and diagnostics.
    pub fn evaluate(&self) -> f64 {
        match self {
            Expr::Literal(value) => *value,
            Expr::BinaryOp { op, left, right } => op.apply(left.evaluate(), right.evaluate()),
        }
    }

    /// Number of binary operations in the tree.
    pub fn operation_count(&self) -> usize {
        match self {
            Expr::Literal(_) => 0,
            Expr::BinaryOp { left, right, .. } => {
                1 + left.operation_count() + right.operation_count()
            }
        }
    }
}
