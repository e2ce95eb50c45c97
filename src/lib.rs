//! # distcalc
//!
//! Distributed evaluation of arithmetic expressions.
//!
//! A coordinator accepts expressions, splits each into one task per binary
//! operation and hands ready tasks to worker agents that poll over HTTP.
//!
//! ## Architecture
//!
//! ```text
//!   client ──POST /api/v1/calculate──▶ ┌──────────────────────────┐
//!                                      │       Coordinator        │
//!                                      │  parse → decompose       │
//!                                      │  ExpressionStore ◀─┐     │
//!                                      │        │           │     │
//!                                      │        ▼           │     │
//!                                      │    TaskQueue       │     │
//!                                      └────────┬───────────┼─────┘
//!                       GET /internal/task      │           │ POST /internal/task
//!                                               ▼           │
//!                                      ┌──────────────────────────┐
//!                                      │   Agent (N workers)      │
//!                                      └──────────────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. Parse the expression and decompose it into tasks
//! 2. Enqueue tasks whose operands are all literals
//! 3. Workers claim tasks, compute, and report results
//! 4. Each result resolves dependent tasks; newly ready ones are enqueued
//! 5. The root task's result completes the expression
//!
//! ## Modules
//! - `calc`: expression syntax tree and parser
//! - `task`: task records, decomposition, ready queue
//! - `api`: expression store, aggregation, HTTP routes
//! - `agent`: worker loops and the coordinator client

pub mod agent;
pub mod api;
pub mod calc;
pub mod config;
pub mod task;
pub mod util;

pub use config::Config;
