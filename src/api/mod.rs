//! HTTP API of the coordinator.
//!
//! ## Endpoints
//!
//! - `GET /` - Dashboard page
//! - `GET /api/health` - Health check
//! - `POST /api/v1/calculate` - Submit an expression
//! - `GET /api/v1/expressions` - List expressions
//! - `GET /api/v1/expressions/{id}` - Get one expression
//! - `GET /api/v1/expressions/{id}/tasks` - Get the tasks of one expression
//! - `GET /internal/task` - Worker poll (`?wait_ms=` for long-polling)
//! - `POST /internal/task` - Worker result

pub mod expression_store;
mod routes;
pub mod types;

pub use expression_store::{Expression, ExpressionStatus, ExpressionStore, StoreError, SweepReport};
pub use routes::{router, serve, AppState};
pub use types::*;
