//! API request and response types.

use serde::{Deserialize, Serialize};

use super::expression_store::Expression;
use crate::task::{ExpressionId, TaskId, TaskPayload, TaskRecord};

/// Request to evaluate an expression.
#[derive(Debug, Clone, Deserialize)]
pub struct CalculateRequest {
    pub expression: String,
}

/// Response after accepting an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculateResponse {
    pub id: ExpressionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpressionListResponse {
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpressionResponse {
    pub expression: Expression,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskRecord>,
}

/// A task handed to a polling worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: TaskPayload,
}

/// A worker's result for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRequest {
    pub id: TaskId,
    pub result: f64,
}

/// Query parameters for a worker poll.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPollQuery {
    /// Optional long-poll wait in milliseconds
    pub wait_ms: Option<u64>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Ready tasks waiting for a worker
    pub queue_len: usize,
}
