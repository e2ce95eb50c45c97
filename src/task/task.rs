//! Task records: one atomic binary operation of an expression.
//!
//! # Invariants
//! - `unresolved` equals the number of operands that are `Operand::Task`
//! - `state == Waiting` iff `unresolved > 0` (until the task is claimed)
//! - `result.is_some()` iff `state == Done`

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::calc::Operator;

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(TaskId);
numeric_id!(ExpressionId);

/// An operand is either known or the pending result of another task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(f64),
    Task(TaskId),
}

impl Operand {
    pub fn value(&self) -> Option<f64> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Task(_) => None,
        }
    }

    pub fn dependency(&self) -> Option<TaskId> {
        match self {
            Operand::Task(id) => Some(*id),
            Operand::Value(_) => None,
        }
    }
}

/// Lifecycle of a task.
///
/// # State Machine
/// ```text
/// Waiting -> Ready -> InFlight -> Done
///              ^         |   \-> Failed
///              \---------/ (lease expired)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// At least one operand is unresolved
    Waiting,
    /// All operands resolved, eligible for dispatch
    Ready,
    /// Claimed by a worker, result not yet recorded
    InFlight,
    /// Result recorded
    Done,
    /// Gave up after too many expired leases
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// The payload a worker receives: a single operation over two literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: TaskId,
    pub arg1: f64,
    pub arg2: f64,
    pub operation: Operator,
    /// Simulated service time in milliseconds
    pub operation_time: u64,
}

impl TaskPayload {
    /// Compute the operation. Division by zero yields `0`.
    pub fn compute(&self) -> f64 {
        self.operation.apply(self.arg1, self.arg2)
    }
}

/// A task as tracked by the expression store.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub expression_id: ExpressionId,
    pub operation: Operator,
    pub arg1: Operand,
    pub arg2: Operand,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    pub operation_time: u64,
    /// Number of times this task has been dispatched
    pub attempts: u32,
    #[serde(skip)]
    unresolved: usize,
    #[serde(skip)]
    lease_deadline: Option<Instant>,
}

impl TaskRecord {
    /// Create a task. It starts `Ready` if both operands are literals,
    /// otherwise `Waiting`.
    pub fn new(
        id: TaskId,
        expression_id: ExpressionId,
        operation: Operator,
        arg1: Operand,
        arg2: Operand,
        operation_time: u64,
    ) -> Self {
        let unresolved = [arg1, arg2]
            .iter()
            .filter(|operand| operand.dependency().is_some())
            .count();
        Self {
            id,
            expression_id,
            operation,
            arg1,
            arg2,
            state: if unresolved == 0 {
                TaskState::Ready
            } else {
                TaskState::Waiting
            },
            result: None,
            operation_time,
            attempts: 0,
            unresolved,
            lease_deadline: None,
        }
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    pub fn lease_deadline(&self) -> Option<Instant> {
        self.lease_deadline
    }

    /// Task ids this task is waiting on.
    pub fn dependencies(&self) -> impl Iterator<Item = TaskId> + '_ {
        [self.arg1, self.arg2]
            .into_iter()
            .filter_map(|operand| operand.dependency())
    }

    /// Substitute the value of a finished dependency.
    ///
    /// Returns `true` when this resolved the last operand and the task
    /// moved to `Ready`.
    pub fn resolve_operand(&mut self, dependency: TaskId, value: f64) -> Result<bool, TaskError> {
        if self.state != TaskState::Waiting {
            return Err(self.invalid_transition(TaskState::Ready));
        }
        let mut matched = 0;
        for operand in [&mut self.arg1, &mut self.arg2] {
            if operand.dependency() == Some(dependency) {
                *operand = Operand::Value(value);
                matched += 1;
            }
        }
        if matched == 0 {
            return Err(TaskError::UnknownDependency {
                task: self.id,
                dependency,
            });
        }
        self.unresolved = self.unresolved.saturating_sub(matched);
        if self.unresolved == 0 {
            self.state = TaskState::Ready;
            return Ok(true);
        }
        Ok(false)
    }

    /// Hand the task to a worker until `deadline`.
    ///
    /// # Precondition
    /// `self.state == Ready`
    pub fn claim(&mut self, deadline: Instant) -> Result<TaskPayload, TaskError> {
        if self.state != TaskState::Ready {
            return Err(self.invalid_transition(TaskState::InFlight));
        }
        let payload = self.payload().ok_or(TaskError::UnresolvedOperand(self.id))?;
        self.state = TaskState::InFlight;
        self.attempts += 1;
        self.lease_deadline = Some(deadline);
        Ok(payload)
    }

    /// Record the result.
    ///
    /// Accepted from `InFlight` and from `Ready` (a late report for a task
    /// whose lease expired and was requeued).
    pub fn complete(&mut self, value: f64) -> Result<(), TaskError> {
        match self.state {
            TaskState::InFlight | TaskState::Ready if self.unresolved == 0 => {
                self.state = TaskState::Done;
                self.result = Some(value);
                self.lease_deadline = None;
                Ok(())
            }
            _ => Err(self.invalid_transition(TaskState::Done)),
        }
    }

    /// Return an expired in-flight task to `Ready`.
    pub fn release(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::InFlight {
            return Err(self.invalid_transition(TaskState::Ready));
        }
        self.state = TaskState::Ready;
        self.lease_deadline = None;
        Ok(())
    }

    /// Give up on an in-flight task.
    pub fn fail(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::InFlight {
            return Err(self.invalid_transition(TaskState::Failed));
        }
        self.state = TaskState::Failed;
        self.lease_deadline = None;
        Ok(())
    }

    /// Whether the lease of an in-flight task has run out at `now`.
    pub fn lease_expired(&self, now: Instant) -> bool {
        self.state == TaskState::InFlight
            && self.lease_deadline.map(|d| d <= now).unwrap_or(false)
    }

    fn payload(&self) -> Option<TaskPayload> {
        Some(TaskPayload {
            id: self.id,
            arg1: self.arg1.value()?,
            arg2: self.arg2.value()?,
            operation: self.operation,
            operation_time: self.operation_time,
        })
    }

    fn invalid_transition(&self, to: TaskState) -> TaskError {
        TaskError::InvalidTransition {
            task: self.id,
            from: self.state,
            to,
        }
    }
}

/// Errors that can occur during task state transitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Task {task}: invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {0} still has unresolved operands")]
    UnresolvedOperand(TaskId),

    #[error("Task {task} does not depend on task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },
}
