//! Task module - atomic operations, their decomposition and dispatch queue.
//!
//! - `task`: task records and their state machine
//! - `decompose`: expression tree to dependent tasks
//! - `queue`: bounded FIFO of ready tasks

pub mod decompose;
pub mod queue;
pub mod task;

pub use decompose::{decompose, Decomposition};
pub use queue::{Admission, QueueError, TaskQueue};
pub use task::{ExpressionId, Operand, TaskError, TaskId, TaskPayload, TaskRecord, TaskState};
