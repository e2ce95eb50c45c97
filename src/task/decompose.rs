//! Turns an expression tree into a set of dependent tasks.
//!
//! The traversal is post-order, so every task is emitted after the tasks it
//! references. Inserting `tasks` in order therefore never creates a forward
//! reference.

use crate::calc::Expr;
use crate::config::ServiceTimes;

use super::task::{ExpressionId, Operand, TaskId, TaskRecord};

#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Tasks in dependency order (children before parents)
    pub tasks: Vec<TaskRecord>,
    /// `Operand::Task` naming the root task, or `Operand::Value` for an
    /// expression without any operation
    pub root: Operand,
}

impl Decomposition {
    pub fn root_task(&self) -> Option<TaskId> {
        self.root.dependency()
    }

    /// Tasks that can be dispatched immediately.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks
            .iter()
            .filter(|task| task.unresolved() == 0)
            .map(|task| task.id)
    }
}

/// Decompose `expr` into tasks owned by `expression_id`.
///
/// `next_id` allocates task ids; it is called once per binary operation.
pub fn decompose(
    expr: &Expr,
    expression_id: ExpressionId,
    service_times: &ServiceTimes,
    mut next_id: impl FnMut() -> TaskId,
) -> Decomposition {
    let mut tasks = Vec::with_capacity(expr.operation_count());
    let root = visit(expr, expression_id, service_times, &mut next_id, &mut tasks);
    Decomposition { tasks, root }
}

fn visit(
    expr: &Expr,
    expression_id: ExpressionId,
    service_times: &ServiceTimes,
    next_id: &mut impl FnMut() -> TaskId,
    tasks: &mut Vec<TaskRecord>,
) -> Operand {
    match expr {
        Expr::Literal(value) => Operand::Value(*value),
        Expr::BinaryOp { op, left, right } => {
            let arg1 = visit(left, expression_id, service_times, next_id, tasks);
            let arg2 = visit(right, expression_id, service_times, next_id, tasks);
            let id = next_id();
            tasks.push(TaskRecord::new(
                id,
                expression_id,
                *op,
                arg1,
                arg2,
                service_times.for_operator(*op),
            ));
            Operand::Task(id)
        }
    }
}
