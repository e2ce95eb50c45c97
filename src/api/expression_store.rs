//! Expression store and result aggregator.
//!
//! Owns every expression and task record behind one lock. The ready queue is
//! synchronized separately and is only touched after that lock is released,
//! so queue and store locks are never held together. Queue operations are
//! synchronous, so nothing can cancel a handler between a store update and
//! the queue push that goes with it.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::calc::Expr;
use crate::config::{SchedulerConfig, ServiceTimes};
use crate::task::{
    decompose, ExpressionId, Operand, QueueError, TaskError, TaskId, TaskPayload, TaskQueue,
    TaskRecord, TaskState,
};

/// Lifecycle of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionStatus {
    /// Accepted, no task dispatched yet
    Pending,
    /// At least one task has been handed to a worker
    Computing,
    /// Root task done, `result` is set
    Completed,
    /// A task failed
    Error,
}

/// A submitted expression and its evaluation state.
#[derive(Debug, Clone, Serialize)]
pub struct Expression {
    pub id: ExpressionId,
    pub expression: String,
    pub status: ExpressionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Expression {
    fn set_status(&mut self, status: ExpressionStatus) {
        self.status = status;
        self.updated_at = now_string();
    }
}

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Expression {0} not found")]
    ExpressionNotFound(ExpressionId),

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("{0}, retry later")]
    QueueFull(QueueError),

    #[error(transparent)]
    Conflict(#[from] TaskError),
}

/// Outcome of one lease sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

#[derive(Default)]
struct StoreInner {
    expressions: BTreeMap<ExpressionId, Expression>,
    tasks: HashMap<TaskId, TaskRecord>,
    /// Reverse edges: task -> tasks that take its result as an operand
    dependents: HashMap<TaskId, Vec<TaskId>>,
    tasks_by_expression: HashMap<ExpressionId, Vec<TaskId>>,
}

/// A task id taken off the queue whose claim has not been decided yet.
///
/// If the claiming future is dropped while waiting for the store lock, the id
/// goes back on the queue.
struct Dequeued<'a> {
    queue: &'a TaskQueue,
    id: TaskId,
    settled: bool,
}

impl Dequeued<'_> {
    fn settle(&mut self) -> TaskId {
        self.settled = true;
        self.id
    }
}

impl Drop for Dequeued<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("Claim of task {} cancelled, returning it to the queue", self.id);
            self.queue.requeue(&[self.id]);
        }
    }
}

pub struct ExpressionStore {
    inner: Mutex<StoreInner>,
    last_expression_id: AtomicU64,
    last_task_id: AtomicU64,
    queue: Arc<TaskQueue>,
    service_times: ServiceTimes,
    scheduler: SchedulerConfig,
}

impl ExpressionStore {
    pub fn new(queue: Arc<TaskQueue>, service_times: ServiceTimes, scheduler: SchedulerConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            last_expression_id: AtomicU64::new(0),
            last_task_id: AtomicU64::new(0),
            queue,
            service_times,
            scheduler,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Register a parsed expression, decompose it and enqueue its ready tasks.
    ///
    /// Queue capacity for the ready tasks is reserved before anything is
    /// stored; if the queue cannot take them nothing is recorded and
    /// `StoreError::QueueFull` is returned.
    pub async fn create_expression(&self, source: &str, ast: &Expr) -> Result<ExpressionId, StoreError> {
        let id = ExpressionId::new(self.last_expression_id.fetch_add(1, Ordering::Relaxed) + 1);

        // One contiguous block of task ids per expression
        let operations = ast.operation_count() as u64;
        let mut last_task_id = self.last_task_id.fetch_add(operations, Ordering::Relaxed);
        let decomposition = decompose(ast, id, &self.service_times, || {
            last_task_id += 1;
            TaskId::new(last_task_id)
        });

        let now = now_string();
        let mut expression = Expression {
            id,
            expression: source.to_string(),
            status: ExpressionStatus::Pending,
            result: None,
            root_task_id: decomposition.root_task(),
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };

        if let Operand::Value(value) = decomposition.root {
            // Nothing to dispatch
            expression.status = ExpressionStatus::Completed;
            expression.result = Some(value);
            self.inner.lock().await.expressions.insert(id, expression);
            tracing::info!("Expression {} has no operations, completed with {}", id, value);
            return Ok(id);
        }

        let ready: Vec<TaskId> = decomposition.ready_tasks().collect();
        let admission = self.queue.reserve(ready.len()).map_err(|e| {
            tracing::warn!("Rejecting expression {}: {}", id, e);
            StoreError::QueueFull(e)
        })?;

        {
            let mut inner = self.inner.lock().await;
            let mut task_ids = Vec::with_capacity(decomposition.tasks.len());
            for task in decomposition.tasks {
                for dependency in task.dependencies() {
                    inner.dependents.entry(dependency).or_default().push(task.id);
                }
                task_ids.push(task.id);
                inner.tasks.insert(task.id, task);
            }
            tracing::info!(
                "Expression {} accepted: {} tasks, {} ready",
                id,
                task_ids.len(),
                ready.len()
            );
            inner.tasks_by_expression.insert(id, task_ids);
            inner.expressions.insert(id, expression);
        }

        admission.commit(&ready);
        Ok(id)
    }

    pub async fn get_expression(&self, id: ExpressionId) -> Result<Expression, StoreError> {
        self.inner
            .lock()
            .await
            .expressions
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExpressionNotFound(id))
    }

    /// All expressions, oldest first.
    pub async fn list_expressions(&self) -> Vec<Expression> {
        self.inner.lock().await.expressions.values().cloned().collect()
    }

    /// Tasks of one expression in creation order.
    pub async fn expression_tasks(&self, id: ExpressionId) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.expressions.contains_key(&id) {
            return Err(StoreError::ExpressionNotFound(id));
        }
        Ok(inner
            .tasks_by_expression
            .get(&id)
            .map(|ids| ids.iter().filter_map(|t| inner.tasks.get(t).cloned()).collect())
            .unwrap_or_default())
    }

    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.inner
            .lock()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    /// Hand the next ready task to a worker.
    ///
    /// With `wait` of zero this is a single non-blocking check; otherwise it
    /// waits up to `wait` for a task to become ready. Queue entries whose task
    /// is no longer `Ready` are discarded.
    pub async fn claim_next_task(&self, wait: Duration) -> Option<TaskPayload> {
        let deadline = Instant::now() + wait;
        loop {
            let id = if wait.is_zero() {
                self.queue.try_dequeue()?
            } else {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.queue.dequeue(remaining).await.ok()?
            };
            let entry = Dequeued {
                queue: &self.queue,
                id,
                settled: false,
            };
            if let Some(payload) = self.claim(entry).await {
                return Some(payload);
            }
        }
    }

    async fn claim(&self, mut entry: Dequeued<'_>) -> Option<TaskPayload> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let id = entry.settle();

        let task = inner.tasks.get_mut(&id)?;
        if task.state != TaskState::Ready {
            tracing::debug!("Skipping stale queue entry for task {} ({:?})", id, task.state);
            return None;
        }
        let expression = inner.expressions.get_mut(&task.expression_id)?;
        if expression.status == ExpressionStatus::Error {
            tracing::debug!("Skipping task {} of failed expression {}", id, expression.id);
            return None;
        }

        let lease = Duration::from_millis(task.operation_time) + self.scheduler.lease_grace;
        let payload = task.claim(Instant::now() + lease).ok()?;
        if expression.status == ExpressionStatus::Pending {
            expression.set_status(ExpressionStatus::Computing);
        }
        tracing::debug!(
            "Dispatched task {} ({} {} {}) of expression {}, attempt {}",
            id,
            payload.arg1,
            payload.operation,
            payload.arg2,
            expression.id,
            task.attempts
        );
        Some(payload)
    }

    /// Record a worker's result and propagate it.
    ///
    /// Marks the task done, substitutes the value into every dependent task,
    /// enqueues dependents that became ready, and completes the expression
    /// when the root task finishes. Reporting an already finished task is a
    /// no-op.
    pub async fn record_task_result(&self, id: TaskId, value: f64) -> Result<(), StoreError> {
        let promoted = {
            let mut inner = self.inner.lock().await;
            let inner = &mut *inner;

            let task = inner.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
            if task.state == TaskState::Done {
                tracing::debug!("Ignoring duplicate result for task {}", id);
                return Ok(());
            }
            task.complete(value)?;
            let expression_id = task.expression_id;

            let mut promoted = Vec::new();
            for parent in inner.dependents.get(&id).cloned().unwrap_or_default() {
                let Some(parent_task) = inner.tasks.get_mut(&parent) else {
                    continue;
                };
                match parent_task.resolve_operand(id, value) {
                    Ok(true) => promoted.push(parent),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Could not propagate task {} result: {}", id, e),
                }
            }

            if let Some(expression) = inner.expressions.get_mut(&expression_id) {
                if expression.root_task_id == Some(id) {
                    expression.result = Some(value);
                    expression.set_status(ExpressionStatus::Completed);
                    tracing::info!("Expression {} completed: {}", expression_id, value);
                }
            }
            promoted
        };

        if !promoted.is_empty() {
            tracing::debug!("Task {} made {:?} ready", id, promoted);
        }
        self.queue.requeue(&promoted);
        Ok(())
    }

    /// Return expired in-flight tasks to the queue, or fail them once they
    /// have used up their attempts or their expression has already failed.
    pub async fn requeue_expired_leases(&self, now: Instant) -> SweepReport {
        let report = {
            let mut inner = self.inner.lock().await;
            let inner = &mut *inner;
            let mut report = SweepReport::default();

            for task in inner.tasks.values_mut() {
                if !task.lease_expired(now) {
                    continue;
                }
                let expression = inner.expressions.get_mut(&task.expression_id);
                let expression_failed =
                    matches!(&expression, Some(e) if e.status == ExpressionStatus::Error);
                if expression_failed || task.attempts >= self.scheduler.max_task_attempts {
                    if task.fail().is_ok() {
                        report.failed.push(task.id);
                        match expression {
                            // Keep the first failure reason
                            Some(expression) if !expression_failed => {
                                expression.error = Some(format!(
                                    "Task {} gave no result after {} attempts",
                                    task.id, task.attempts
                                ));
                                expression.set_status(ExpressionStatus::Error);
                            }
                            _ => {}
                        }
                        tracing::warn!("Task {} failed after {} attempts", task.id, task.attempts);
                    }
                } else if task.release().is_ok() {
                    report.requeued.push(task.id);
                    tracing::warn!("Lease of task {} expired, requeueing", task.id);
                }
            }
            report.requeued.sort();
            report.failed.sort();
            report
        };

        self.queue.requeue(&report.requeued);
        report
    }

    /// Spawn the background lease sweep.
    pub fn start_lease_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "Starting lease sweep every {:?} (grace {:?}, max attempts {})",
                self.scheduler.sweep_interval,
                self.scheduler.lease_grace,
                self.scheduler.max_task_attempts
            );
            let mut interval = tokio::time::interval(self.scheduler.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.requeue_expired_leases(Instant::now()).await;
            }
        })
    }
}
