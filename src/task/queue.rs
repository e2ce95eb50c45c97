//! Bounded FIFO of ready task ids.
//!
//! The capacity bound applies to admission of new work (`enqueue`,
//! `enqueue_all`, `reserve`). Tasks promoted by the aggregator or returned by
//! the lease sweep go through `requeue`, which ignores the bound: those tasks
//! belong to expressions that were already accepted and must not stall.
//!
//! Every operation except `dequeue` is synchronous. The internal lock is held
//! only for the push or pop itself and never across an await, so callers can
//! pair a queue operation with a store update without a cancellation point in
//! between.

use std::collections::VecDeque;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Task queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("No task available")]
    NoTaskAvailable,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<TaskId>,
    /// Slots promised to admissions that have not pushed yet
    reserved: usize,
}

pub struct TaskQueue {
    state: StdMutex<QueueState>,
    capacity: usize,
    notify: Notify,
}

/// Queue capacity held for tasks that are about to be pushed.
///
/// Dropping it without calling [`Admission::commit`] gives the slots back.
#[must_use]
pub struct Admission<'a> {
    queue: &'a TaskQueue,
    slots: usize,
}

impl Admission<'_> {
    /// Push the admitted tasks and release the reservation.
    pub fn commit(mut self, ids: &[TaskId]) {
        debug_assert!(ids.len() <= self.slots);
        {
            let mut state = self.queue.lock();
            state.reserved -= self.slots;
            state.ready.extend(ids.iter().copied());
        }
        self.slots = 0;
        self.queue.wake(ids.len());
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.slots > 0 {
            self.queue.lock().reserved -= self.slots;
        }
    }
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: StdMutex::new(QueueState {
                ready: VecDeque::with_capacity(capacity),
                reserved: 0,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Pushes and pops cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ready.is_empty()
    }

    /// Hold room for `slots` tasks, failing if the queue cannot take them.
    pub fn reserve(&self, slots: usize) -> Result<Admission<'_>, QueueError> {
        let mut state = self.lock();
        if state.ready.len() + state.reserved + slots > self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        state.reserved += slots;
        Ok(Admission { queue: self, slots })
    }

    /// Append one task, failing if the queue is at capacity.
    pub fn enqueue(&self, id: TaskId) -> Result<(), QueueError> {
        self.enqueue_all(&[id])
    }

    /// Append several tasks, all or nothing.
    pub fn enqueue_all(&self, ids: &[TaskId]) -> Result<(), QueueError> {
        self.reserve(ids.len())?.commit(ids);
        Ok(())
    }

    /// Append tasks regardless of capacity.
    pub fn requeue(&self, ids: &[TaskId]) {
        if ids.is_empty() {
            return;
        }
        self.lock().ready.extend(ids.iter().copied());
        self.wake(ids.len());
    }

    /// Pop the oldest task without waiting.
    pub fn try_dequeue(&self) -> Option<TaskId> {
        self.lock().ready.pop_front()
    }

    /// Pop the oldest task, waiting up to `timeout` for one to arrive.
    ///
    /// Cancel-safe: a task is only taken off the queue in the same poll that
    /// returns it.
    pub async fn dequeue(&self, timeout: Duration) -> Result<TaskId, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(id) = self.try_dequeue() {
                return Ok(id);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::NoTaskAvailable);
            }
        }
    }

    fn wake(&self, count: usize) {
        for _ in 0..count {
            self.notify.notify_one();
        }
    }
}
