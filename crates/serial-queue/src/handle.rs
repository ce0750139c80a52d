use crate::error::{TaskError, TaskResult};
use crate::state::{StateCell, TaskId, TaskState};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// State shared between a handle and the task executing its work.
pub(crate) struct TaskCell<T, E> {
    pub(crate) state: StateCell,
    pub(crate) outcome: Mutex<Option<TaskResult<T, E>>>,
}

impl<T, E> TaskCell<T, E> {
    pub(crate) fn new() -> Self {
        TaskCell {
            state: StateCell::new(),
            outcome: Mutex::new(None),
        }
    }

    /// Store the outcome. Must happen before the completion signal is sent.
    pub(crate) fn publish(&self, outcome: TaskResult<T, E>) {
        *self.outcome.lock() = Some(outcome);
    }
}

/// Caller-side view of one submitted item.
///
/// Dropping the handle does not cancel the item: the queue still runs it in
/// order. Use [`TaskHandle::cancel`] to keep work that has not started yet
/// from ever starting.
pub struct TaskHandle<T, E = Infallible> {
    id: TaskId,
    sequence: u64,
    submitted_at: DateTime<Utc>,
    cell: Arc<TaskCell<T, E>>,
    done: watch::Receiver<bool>,
    resolved: Option<TaskResult<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(
        id: TaskId,
        sequence: u64,
        cell: Arc<TaskCell<T, E>>,
        done: watch::Receiver<bool>,
    ) -> Self {
        TaskHandle {
            id,
            sequence,
            submitted_at: Utc::now(),
            cell,
            done,
            resolved: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Position in the queue's submission order, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn state(&self) -> TaskState {
        self.cell.state.get()
    }

    /// Whether the outcome has been published.
    ///
    /// A cancelled item reports `Cancelled` from [`TaskHandle::state`] right
    /// away but is only finished once its predecessor has settled.
    pub fn is_finished(&self) -> bool {
        self.resolved.is_some() || *self.done.borrow()
    }

    /// Request that the work never starts.
    ///
    /// Returns `true` if the request won and the work will be skipped. Work
    /// that is already running (or done) is not interrupted and `false` is
    /// returned.
    pub fn cancel(&self) -> bool {
        let won = self.cell.state.cancel();
        if won {
            debug!(task_id = %self.id, seq = self.sequence, "Cancellation accepted");
        } else {
            debug!(task_id = %self.id, seq = self.sequence, state = %self.state(), "Cancellation too late");
        }
        won
    }

    /// Wait for the outcome and keep it in the handle.
    ///
    /// Every call returns the same outcome.
    pub async fn wait(&mut self) -> &TaskResult<T, E> {
        let outcome = match self.resolved.take() {
            Some(outcome) => outcome,
            None => self.settle().await,
        };
        self.resolved.insert(outcome)
    }

    /// Wait for the outcome and take it.
    pub async fn join(mut self) -> TaskResult<T, E> {
        match self.resolved.take() {
            Some(outcome) => outcome,
            None => self.settle().await,
        }
    }

    /// Wait at most `duration` for the outcome.
    ///
    /// On timeout the item is cancelled if its work has not started yet.
    /// Work already running is left to finish so the queue order holds.
    pub async fn timeout(mut self, duration: Duration) -> TaskResult<T, E> {
        if let Some(outcome) = self.resolved.take() {
            return outcome;
        }

        let waited = tokio::time::timeout(duration, self.settle()).await;
        match waited {
            Ok(outcome) => outcome,
            Err(_) => self.expire(duration),
        }
    }

    /// Deadline passed without observing an outcome.
    fn expire(&self, duration: Duration) -> TaskResult<T, E> {
        if self.cancel() {
            return Err(TaskError::TimedOut(duration));
        }

        // Published between the deadline and the cancel attempt.
        if *self.done.borrow() {
            return self.take_outcome();
        }

        match self.state() {
            TaskState::Cancelled => debug!(
                task_id = %self.id,
                seq = self.sequence,
                "Task timed out after {:?}, already cancelled",
                duration
            ),
            _ => warn!(
                task_id = %self.id,
                seq = self.sequence,
                "Task timed out after {:?} but had already started",
                duration
            ),
        }
        Err(TaskError::TimedOut(duration))
    }

    async fn settle(&mut self) -> TaskResult<T, E> {
        // A closed channel means the task was dropped before publishing,
        // e.g. its runtime shut down.
        let _ = self.done.wait_for(|done| *done).await;
        self.take_outcome()
    }

    fn take_outcome(&self) -> TaskResult<T, E> {
        self.cell
            .outcome
            .lock()
            .take()
            .unwrap_or(Err(TaskError::Panicked))
    }
}

impl<T, E> IntoFuture for TaskHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = TaskResult<T, E>;
    type IntoFuture = BoxFuture<'static, TaskResult<T, E>>;

    fn into_future(self) -> Self::IntoFuture {
        self.join().boxed()
    }
}

impl<T, E> std::fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .finish()
    }
}
