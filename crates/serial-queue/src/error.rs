use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a submitted item that did not produce a value.
///
/// Every variant is local to the handle that observed it. None of them is
/// ever propagated into the queue's chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E = Infallible> {
    #[error("Work failed: {0}")]
    Failed(E),

    #[error("Task was cancelled before it started")]
    Cancelled,

    #[error("Task panicked during execution")]
    Panicked,

    #[error("Timed out after {0:?} waiting for task")]
    TimedOut(Duration),
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskError::Failed(_))
    }

    /// Returns the work's own error, if this is a failure.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of awaiting a handle.
pub type TaskResult<T, E = Infallible> = std::result::Result<T, TaskError<E>>;
