use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Unique identifier for a submitted item
pub type TaskId = Uuid;

/// Lifecycle of a submitted item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Linked into the chain, waiting for its predecessor
    Pending,
    /// Work is executing
    Running,
    /// Work returned a value
    Completed,
    /// Work returned an error
    Failed,
    /// Cancellation won before the work started
    Cancelled,
    /// Work panicked
    Panicked,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
            TaskState::Panicked => "panicked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            "panicked" => Some(TaskState::Panicked),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    fn to_u8(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed => 2,
            TaskState::Failed => 3,
            TaskState::Cancelled => 4,
            TaskState::Panicked => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            4 => TaskState::Cancelled,
            _ => TaskState::Panicked,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic state word shared by a handle and its running task.
///
/// `Pending` is left exactly once, either by [`StateCell::start`] or by
/// [`StateCell::cancel`]; whichever CAS lands first decides whether the work
/// runs.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(AtomicU8::new(TaskState::Pending.to_u8()))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Pending -> Running`. Returns false if cancellation got there first.
    pub(crate) fn start(&self) -> bool {
        self.transition(TaskState::Pending, TaskState::Running)
    }

    /// `Pending -> Cancelled`. Returns false once the work has started.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(TaskState::Pending, TaskState::Cancelled)
    }

    /// `Running -> terminal`
    pub(crate) fn finish(&self, terminal: TaskState) {
        debug_assert!(terminal.is_terminal());
        self.0.store(terminal.to_u8(), Ordering::Release);
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
            TaskState::Panicked,
        ] {
            assert_eq!(TaskState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::from_str("in_progress"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_cancel_before_start_wins() {
        let cell = StateCell::new();
        assert!(cell.cancel());
        assert!(!cell.start());
        assert_eq!(cell.get(), TaskState::Cancelled);
    }

    #[test]
    fn test_start_before_cancel_wins() {
        let cell = StateCell::new();
        assert!(cell.start());
        assert!(!cell.cancel());
        assert_eq!(cell.get(), TaskState::Running);

        cell.finish(TaskState::Completed);
        assert_eq!(cell.get(), TaskState::Completed);
        assert!(!cell.cancel());
    }

    #[test]
    fn test_concurrent_start_and_cancel_pick_one_winner() {
        use std::sync::{Arc, Barrier};

        for _ in 0..500 {
            let cell = Arc::new(StateCell::new());
            let barrier = Arc::new(Barrier::new(2));

            let starter = {
                let cell = cell.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cell.start()
                })
            };
            barrier.wait();
            let cancelled = cell.cancel();
            let started = starter.join().unwrap();

            assert_ne!(started, cancelled);
            let expected = if cancelled { TaskState::Cancelled } else { TaskState::Running };
            assert_eq!(cell.get(), expected);
        }
    }

    #[test]
    fn test_cancel_is_one_shot() {
        let cell = StateCell::new();
        assert!(cell.cancel());
        assert!(!cell.cancel());
    }
}
