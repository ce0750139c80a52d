//! A queue that runs async work serially, in the order it is submitted.

mod config;
mod error;
mod handle;
mod queue;
mod state;
mod stats;

pub use config::QueueConfig;
pub use error::{TaskError, TaskResult};
pub use handle::TaskHandle;
pub use queue::SerialQueue;
pub use state::{TaskId, TaskState};
pub use stats::QueueStats;
