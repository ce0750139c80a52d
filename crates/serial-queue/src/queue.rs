use crate::config::QueueConfig;
use crate::error::{TaskError, TaskResult};
use crate::handle::{TaskCell, TaskHandle};
use crate::state::TaskState;
use crate::stats::{QueueMetrics, QueueStats};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// Completion signal of one linked item. Resolves once the item has settled,
/// whatever its outcome, and never fails.
type Link = BoxFuture<'static, ()>;

/// The end of the chain plus the submission counter, linked together under
/// one lock.
struct Chain {
    tail: Link,
    next_sequence: u64,
}

struct Inner {
    chain: Mutex<Chain>,
    config: QueueConfig,
    metrics: QueueMetrics,
    runtime: Option<Handle>,
}

/// Runs submitted async work one item at a time, in submission order.
///
/// Clones share the same chain.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<Inner>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Spawns work onto `runtime` instead of the caller's ambient runtime,
    /// so items can be submitted from threads outside of Tokio.
    pub fn with_runtime(config: QueueConfig, runtime: Handle) -> Self {
        Self::build(config, Some(runtime))
    }

    fn build(config: QueueConfig, runtime: Option<Handle>) -> Self {
        let metrics = QueueMetrics::new(&config.name).expect("Failed to create metrics");
        SerialQueue {
            inner: Arc::new(Inner {
                chain: Mutex::new(Chain {
                    tail: future::ready(()).boxed(),
                    next_sequence: 0,
                }),
                config,
                metrics,
                runtime,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.metrics.snapshot()
    }

    /// Registry holding this queue's Prometheus metrics, for gathering or
    /// exporting alongside the caller's own.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.inner.metrics.registry()
    }

    /// Queue fallible work behind everything submitted so far.
    ///
    /// Returns immediately. An error from `work` is reported only on the
    /// returned handle; later items run regardless.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime on a queue built without
    /// [`SerialQueue::with_runtime`].
    pub fn submit_fallible<F, Fut, T, E>(&self, work: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let id = Uuid::new_v4();
        let cell = Arc::new(TaskCell::new());
        let (done_tx, done_rx) = watch::channel(false);

        let wrapper = settled_link(done_rx.clone());

        let (predecessor, sequence) = {
            let mut chain = self.inner.chain.lock();
            let predecessor = std::mem::replace(&mut chain.tail, wrapper);
            let sequence = chain.next_sequence;
            chain.next_sequence += 1;
            (predecessor, sequence)
        };
        self.inner.metrics.inc_submitted();

        debug!(queue = %self.inner.config.name, seq = sequence, task_id = %id, "Linked task");

        let span = info_span!(
            "serial_task",
            queue = %self.inner.config.name,
            seq = sequence,
            task_id = %id
        );
        let inner = self.inner.clone();
        let task_cell = cell.clone();
        let task = async move {
            predecessor.await;
            let state = inner.execute(&task_cell, work).await;
            inner.metrics.inc_settled(state);
            done_tx.send_replace(true);
        }
        .instrument(span);

        let _ = match &self.inner.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        };

        TaskHandle::new(id, sequence, cell, done_rx)
    }

    /// Queue infallible work behind everything submitted so far.
    ///
    /// Same protocol as [`SerialQueue::submit_fallible`]; the handle can
    /// only end up completed, cancelled or panicked.
    pub fn submit<F, Fut, T>(&self, work: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_fallible(move || work().map(Ok::<T, Infallible>))
    }

    /// Submit fallible work and wait for its outcome.
    pub async fn run_fallible<F, Fut, T, E>(&self, work: F) -> TaskResult<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_fallible(work).join().await
    }

    /// Submit work and wait for its value.
    pub async fn run<F, Fut, T>(&self, work: F) -> TaskResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(work).join().await
    }

    /// Resolves once everything submitted before this call has settled.
    ///
    /// Links a bare barrier rather than an item, so it takes no sequence
    /// number and does not show up in [`SerialQueue::stats`]. Items submitted
    /// after this call still wait for the barrier.
    pub async fn wait_idle(&self) {
        // Dropping the sender (e.g. this future is dropped) also releases the
        // barrier, so successors never stall on it.
        let (done_tx, done_rx) = watch::channel(false);
        let predecessor = {
            let mut chain = self.inner.chain.lock();
            std::mem::replace(&mut chain.tail, settled_link(done_rx))
        };
        predecessor.await;
        done_tx.send_replace(true);
    }
}

/// Link that resolves once `done` flips to true or its sender is dropped.
fn settled_link(mut done: watch::Receiver<bool>) -> Link {
    async move {
        // Err means the task was dropped; the chain moves on either way.
        let _ = done.wait_for(|done| *done).await;
    }
    .boxed()
}

impl Inner {
    /// Runs once the predecessor has settled. Publishes the outcome into
    /// `cell` and returns the terminal state.
    async fn execute<F, Fut, T, E>(&self, cell: &TaskCell<T, E>, work: F) -> TaskState
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !cell.state.start() {
            debug!("Skipping cancelled task");
            cell.publish(Err(TaskError::Cancelled));
            return TaskState::Cancelled;
        }

        trace!("Task started");
        let started = Instant::now();
        let result = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();
        self.metrics.observe_work_duration(elapsed);

        if let Some(threshold) = self.config.slow_task_threshold() {
            if elapsed > threshold {
                warn!("Slow task took {:?} (threshold {:?})", elapsed, threshold);
            }
        }

        let (state, outcome) = match result {
            Ok(Ok(value)) => (TaskState::Completed, Ok(value)),
            Ok(Err(e)) => (TaskState::Failed, Err(TaskError::Failed(e))),
            Err(_) => {
                warn!("Task panicked, continuing with the next item");
                (TaskState::Panicked, Err(TaskError::Panicked))
            }
        };

        cell.state.finish(state);
        cell.publish(outcome);
        trace!(state = %state, "Task settled in {:?}", elapsed);
        state
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.inner.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}
