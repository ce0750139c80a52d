use crate::state::TaskState;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time view of a queue's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub panicked: u64,
    /// Items linked but not yet settled
    pub in_flight: u64,
}

/// Prometheus metrics for one queue
pub(crate) struct QueueMetrics {
    registry: Registry,
    tasks_submitted: IntCounter,
    tasks_settled: IntCounterVec,
    tasks_in_flight: IntGauge,
    work_duration: Histogram,
}

impl QueueMetrics {
    pub(crate) fn new(queue_name: &str) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_submitted = IntCounter::with_opts(
            Opts::new("sq_tasks_submitted_total", "Total number of submitted items")
                .const_label("queue", queue_name),
        )?;
        registry.register(Box::new(tasks_submitted.clone()))?;

        // Settled items by terminal state
        let tasks_settled = IntCounterVec::new(
            Opts::new("sq_tasks_settled_total", "Total number of settled items by state")
                .const_label("queue", queue_name),
            &["state"],
        )?;
        registry.register(Box::new(tasks_settled.clone()))?;

        let tasks_in_flight = IntGauge::with_opts(
            Opts::new("sq_tasks_in_flight", "Number of linked items not yet settled")
                .const_label("queue", queue_name),
        )?;
        registry.register(Box::new(tasks_in_flight.clone()))?;

        let work_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sq_work_duration_seconds",
                "Time spent running submitted work in seconds",
            )
            .const_label("queue", queue_name),
        )?;
        registry.register(Box::new(work_duration.clone()))?;

        Ok(QueueMetrics {
            registry,
            tasks_submitted,
            tasks_settled,
            tasks_in_flight,
            work_duration,
        })
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn inc_submitted(&self) {
        self.tasks_submitted.inc();
        self.tasks_in_flight.inc();
    }

    pub(crate) fn inc_settled(&self, state: TaskState) {
        if !state.is_terminal() {
            return;
        }
        self.tasks_settled.with_label_values(&[state.as_str()]).inc();
        self.tasks_in_flight.dec();
    }

    /// Record how long the work itself ran
    pub(crate) fn observe_work_duration(&self, elapsed: Duration) {
        self.work_duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        let settled = |state: TaskState| self.tasks_settled.with_label_values(&[state.as_str()]).get();

        QueueStats {
            submitted: self.tasks_submitted.get(),
            completed: settled(TaskState::Completed),
            failed: settled(TaskState::Failed),
            cancelled: settled(TaskState::Cancelled),
            panicked: settled(TaskState::Panicked),
            in_flight: self.tasks_in_flight.get().max(0) as u64,
        }
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new("serial-queue").expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = QueueMetrics::default();
        metrics.inc_submitted();
        metrics.inc_submitted();
        metrics.inc_submitted();
        metrics.inc_settled(TaskState::Completed);
        metrics.inc_settled(TaskState::Cancelled);
        metrics.inc_settled(TaskState::Running);

        let stats = metrics.snapshot();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.in_flight, 1);
    }

    #[test]
    fn test_registry_exports_queue_label() {
        let metrics = QueueMetrics::new("writes").unwrap();
        metrics.inc_submitted();
        metrics.inc_settled(TaskState::Failed);
        metrics.observe_work_duration(Duration::from_millis(20));

        let families = metrics.registry().gather();
        let settled = families
            .iter()
            .find(|family| family.get_name() == "sq_tasks_settled_total")
            .unwrap();
        let metric = &settled.get_metric()[0];
        assert!(metric
            .get_label()
            .iter()
            .any(|label| label.get_name() == "queue" && label.get_value() == "writes"));
        assert!(metric
            .get_label()
            .iter()
            .any(|label| label.get_name() == "state" && label.get_value() == "failed"));

        let duration = families
            .iter()
            .find(|family| family.get_name() == "sq_work_duration_seconds")
            .unwrap();
        assert_eq!(duration.get_metric()[0].get_histogram().get_sample_count(), 1);
    }
}
