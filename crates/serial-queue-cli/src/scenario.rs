use serial_queue::{SerialQueue, TaskError, TaskHandle};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How each demo item behaves
#[derive(Debug, Clone)]
pub struct Scenario {
    pub items: u64,
    pub base_delay_ms: u64,
    pub fail: HashSet<u64>,
    pub cancel: HashSet<u64>,
}

/// Result of one scenario run
#[derive(Debug, Default)]
pub struct Report {
    /// Item indices in the order their work finished
    pub finished: Vec<u64>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Report {
    /// Finished items must appear in strictly increasing index order.
    pub fn in_order(&self) -> bool {
        self.finished.windows(2).all(|pair| pair[0] < pair[1])
    }
}

impl Scenario {
    /// Item `index` sleeps `base_delay_ms / index`, so earlier items take longer.
    pub fn delay_for(&self, index: u64) -> Duration {
        Duration::from_millis(self.base_delay_ms / index.max(1))
    }

    pub async fn run(&self, queue: &SerialQueue) -> Report {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles: Vec<(u64, TaskHandle<u64, String>)> = Vec::new();

        for index in 1..=self.items {
            let delay = self.delay_for(index);
            let fails = self.fail.contains(&index);
            let tx = tx.clone();

            let handle = queue.submit_fallible(move || async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(index);
                if fails {
                    Err(format!("item {} failed on purpose", index))
                } else {
                    Ok(index)
                }
            });

            if self.cancel.contains(&index) && !handle.cancel() {
                warn!("Item {} started before it could be cancelled", index);
            }
            handles.push((index, handle));
        }
        drop(tx);

        let mut report = Report::default();
        for (index, handle) in handles {
            match handle.await {
                Ok(value) => {
                    info!("Item {} completed with {}", index, value);
                    report.succeeded += 1;
                }
                Err(TaskError::Failed(e)) => {
                    warn!("Item {} failed: {}", index, e);
                    report.failed += 1;
                }
                Err(TaskError::Cancelled) => {
                    info!("Item {} was cancelled", index);
                    report.cancelled += 1;
                }
                Err(e) => {
                    warn!("Item {} did not finish: {}", index, e);
                }
            }
        }

        while let Some(index) = rx.recv().await {
            report.finished.push(index);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(items: u64) -> Scenario {
        Scenario {
            items,
            base_delay_ms: 1000,
            fail: HashSet::new(),
            cancel: HashSet::new(),
        }
    }

    #[test]
    fn test_delay_shrinks_with_index() {
        let scenario = scenario(10);
        assert_eq!(scenario.delay_for(1), Duration::from_millis(1000));
        assert_eq!(scenario.delay_for(4), Duration::from_millis(250));
        assert_eq!(scenario.delay_for(0), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_in_order() {
        let queue = SerialQueue::new();
        let report = scenario(10).run(&queue).await;

        assert_eq!(report.finished, (1..=10).collect::<Vec<_>>());
        assert!(report.in_order());
        assert_eq!(report.succeeded, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_with_failure_and_cancel() {
        let queue = SerialQueue::new();
        let mut scenario = scenario(5);
        scenario.fail.insert(2);
        scenario.cancel.insert(4);

        let report = scenario.run(&queue).await;
        assert_eq!(report.finished, vec![1, 2, 3, 5]);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, 1);
        assert!(report.in_order());
    }
}
