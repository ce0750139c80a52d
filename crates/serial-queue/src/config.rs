use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Label attached to every task span
    pub name: String,
    /// Work running longer than this is reported with a warning
    pub slow_task_warn_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name: "serial-queue".to_string(),
            slow_task_warn_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        QueueConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn slow_task_warn_ms(mut self, millis: u64) -> Self {
        self.slow_task_warn_ms = Some(millis);
        self
    }

    pub(crate) fn slow_task_threshold(&self) -> Option<Duration> {
        self.slow_task_warn_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.name, "serial-queue");
        assert!(config.slow_task_threshold().is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: writes\nslow_task_warn_ms: 250").unwrap();

        let config = QueueConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.name, "writes");
        assert_eq!(config.slow_task_threshold(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "slow_task_warn_ms: 10").unwrap();

        let config = QueueConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.name, "serial-queue");
        assert_eq!(config.slow_task_warn_ms, Some(10));
    }

    #[test]
    fn test_missing_file() {
        assert!(QueueConfig::from_file("/nonexistent/queue.yaml").is_err());
    }
}
