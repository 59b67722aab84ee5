//! Collaborators and tuning shared by every runnable of one master.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::WorkerMetricsSource;
use crate::dispatch::WorkerDispatcher;
use crate::persistence::{TaskInstanceDao, WorkflowInstanceDao};
use crate::selector::HostSelector;

/// Capped exponential backoff: `base * 2^attempt`, at most `max`.
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    /// First re-dispatch delay when no host is available.
    pub dispatch_backoff_base_ms: u64,
    /// Upper bound for the re-dispatch delay.
    pub dispatch_backoff_max_ms: u64,
    /// Group used when neither the task nor the workflow names one.
    pub default_worker_group: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            dispatch_backoff_base_ms: 100,
            dispatch_backoff_max_ms: 5_000,
            default_worker_group: "default".to_string(),
        }
    }
}

pub struct ExecutionContext {
    pub workflow_dao: Arc<dyn WorkflowInstanceDao>,
    pub task_dao: Arc<dyn TaskInstanceDao>,
    pub dispatcher: Arc<dyn WorkerDispatcher>,
    pub workers: Arc<dyn WorkerMetricsSource>,
    pub selector: Arc<dyn HostSelector>,
    pub settings: ExecutionSettings,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(
        workflow_dao: Arc<dyn WorkflowInstanceDao>,
        task_dao: Arc<dyn TaskInstanceDao>,
        dispatcher: Arc<dyn WorkerDispatcher>,
        workers: Arc<dyn WorkerMetricsSource>,
        selector: Arc<dyn HostSelector>,
    ) -> Self {
        Self {
            workflow_dao,
            task_dao,
            dispatcher,
            workers,
            selector,
            settings: ExecutionSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub(crate) fn dispatch_backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.settings.dispatch_backoff_base_ms,
            self.settings.dispatch_backoff_max_ms,
        )
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("selector", &self.selector.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0, 100, 3200), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, 100, 3200), Duration::from_millis(200));
        assert_eq!(calculate_backoff(2, 100, 3200), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, 100, 3200), Duration::from_millis(3200));
        assert_eq!(calculate_backoff(u32::MAX, 100, 3200), Duration::from_millis(3200));
    }
}
