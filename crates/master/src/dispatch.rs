//! Channel from the master to worker processes.
//!
//! Dispatch only hands the task over. Acceptance, completion, and failure
//! come back later as lifecycle events reported through the engine.

use async_trait::async_trait;
use drover_core::TaskInstanceId;
use thiserror::Error;

use crate::model::TaskInstance;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The worker could not be reached.
    #[error("worker {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// The worker answered but refused the request.
    #[error("worker {host} rejected the request: {reason}")]
    Rejected { host: String, reason: String },
}

impl DispatchError {
    pub fn unreachable(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            host: host.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    /// Ship `task` to the worker at `host`.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the worker cannot take the task.
    async fn dispatch(&self, host: &str, task: &TaskInstance) -> Result<(), DispatchError>;

    /// Ask the worker at `host` to cancel a running attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the request does not reach the
    /// worker.
    async fn kill(&self, host: &str, task_instance_id: TaskInstanceId) -> Result<(), DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_is_retryable() {
        assert!(DispatchError::unreachable("10.0.0.1:1234", "refused").is_retryable());
        assert!(!DispatchError::rejected("10.0.0.1:1234", "overloaded").is_retryable());
    }

    #[test]
    fn test_error_names_host() {
        let err = DispatchError::rejected("10.0.0.1:1234", "overloaded");
        assert_eq!(
            err.to_string(),
            "worker 10.0.0.1:1234 rejected the request: overloaded"
        );
    }
}
