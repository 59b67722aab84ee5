//! Lifecycle error types.

use drover_core::WorkflowInstanceId;
use thiserror::Error;

/// Errors raised while building or delivering lifecycle events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// An event or transition violates a state precondition.
    #[error("illegal state transition for {subject}: {reason}")]
    IllegalStateTransition { subject: String, reason: String },

    /// The instance already finished and its bus no longer accepts events.
    #[error("event bus of workflow instance {workflow_instance_id} is closed")]
    BusClosed {
        workflow_instance_id: WorkflowInstanceId,
    },
}

impl LifecycleError {
    /// Create an illegal state transition error.
    #[must_use]
    pub fn illegal_transition(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IllegalStateTransition {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a bus closed error.
    #[must_use]
    pub const fn bus_closed(workflow_instance_id: WorkflowInstanceId) -> Self {
        Self::BusClosed {
            workflow_instance_id,
        }
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LifecycleError::illegal_transition("task 7", "retry_times 3 >= max 3");
        assert!(err.to_string().contains("task 7"));
        assert!(err.to_string().contains("retry_times"));

        let err = LifecycleError::bus_closed(WorkflowInstanceId::new(4));
        assert!(err.to_string().contains('4'));
    }
}
