//! Host selection error types.

use thiserror::Error;

/// Errors that can occur while picking a worker host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// The worker group has no candidate hosts right now.
    #[error("no hosts available in worker group '{worker_group}'")]
    NoHostsAvailable { worker_group: String },

    /// Configuration names a selector that does not exist.
    #[error("unknown host selector '{0}'")]
    UnknownSelector(String),
}

impl SelectorError {
    /// Create a no hosts available error.
    #[must_use]
    pub fn no_hosts(worker_group: impl Into<String>) -> Self {
        Self::NoHostsAvailable {
            worker_group: worker_group.into(),
        }
    }

    /// Host unavailability is transient; the dispatcher backs off and tries
    /// again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoHostsAvailable { .. })
    }
}

/// Result type for host selection.
pub type SelectorResult<T> = Result<T, SelectorError>;
