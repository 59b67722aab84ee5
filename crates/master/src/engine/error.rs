//! Engine error types.
//!
//! Business errors travel back in RPC replies; the actor keeps running.

use std::time::Duration;

use drover_core::WorkflowInstanceId;
use thiserror::Error;

use crate::lifecycle::LifecycleError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("workflow instance {0} is not running on this master")]
    WorkflowNotFound(WorkflowInstanceId),

    #[error("workflow instance {0} is already running")]
    AlreadyRunning(WorkflowInstanceId),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("engine did not answer within {0:?}")]
    RpcTimeout(Duration),

    #[error("engine actor is not available")]
    ActorUnavailable,

    #[error("could not spawn engine actor: {0}")]
    SpawnFailed(String),
}

impl EngineError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RpcTimeout(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
