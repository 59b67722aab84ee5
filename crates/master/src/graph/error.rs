//! Execution graph error types

use drover_core::TaskCode;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("task node not found: {0}")]
    NodeNotFound(TaskCode),

    #[error("task node defined twice: {0}")]
    DuplicateNode(TaskCode),

    #[error("self-loop on task node {0}")]
    SelfLoopDetected(TaskCode),

    #[error("cycle detected involving task node {0}")]
    CycleDetected(TaskCode),
}

impl GraphError {
    #[must_use]
    pub const fn node_not_found(code: TaskCode) -> Self {
        Self::NodeNotFound(code)
    }
}

/// Result type for graph operations
pub type GraphResult<T> = std::result::Result<T, GraphError>;
