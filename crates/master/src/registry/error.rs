//! Registry error types.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry connection lost")]
    ConnectionLost,

    #[error("registry key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid registry key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

impl RegistryError {
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
