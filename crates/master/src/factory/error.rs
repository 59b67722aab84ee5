//! Factory error types.

use drover_core::CommandId;
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::registry::RegistryError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FactoryError {
    /// Another master already consumed the command.
    #[error("command {0} was already consumed")]
    DuplicateCommand(CommandId),

    /// The command can never be turned into a runnable.
    #[error("command {command_id} is malformed: {reason}")]
    MalformedCommand { command_id: CommandId, reason: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl FactoryError {
    pub fn malformed(command_id: CommandId, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            command_id,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateCommand(_))
    }

    /// Worth fetching the command again later. Duplicates and malformed
    /// commands are gone from the queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(e) => e.is_retryable(),
            Self::Registry(e) => e.is_retryable(),
            Self::DuplicateCommand(_) | Self::MalformedCommand { .. } => false,
        }
    }
}

pub type FactoryResult<T> = Result<T, FactoryError>;
