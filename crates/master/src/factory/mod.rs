//! # Command-to-runnable factory
//!
//! Turns one persisted command into a ready-to-start
//! [`WorkflowExecutionRunnable`]. The command row is deleted before anything
//! is built, so when several masters race for the same command exactly one
//! of them sees a deleted row and the rest get
//! [`FactoryError::DuplicateCommand`].

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub use error::{FactoryError, FactoryResult};
use handlers::{CommandHandlers, PreparedWorkflow};

use crate::model::Command;
use crate::persistence::{CommandDao, WorkflowDefinitionDao};
use crate::registry::{Registry, command_lock_key};
use crate::runnable::{ExecutionContext, WorkflowExecutionRunnable};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

pub struct WorkflowExecutionRunnableFactory {
    commands: Arc<dyn CommandDao>,
    handlers: CommandHandlers,
    ctx: Arc<ExecutionContext>,
    registry: Option<Arc<dyn Registry>>,
    lock_timeout: Duration,
}

impl WorkflowExecutionRunnableFactory {
    #[must_use]
    pub fn new(
        commands: Arc<dyn CommandDao>,
        definitions: Arc<dyn WorkflowDefinitionDao>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let handlers = CommandHandlers::new(
            definitions,
            Arc::clone(&ctx.workflow_dao),
            Arc::clone(&ctx.task_dao),
        );
        Self {
            commands,
            handlers,
            ctx,
            registry: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Serialize consumption of each command through a registry lock.
    #[must_use]
    pub fn with_registry_lock(mut self, registry: Arc<dyn Registry>, timeout: Duration) -> Self {
        self.registry = Some(registry);
        self.lock_timeout = timeout;
        self
    }

    /// Consume `command` and build its runnable.
    ///
    /// # Errors
    ///
    /// - [`FactoryError::DuplicateCommand`] if another consumer got there
    ///   first (or holds the command lock past the timeout).
    /// - [`FactoryError::MalformedCommand`] if the command cannot be
    ///   handled; it is moved to the error-command table.
    /// - [`FactoryError::Persistence`] / [`FactoryError::Registry`] for
    ///   collaborator failures.
    pub async fn create(&self, command: Command) -> FactoryResult<WorkflowExecutionRunnable> {
        let Some(registry) = &self.registry else {
            return self.consume(command).await;
        };

        let key = command_lock_key(command.id);
        if !registry.acquire_lock(&key, Some(self.lock_timeout)).await? {
            debug!(command_id = %command.id, "command lock busy, treating as duplicate");
            return Err(FactoryError::DuplicateCommand(command.id));
        }
        let result = self.consume(command).await;
        if let Err(e) = registry.release_lock(&key).await {
            warn!(lock = %key, error = %e, "could not release command lock");
        }
        result
    }

    async fn consume(&self, command: Command) -> FactoryResult<WorkflowExecutionRunnable> {
        let deleted = self.commands.delete_command_by_id(command.id).await?;
        if deleted == 0 {
            debug!(command_id = %command.id, "command already consumed");
            return Err(FactoryError::DuplicateCommand(command.id));
        }

        match self.build(&command).await {
            Err(FactoryError::MalformedCommand { command_id, reason }) => {
                warn!(command_id = %command_id, reason = %reason, "malformed command parked");
                self.commands.move_to_error_command(command, &reason).await?;
                Err(FactoryError::MalformedCommand { command_id, reason })
            }
            other => other,
        }
    }

    async fn build(&self, command: &Command) -> FactoryResult<WorkflowExecutionRunnable> {
        let PreparedWorkflow {
            instance,
            definition,
            graph,
        } = self.handlers.prepare(command).await?;

        Ok(WorkflowExecutionRunnable::new(
            instance,
            Arc::new(definition),
            graph,
            Arc::clone(&self.ctx),
        ))
    }
}

impl std::fmt::Debug for WorkflowExecutionRunnableFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionRunnableFactory")
            .field("locking", &self.registry.is_some())
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}
