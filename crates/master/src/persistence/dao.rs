//! Data access traits the engine depends on.
//!
//! Implementations must make `delete_command_by_id` atomic and report the
//! affected row count exactly: zero rows is how a master learns another
//! replica already took the command.

use async_trait::async_trait;
use drover_core::{CommandId, TaskInstanceId, WorkflowCode, WorkflowInstanceId};

use super::error::PersistenceResult;
use crate::model::{Command, ErrorCommand, TaskInstance, WorkflowDefinition, WorkflowInstance};

#[async_trait]
pub trait CommandDao: Send + Sync {
    /// Insert and return the assigned id.
    async fn insert_command(&self, command: Command) -> PersistenceResult<CommandId>;

    /// Delete a command, returning the number of rows removed.
    async fn delete_command_by_id(&self, id: CommandId) -> PersistenceResult<u64>;

    /// Park a command that could not be handled.
    async fn move_to_error_command(&self, command: Command, message: &str) -> PersistenceResult<()>;

    /// Oldest commands first, restricted to those whose id falls into
    /// `slot` out of `total` masters.
    async fn fetch_commands(&self, limit: usize, slot: u32, total: u32) -> PersistenceResult<Vec<Command>>;

    async fn error_commands(&self) -> PersistenceResult<Vec<ErrorCommand>>;
}

#[async_trait]
pub trait WorkflowInstanceDao: Send + Sync {
    async fn insert_workflow_instance(&self, instance: WorkflowInstance) -> PersistenceResult<WorkflowInstanceId>;

    async fn load_workflow_instance(&self, id: WorkflowInstanceId) -> PersistenceResult<Option<WorkflowInstance>>;

    /// Overwrite the stored record.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::MissingRow`] when the instance was never inserted.
    async fn save_workflow_instance(&self, instance: &WorkflowInstance) -> PersistenceResult<()>;
}

#[async_trait]
pub trait TaskInstanceDao: Send + Sync {
    async fn insert_task_instance(&self, instance: TaskInstance) -> PersistenceResult<TaskInstanceId>;

    async fn load_task_instance(&self, id: TaskInstanceId) -> PersistenceResult<Option<TaskInstance>>;

    /// Overwrite the stored record; an unknown id is
    /// [`PersistenceError::MissingRow`].
    async fn save_task_instance(&self, instance: &TaskInstance) -> PersistenceResult<()>;

    /// Every attempt of every task of a workflow instance, ordered by id.
    async fn list_task_instances(&self, workflow_instance_id: WorkflowInstanceId) -> PersistenceResult<Vec<TaskInstance>>;
}

#[async_trait]
pub trait WorkflowDefinitionDao: Send + Sync {
    async fn insert_definition(&self, definition: WorkflowDefinition) -> PersistenceResult<()>;

    async fn load_definition(&self, code: WorkflowCode, version: u32) -> PersistenceResult<Option<WorkflowDefinition>>;
}
