//! In-process implementation of every DAO.
//!
//! Each call holds one mutex for its whole body, which gives the same
//! atomicity a single-statement transaction would. `set_available(false)`
//! makes every call fail, for exercising error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use drover_core::{CommandId, TaskInstanceId, WorkflowCode, WorkflowInstanceId};

use super::dao::{CommandDao, TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao};
use super::error::{PersistenceError, PersistenceResult};
use crate::model::{Command, ErrorCommand, TaskInstance, WorkflowDefinition, WorkflowInstance};

#[derive(Debug, Default)]
struct Tables {
    commands: BTreeMap<CommandId, Command>,
    error_commands: Vec<ErrorCommand>,
    workflows: BTreeMap<WorkflowInstanceId, WorkflowInstance>,
    tasks: BTreeMap<TaskInstanceId, TaskInstance>,
    definitions: HashMap<(WorkflowCode, u32), WorkflowDefinition>,
    last_command_id: i64,
    last_workflow_id: i64,
    last_task_id: i64,
}

fn next_id(last: &mut i64) -> i64 {
    *last = last.saturating_add(1);
    *last
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the datastore going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn tables(&self) -> PersistenceResult<MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::unavailable("memory store is switched off"));
        }
        Ok(self.tables.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Commands still waiting to be consumed.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .len()
    }

    /// Workflow instances ever inserted.
    #[must_use]
    pub fn workflow_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .workflows
            .len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandDao for MemoryStore {
    async fn insert_command(&self, mut command: Command) -> PersistenceResult<CommandId> {
        let mut tables = self.tables()?;
        let id = CommandId::new(next_id(&mut tables.last_command_id));
        command.id = id;
        tables.commands.insert(id, command);
        Ok(id)
    }

    async fn delete_command_by_id(&self, id: CommandId) -> PersistenceResult<u64> {
        let mut tables = self.tables()?;
        Ok(u64::from(tables.commands.remove(&id).is_some()))
    }

    async fn move_to_error_command(&self, command: Command, message: &str) -> PersistenceResult<()> {
        let mut tables = self.tables()?;
        tables.commands.remove(&command.id);
        tables.error_commands.push(ErrorCommand {
            command,
            message: message.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn fetch_commands(&self, limit: usize, slot: u32, total: u32) -> PersistenceResult<Vec<Command>> {
        let total = i64::from(total.max(1));
        let slot = i64::from(slot);
        let tables = self.tables()?;
        Ok(tables
            .commands
            .values()
            .filter(|c| c.id.get().rem_euclid(total) == slot)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn error_commands(&self) -> PersistenceResult<Vec<ErrorCommand>> {
        Ok(self.tables()?.error_commands.clone())
    }
}

#[async_trait]
impl WorkflowInstanceDao for MemoryStore {
    async fn insert_workflow_instance(&self, mut instance: WorkflowInstance) -> PersistenceResult<WorkflowInstanceId> {
        let mut tables = self.tables()?;
        let id = WorkflowInstanceId::new(next_id(&mut tables.last_workflow_id));
        instance.id = id;
        tables.workflows.insert(id, instance);
        Ok(id)
    }

    async fn load_workflow_instance(&self, id: WorkflowInstanceId) -> PersistenceResult<Option<WorkflowInstance>> {
        Ok(self.tables()?.workflows.get(&id).cloned())
    }

    async fn save_workflow_instance(&self, instance: &WorkflowInstance) -> PersistenceResult<()> {
        let mut tables = self.tables()?;
        let row = tables
            .workflows
            .get_mut(&instance.id)
            .ok_or_else(|| PersistenceError::missing_row("workflow_instance", instance.id.get()))?;
        row.clone_from(instance);
        Ok(())
    }
}

#[async_trait]
impl TaskInstanceDao for MemoryStore {
    async fn insert_task_instance(&self, mut instance: TaskInstance) -> PersistenceResult<TaskInstanceId> {
        let mut tables = self.tables()?;
        let id = TaskInstanceId::new(next_id(&mut tables.last_task_id));
        instance.id = id;
        tables.tasks.insert(id, instance);
        Ok(id)
    }

    async fn load_task_instance(&self, id: TaskInstanceId) -> PersistenceResult<Option<TaskInstance>> {
        Ok(self.tables()?.tasks.get(&id).cloned())
    }

    async fn save_task_instance(&self, instance: &TaskInstance) -> PersistenceResult<()> {
        let mut tables = self.tables()?;
        let row = tables
            .tasks
            .get_mut(&instance.id)
            .ok_or_else(|| PersistenceError::missing_row("task_instance", instance.id.get()))?;
        row.clone_from(instance);
        Ok(())
    }

    async fn list_task_instances(&self, workflow_instance_id: WorkflowInstanceId) -> PersistenceResult<Vec<TaskInstance>> {
        Ok(self
            .tables()?
            .tasks
            .values()
            .filter(|t| t.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowDefinitionDao for MemoryStore {
    async fn insert_definition(&self, definition: WorkflowDefinition) -> PersistenceResult<()> {
        self.tables()?
            .definitions
            .insert((definition.code, definition.version), definition);
        Ok(())
    }

    async fn load_definition(&self, code: WorkflowCode, version: u32) -> PersistenceResult<Option<WorkflowDefinition>> {
        Ok(self.tables()?.definitions.get(&(code, version)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use drover_core::TaskCode;

    use super::*;
    use crate::model::{CommandType, TaskDefinition};

    fn command() -> Command {
        Command::new(CommandType::StartWorkflow, WorkflowCode::new(1), 1)
    }

    #[tokio::test]
    async fn test_delete_reports_rows_once() {
        let store = MemoryStore::new();
        let id = store.insert_command(command()).await;
        assert!(id.is_ok());
        let id = id.unwrap_or(CommandId::new(0));

        assert_eq!(store.delete_command_by_id(id).await, Ok(1));
        assert_eq!(store.delete_command_by_id(id).await, Ok(0));
    }

    #[tokio::test]
    async fn test_fetch_respects_slot() {
        let store = MemoryStore::new();
        for _ in 0..6 {
            assert!(store.insert_command(command()).await.is_ok());
        }

        let slot0 = store.fetch_commands(10, 0, 2).await.unwrap_or_default();
        let slot1 = store.fetch_commands(10, 1, 2).await.unwrap_or_default();
        assert_eq!(slot0.iter().map(|c| c.id.get()).collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(slot1.iter().map(|c| c.id.get()).collect::<Vec<_>>(), vec![1, 3, 5]);

        let limited = store.fetch_commands(2, 0, 1).await.unwrap_or_default();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_move_to_error_removes_command() {
        let store = MemoryStore::new();
        let id = store.insert_command(command()).await.unwrap_or(CommandId::new(0));
        let mut cmd = command();
        cmd.id = id;

        assert!(store.move_to_error_command(cmd, "definition missing").await.is_ok());
        assert_eq!(store.pending_commands(), 0);
        let errors = store.error_commands().await.unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first().map(|e| e.message.as_str()), Some("definition missing"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        let result = store.insert_command(command()).await;
        assert!(matches!(result, Err(PersistenceError::Unavailable(_))));

        store.set_available(true);
        assert!(store.insert_command(command()).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_requires_inserted_row() {
        let store = MemoryStore::new();
        let def = WorkflowDefinition::new(WorkflowCode::new(1), 1, "etl");
        let mut workflow = WorkflowInstance::from_command(&command(), &def, Utc::now());
        workflow.id = WorkflowInstanceId::new(41);

        assert_eq!(
            store.save_workflow_instance(&workflow).await,
            Err(PersistenceError::missing_row("workflow_instance", 41))
        );
        assert_eq!(store.workflow_count(), 0);

        let id = store
            .insert_workflow_instance(workflow.clone())
            .await
            .unwrap_or(WorkflowInstanceId::new(0));
        workflow.id = id;
        workflow.run_times = 2;
        assert!(store.save_workflow_instance(&workflow).await.is_ok());
        let stored = store.load_workflow_instance(id).await.ok().flatten();
        assert_eq!(stored.map(|w| w.run_times), Some(2));
    }

    #[tokio::test]
    async fn test_save_unknown_task_attempt_is_missing_row() {
        let store = MemoryStore::new();
        let def = WorkflowDefinition::new(WorkflowCode::new(1), 1, "etl")
            .with_task(TaskDefinition::new(TaskCode::new(3), "t3", "SHELL"));
        let workflow = WorkflowInstance::from_command(&command(), &def, Utc::now());
        let task = def.task(TaskCode::new(3));
        assert!(task.is_some());
        let Some(task) = task else { return };
        let mut attempt = TaskInstance::first_attempt(task, &workflow, "default", Utc::now());
        attempt.id = TaskInstanceId::new(9);

        let err = store.save_task_instance(&attempt).await.err();
        assert_eq!(err, Some(PersistenceError::missing_row("task_instance", 9)));
        assert!(err.is_some_and(|e| !e.is_retryable()));
    }
}
