//! Per command type preparation of the workflow instance to run.
//!
//! New-run commands create a SUBMITTED instance. Recovery commands reload an
//! existing one, check it is in a state the command may resume, and collect
//! the task codes whose latest attempt already succeeded.

use std::sync::Arc;

use chrono::Utc;
use drover_core::{TaskCode, WorkflowCode};
use itertools::Itertools;
use tracing::{debug, info, warn};

use super::error::{FactoryError, FactoryResult};
use crate::graph::{ExecutionGraph, NodeStatus};
use crate::model::{Command, CommandType, TaskState, WorkflowDefinition, WorkflowInstance, WorkflowState};
use crate::persistence::{TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao};

/// Everything the factory needs to build a runnable.
#[derive(Debug)]
pub(crate) struct PreparedWorkflow {
    pub instance: WorkflowInstance,
    pub definition: WorkflowDefinition,
    /// Restored nodes are already marked succeeded.
    pub graph: ExecutionGraph,
}

pub(crate) struct CommandHandlers {
    definitions: Arc<dyn WorkflowDefinitionDao>,
    workflows: Arc<dyn WorkflowInstanceDao>,
    tasks: Arc<dyn TaskInstanceDao>,
}

impl CommandHandlers {
    pub(crate) fn new(
        definitions: Arc<dyn WorkflowDefinitionDao>,
        workflows: Arc<dyn WorkflowInstanceDao>,
        tasks: Arc<dyn TaskInstanceDao>,
    ) -> Self {
        Self {
            definitions,
            workflows,
            tasks,
        }
    }

    pub(crate) async fn prepare(&self, command: &Command) -> FactoryResult<PreparedWorkflow> {
        match command.command_type {
            CommandType::StartWorkflow | CommandType::Scheduler | CommandType::SubWorkflow => {
                self.new_instance(command).await
            }
            CommandType::RepeatRunning => self.rerun(command, WorkflowState::is_finished, false).await,
            CommandType::RecoverSuspended => {
                self.rerun(command, |s| matches!(s, WorkflowState::Pause | WorkflowState::Stop), true)
                    .await
            }
            CommandType::StartFailureTask => {
                self.rerun(command, |s| s == WorkflowState::Failure, true).await
            }
            CommandType::RecoverToleranceFault => self.rerun(command, |s| !s.is_finished(), true).await,
        }
    }

    async fn new_instance(&self, command: &Command) -> FactoryResult<PreparedWorkflow> {
        let definition = self
            .load_definition(command, command.workflow_code, command.workflow_version)
            .await?;
        let graph = build_graph(command, &definition)?;
        let mut instance = WorkflowInstance::from_command(command, &definition, Utc::now());
        instance.id = self.workflows.insert_workflow_instance(instance.clone()).await?;
        info!(
            command_id = %command.id,
            command_type = %command.command_type,
            workflow_instance_id = %instance.id,
            "workflow instance created"
        );
        Ok(PreparedWorkflow {
            instance,
            definition,
            graph,
        })
    }

    async fn rerun(
        &self,
        command: &Command,
        accepts: fn(WorkflowState) -> bool,
        keep_succeeded: bool,
    ) -> FactoryResult<PreparedWorkflow> {
        let Some(id) = command.workflow_instance_id else {
            return Err(FactoryError::malformed(
                command.id,
                format!("{} needs a workflow instance id", command.command_type),
            ));
        };
        let Some(mut instance) = self.workflows.load_workflow_instance(id).await? else {
            return Err(FactoryError::malformed(
                command.id,
                format!("workflow instance {id} does not exist"),
            ));
        };
        if !accepts(instance.state) {
            return Err(FactoryError::malformed(
                command.id,
                format!(
                    "workflow instance {id} is {}, {} does not apply",
                    instance.state, command.command_type
                ),
            ));
        }

        let definition = self
            .load_definition(command, instance.workflow_code, instance.workflow_version)
            .await?;
        let mut graph = build_graph(command, &definition)?;
        let mut restored = 0_usize;
        if keep_succeeded {
            for code in self.succeeded_tasks(&instance).await? {
                match graph.mark(code, NodeStatus::Succeeded) {
                    Ok(()) => restored = restored.saturating_add(1),
                    Err(e) => warn!(
                        workflow_instance_id = %instance.id,
                        error = %e,
                        "restored task no longer in definition"
                    ),
                }
            }
        }

        instance.prepare_rerun(command, Utc::now());
        self.workflows.save_workflow_instance(&instance).await?;
        info!(
            command_id = %command.id,
            command_type = %command.command_type,
            workflow_instance_id = %instance.id,
            run_times = instance.run_times,
            restored,
            "workflow instance prepared for rerun"
        );
        Ok(PreparedWorkflow {
            instance,
            definition,
            graph,
        })
    }

    /// Codes whose most recent attempt ended in SUCCESS.
    async fn succeeded_tasks(&self, instance: &WorkflowInstance) -> FactoryResult<Vec<TaskCode>> {
        let attempts = self.tasks.list_task_instances(instance.id).await?;
        let succeeded: Vec<TaskCode> = attempts
            .into_iter()
            .into_grouping_map_by(|t| t.task_code)
            .max_by_key(|_, t| t.id)
            .into_values()
            .filter(|t| t.state == TaskState::Success)
            .map(|t| t.task_code)
            .sorted()
            .collect();
        debug!(
            workflow_instance_id = %instance.id,
            succeeded = succeeded.len(),
            "restored succeeded tasks"
        );
        Ok(succeeded)
    }

    async fn load_definition(
        &self,
        command: &Command,
        code: WorkflowCode,
        version: u32,
    ) -> FactoryResult<WorkflowDefinition> {
        self.definitions
            .load_definition(code, version)
            .await?
            .ok_or_else(|| {
                FactoryError::malformed(
                    command.id,
                    format!("workflow definition {code} version {version} does not exist"),
                )
            })
    }
}

fn build_graph(command: &Command, definition: &WorkflowDefinition) -> FactoryResult<ExecutionGraph> {
    ExecutionGraph::build(definition).map_err(|e| FactoryError::malformed(command.id, e.to_string()))
}
