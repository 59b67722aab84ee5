//! Commands: durable requests to create or recover a workflow run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use drover_core::{CommandId, WorkflowCode, WorkflowInstanceId};
use serde::{Deserialize, Serialize};

use super::workflow::FailureStrategy;

/// What a command asks the master to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Manual start of a new run.
    StartWorkflow,
    /// Start issued by the cron scheduler.
    Scheduler,
    /// Start of a child run on behalf of a parent task.
    SubWorkflow,
    /// Rerun a finished instance from scratch.
    RepeatRunning,
    /// Resume a paused or stopped instance.
    RecoverSuspended,
    /// Rerun the failed part of a failed instance.
    StartFailureTask,
    /// Take over an instance left behind by a crashed master.
    RecoverToleranceFault,
}

impl CommandType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartWorkflow => "START_WORKFLOW",
            Self::Scheduler => "SCHEDULER",
            Self::SubWorkflow => "SUB_WORKFLOW",
            Self::RepeatRunning => "REPEAT_RUNNING",
            Self::RecoverSuspended => "RECOVER_SUSPENDED",
            Self::StartFailureTask => "START_FAILURE_TASK",
            Self::RecoverToleranceFault => "RECOVER_TOLERANCE_FAULT",
        }
    }

    /// Whether this command type creates a brand-new workflow instance
    /// instead of reusing an existing one.
    #[must_use]
    pub const fn creates_new_instance(self) -> bool {
        matches!(
            self,
            Self::StartWorkflow | Self::Scheduler | Self::SubWorkflow
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority carried from command to instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
}

/// A durable request to run a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub command_type: CommandType,
    pub workflow_code: WorkflowCode,
    pub workflow_version: u32,
    /// Target instance for recovery command types.
    pub workflow_instance_id: Option<WorkflowInstanceId>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub priority: Priority,
    pub worker_group: Option<String>,
    pub dry_run: bool,
    pub failure_strategy: Option<FailureStrategy>,
    pub created_at: DateTime<Utc>,
}

impl Command {
    /// New command with an unassigned id; the DAO assigns one on insert.
    #[must_use]
    pub fn new(command_type: CommandType, workflow_code: WorkflowCode, workflow_version: u32) -> Self {
        Self {
            id: CommandId::new(0),
            command_type,
            workflow_code,
            workflow_version,
            workflow_instance_id: None,
            schedule_time: None,
            params: BTreeMap::new(),
            priority: Priority::default(),
            worker_group: None,
            dry_run: false,
            failure_strategy: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_workflow_instance(mut self, id: WorkflowInstanceId) -> Self {
        self.workflow_instance_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_worker_group(mut self, group: impl Into<String>) -> Self {
        self.worker_group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub const fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = Some(strategy);
        self
    }

    #[must_use]
    pub const fn with_schedule_time(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_time = Some(at);
        self
    }
}

/// A command that could not be turned into a run, kept for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCommand {
    pub command: Command,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_command_types() {
        assert!(CommandType::StartWorkflow.creates_new_instance());
        assert!(CommandType::Scheduler.creates_new_instance());
        assert!(CommandType::SubWorkflow.creates_new_instance());
        assert!(!CommandType::RecoverSuspended.creates_new_instance());
        assert!(!CommandType::RepeatRunning.creates_new_instance());
    }

    #[test]
    fn test_builder_sets_fields() {
        let cmd = Command::new(CommandType::RecoverSuspended, WorkflowCode::new(3), 2)
            .with_workflow_instance(WorkflowInstanceId::new(11))
            .with_param("bizdate", "2026-01-01")
            .with_worker_group("etl")
            .with_dry_run(true);

        assert_eq!(cmd.workflow_instance_id, Some(WorkflowInstanceId::new(11)));
        assert_eq!(cmd.params.get("bizdate").map(String::as_str), Some("2026-01-01"));
        assert_eq!(cmd.worker_group.as_deref(), Some("etl"));
        assert!(cmd.dry_run);
        assert_eq!(cmd.command_type.to_string(), "RECOVER_SUSPENDED");
    }
}
