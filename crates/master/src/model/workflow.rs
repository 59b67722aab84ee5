//! Workflow definitions and instances.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use drover_core::{TaskCode, WorkflowCode, WorkflowInstanceId};
use serde::{Deserialize, Serialize};

use super::command::{Command, CommandType, Priority};
use super::task::TaskDefinition;

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Submitted,
    Running,
    ReadyPause,
    Pause,
    ReadyStop,
    Stop,
    Success,
    Failure,
}

impl WorkflowState {
    /// Terminal for the live runnable. Only a new command can revive the
    /// instance.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Pause | Self::Stop | Self::Success | Self::Failure)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Running | Self::Failure)
                | (
                    Self::Running,
                    Self::ReadyPause | Self::ReadyStop | Self::Success | Self::Failure
                )
                | (Self::ReadyPause, Self::Pause | Self::ReadyStop)
                | (Self::ReadyStop, Self::Stop)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::ReadyPause => "READY_PAUSE",
            Self::Pause => "PAUSE",
            Self::ReadyStop => "READY_STOP",
            Self::Stop => "STOP",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        };
        f.write_str(name)
    }
}

/// What a workflow does when one of its tasks fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Fail fast: kill the remaining tasks and fail the workflow.
    #[default]
    End,
    /// Keep running every branch the failure does not block.
    Continue,
}

/// Edge `pre -> post` in a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRelation {
    pub pre: TaskCode,
    pub post: TaskCode,
}

/// An authored, versioned DAG of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub code: WorkflowCode,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub relations: Vec<TaskRelation>,
}

impl WorkflowDefinition {
    #[must_use]
    pub fn new(code: WorkflowCode, version: u32, name: impl Into<String>) -> Self {
        Self {
            code,
            version,
            name: name.into(),
            tasks: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, pre: TaskCode, post: TaskCode) -> Self {
        self.relations.push(TaskRelation { pre, post });
        self
    }

    #[must_use]
    pub fn task(&self, code: TaskCode) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.code == code)
    }
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    pub workflow_code: WorkflowCode,
    pub workflow_version: u32,
    pub name: String,
    pub state: WorkflowState,
    pub command_type: CommandType,
    /// Comma-separated command types that (re)started this instance, oldest
    /// first.
    pub command_history: String,
    pub priority: Priority,
    pub worker_group: Option<String>,
    pub failure_strategy: FailureStrategy,
    pub dry_run: bool,
    pub recovery: bool,
    pub run_times: u32,
    pub params: BTreeMap<String, String>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub restart_time: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Fresh SUBMITTED instance for a new-run command. The id is assigned by
    /// the DAO on insert.
    #[must_use]
    pub fn from_command(command: &Command, definition: &WorkflowDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: WorkflowInstanceId::new(0),
            workflow_code: definition.code,
            workflow_version: definition.version,
            name: format!("{}-{}", definition.name, now.format("%Y%m%d%H%M%S%3f")),
            state: WorkflowState::Submitted,
            command_type: command.command_type,
            command_history: command.command_type.as_str().to_string(),
            priority: command.priority,
            worker_group: command.worker_group.clone(),
            failure_strategy: command.failure_strategy.unwrap_or_default(),
            dry_run: command.dry_run,
            recovery: false,
            run_times: 1,
            params: command.params.clone(),
            schedule_time: command.schedule_time,
            start_time: None,
            end_time: None,
            restart_time: None,
        }
    }

    /// Reset a finished (or orphaned) instance so it can run again under a
    /// recovery command.
    pub fn prepare_rerun(&mut self, command: &Command, now: DateTime<Utc>) {
        self.state = WorkflowState::Submitted;
        self.command_type = command.command_type;
        self.append_history(command.command_type);
        self.recovery = !matches!(command.command_type, CommandType::RepeatRunning);
        self.run_times = self.run_times.saturating_add(1);
        self.restart_time = Some(now);
        self.end_time = None;
        if let Some(strategy) = command.failure_strategy {
            self.failure_strategy = strategy;
        }
        if command.dry_run {
            self.dry_run = true;
        }
        self.params.extend(command.params.clone());
    }

    pub fn append_history(&mut self, command_type: CommandType) {
        if self.command_history.is_empty() {
            self.command_history = command_type.as_str().to_string();
        } else {
            self.command_history.push(',');
            self.command_history.push_str(command_type.as_str());
        }
    }

    /// Command types recorded in the history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.command_history.split(',').filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowCode::new(1), 1, "nightly")
    }

    #[test]
    fn test_legal_transitions() {
        use WorkflowState::*;
        assert!(Submitted.can_transition_to(Running));
        assert!(Running.can_transition_to(ReadyPause));
        assert!(ReadyPause.can_transition_to(Pause));
        assert!(ReadyPause.can_transition_to(ReadyStop));
        assert!(ReadyStop.can_transition_to(Stop));
        assert!(Running.can_transition_to(Success));

        assert!(!Success.can_transition_to(Running));
        assert!(!Pause.can_transition_to(Running));
        assert!(!ReadyStop.can_transition_to(Pause));
        assert!(!Submitted.can_transition_to(Success));
    }

    #[test]
    fn test_finished_states() {
        assert!(WorkflowState::Pause.is_finished());
        assert!(WorkflowState::Stop.is_finished());
        assert!(!WorkflowState::ReadyStop.is_finished());
        assert!(!WorkflowState::Running.is_finished());
    }

    #[test]
    fn test_from_command_copies_run_settings() {
        let cmd = Command::new(CommandType::Scheduler, WorkflowCode::new(1), 1)
            .with_failure_strategy(FailureStrategy::Continue)
            .with_param("k", "v");
        let instance = WorkflowInstance::from_command(&cmd, &definition(), Utc::now());

        assert_eq!(instance.state, WorkflowState::Submitted);
        assert_eq!(instance.failure_strategy, FailureStrategy::Continue);
        assert_eq!(instance.command_history, "SCHEDULER");
        assert_eq!(instance.run_times, 1);
        assert!(instance.name.starts_with("nightly-"));
    }

    #[test]
    fn test_prepare_rerun_appends_history() {
        let cmd = Command::new(CommandType::StartWorkflow, WorkflowCode::new(1), 1);
        let mut instance = WorkflowInstance::from_command(&cmd, &definition(), Utc::now());
        instance.state = WorkflowState::Pause;

        let recover = Command::new(CommandType::RecoverSuspended, WorkflowCode::new(1), 1);
        instance.prepare_rerun(&recover, Utc::now());

        assert_eq!(instance.state, WorkflowState::Submitted);
        assert!(instance.recovery);
        assert_eq!(instance.run_times, 2);
        assert_eq!(
            instance.history().collect::<Vec<_>>(),
            vec!["START_WORKFLOW", "RECOVER_SUSPENDED"]
        );
    }
}
