//! Task definitions and task instances (one row per attempt).

use std::fmt;

use chrono::{DateTime, Utc};
use drover_core::{TaskCode, TaskInstanceId, WorkflowInstanceId};
use serde::{Deserialize, Serialize};

use super::command::Priority;
use super::workflow::WorkflowInstance;

/// Lifecycle state of one task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Submitted,
    Dispatched,
    Running,
    Success,
    Failure,
    Killed,
    /// Triggered but parked before dispatch because its workflow paused.
    Paused,
}

impl TaskState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Killed | Self::Paused
        )
    }

    /// Handed to a worker (or about to be) and not yet finished.
    #[must_use]
    pub const fn is_on_worker(self) -> bool {
        matches!(self, Self::Dispatched | Self::Running)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Submitted,
                Self::Dispatched | Self::Success | Self::Killed | Self::Paused
            ) | (
                Self::Dispatched,
                Self::Running | Self::Success | Self::Failure | Self::Killed
            ) | (Self::Running, Self::Success | Self::Failure | Self::Killed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "SUBMITTED",
            Self::Dispatched => "DISPATCHED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Killed => "KILLED",
            Self::Paused => "PAUSE",
        };
        f.write_str(name)
    }
}

/// Reaction to a task exceeding its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStrategy {
    /// Alert only; the task keeps running.
    Warn,
    /// Fail the attempt without retrying.
    Failed,
    /// Kill the attempt, then retry if retries remain.
    KillAndRetry,
}

/// A node of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub code: TaskCode,
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub worker_group: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub max_retry_times: u32,
    #[serde(default)]
    pub retry_interval_minutes: u32,
    #[serde(default)]
    pub timeout_minutes: u32,
    #[serde(default)]
    pub timeout_strategy: Option<TimeoutStrategy>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl TaskDefinition {
    #[must_use]
    pub fn new(code: TaskCode, name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            task_type: task_type.into(),
            worker_group: None,
            priority: Priority::default(),
            max_retry_times: 0,
            retry_interval_minutes: 0,
            timeout_minutes: 0,
            timeout_strategy: None,
            params: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_worker_group(mut self, group: impl Into<String>) -> Self {
        self.worker_group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn with_retries(mut self, max_retry_times: u32, retry_interval_minutes: u32) -> Self {
        self.max_retry_times = max_retry_times;
        self.retry_interval_minutes = retry_interval_minutes;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, minutes: u32, strategy: TimeoutStrategy) -> Self {
        self.timeout_minutes = minutes;
        self.timeout_strategy = Some(strategy);
        self
    }
}

/// One attempt of one task node inside a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: TaskInstanceId,
    pub workflow_instance_id: WorkflowInstanceId,
    pub task_code: TaskCode,
    pub name: String,
    pub task_type: String,
    pub state: TaskState,
    pub host: Option<String>,
    pub worker_group: String,
    pub priority: Priority,
    pub retry_times: u32,
    pub max_retry_times: u32,
    pub retry_interval_minutes: u32,
    pub timeout_minutes: u32,
    pub timeout_strategy: Option<TimeoutStrategy>,
    pub submit_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub log_path: Option<String>,
    pub runtime_context: Option<String>,
    pub app_ids: Vec<String>,
    pub dry_run: bool,
}

impl TaskInstance {
    /// First attempt of `definition` inside `workflow`. The task's own worker
    /// group wins over the workflow's, which wins over `default_group`.
    #[must_use]
    pub fn first_attempt(
        definition: &TaskDefinition,
        workflow: &WorkflowInstance,
        default_group: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let worker_group = definition
            .worker_group
            .clone()
            .or_else(|| workflow.worker_group.clone())
            .unwrap_or_else(|| default_group.to_string());

        Self {
            id: TaskInstanceId::new(0),
            workflow_instance_id: workflow.id,
            task_code: definition.code,
            name: definition.name.clone(),
            task_type: definition.task_type.clone(),
            state: TaskState::Submitted,
            host: None,
            worker_group,
            priority: definition.priority,
            retry_times: 0,
            max_retry_times: definition.max_retry_times,
            retry_interval_minutes: definition.retry_interval_minutes,
            timeout_minutes: definition.timeout_minutes,
            timeout_strategy: definition.timeout_strategy,
            submit_time: Some(now),
            start_time: None,
            end_time: None,
            log_path: None,
            runtime_context: None,
            app_ids: Vec::new(),
            dry_run: workflow.dry_run,
        }
    }

    /// The attempt that follows this one. Its id is assigned on insert.
    #[must_use]
    pub fn next_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskInstanceId::new(0),
            state: TaskState::Submitted,
            host: None,
            retry_times: self.retry_times.saturating_add(1),
            submit_time: Some(now),
            start_time: None,
            end_time: None,
            log_path: None,
            runtime_context: None,
            app_ids: Vec::new(),
            ..self.clone()
        }
    }

    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_times < self.max_retry_times
    }

    #[must_use]
    pub const fn timeout_enabled(&self) -> bool {
        self.timeout_strategy.is_some() && self.timeout_minutes > 0
    }
}
