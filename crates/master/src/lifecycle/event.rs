//! Lifecycle events: closed, immutable instructions that advance a workflow
//! or task state machine.
//!
//! Both families carry a delay. Zero means "visible now"; anything else is
//! held back by the [`EventBus`](super::EventBus) until its deadline.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use drover_core::{TaskCode, TaskInstanceId, WorkflowInstanceId};

use super::error::{LifecycleError, LifecycleResult};
use crate::model::{TaskInstance, TaskState};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Anything the bus can hold back for a while.
pub trait DelayedEvent {
    fn delay(&self) -> Duration;
}

/// Discriminant of a workflow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowEventType {
    Start,
    Pause,
    Stop,
    TaskFinished,
    Finalize,
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::Pause => "PAUSE",
            Self::Stop => "STOP",
            Self::TaskFinished => "TASK_FINISHED",
            Self::Finalize => "FINALIZE",
        };
        f.write_str(name)
    }
}

/// Discriminant of a task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEventType {
    Dispatch,
    Running,
    Retry,
    Timeout,
    Kill,
    Success,
    Fail,
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dispatch => "DISPATCH",
            Self::Running => "RUNNING",
            Self::Retry => "RETRY",
            Self::Timeout => "TIMEOUT",
            Self::Kill => "KILL",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEventKind {
    Start,
    Pause,
    Stop,
    /// A task attempt reached a state its workflow has to react to.
    TaskFinished {
        task_code: TaskCode,
        task_instance_id: TaskInstanceId,
        state: TaskState,
    },
    /// Nothing is left to run; compute the terminal state.
    Finalize,
}

impl WorkflowEventKind {
    #[must_use]
    pub const fn event_type(&self) -> WorkflowEventType {
        match self {
            Self::Start => WorkflowEventType::Start,
            Self::Pause => WorkflowEventType::Pause,
            Self::Stop => WorkflowEventType::Stop,
            Self::TaskFinished { .. } => WorkflowEventType::TaskFinished,
            Self::Finalize => WorkflowEventType::Finalize,
        }
    }
}

/// Event addressed to a workflow runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLifecycleEvent {
    pub workflow_instance_id: WorkflowInstanceId,
    pub kind: WorkflowEventKind,
    pub delay: Duration,
}

impl WorkflowLifecycleEvent {
    const fn immediate(workflow_instance_id: WorkflowInstanceId, kind: WorkflowEventKind) -> Self {
        Self {
            workflow_instance_id,
            kind,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn start(id: WorkflowInstanceId) -> Self {
        Self::immediate(id, WorkflowEventKind::Start)
    }

    #[must_use]
    pub const fn pause(id: WorkflowInstanceId) -> Self {
        Self::immediate(id, WorkflowEventKind::Pause)
    }

    #[must_use]
    pub const fn stop(id: WorkflowInstanceId) -> Self {
        Self::immediate(id, WorkflowEventKind::Stop)
    }

    #[must_use]
    pub const fn task_finished(
        id: WorkflowInstanceId,
        task_code: TaskCode,
        task_instance_id: TaskInstanceId,
        state: TaskState,
    ) -> Self {
        Self::immediate(
            id,
            WorkflowEventKind::TaskFinished {
                task_code,
                task_instance_id,
                state,
            },
        )
    }

    #[must_use]
    pub const fn finalize(id: WorkflowInstanceId) -> Self {
        Self::immediate(id, WorkflowEventKind::Finalize)
    }

    #[must_use]
    pub const fn event_type(&self) -> WorkflowEventType {
        self.kind.event_type()
    }
}

/// What the worker reported when it accepted a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInfo {
    pub host: String,
    pub start_time: DateTime<Utc>,
    pub log_path: Option<String>,
    pub runtime_context: Option<String>,
    pub app_ids: Vec<String>,
}

impl RunningInfo {
    #[must_use]
    pub fn new(host: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            host: host.into(),
            start_time,
            log_path: None,
            runtime_context: None,
            app_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_runtime_context(mut self, context: impl Into<String>) -> Self {
        self.runtime_context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_app_ids(mut self, app_ids: Vec<String>) -> Self {
        self.app_ids = app_ids;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventKind {
    /// Pick a host and ship the task. `attempt` counts re-dispatches caused by
    /// host unavailability.
    Dispatch { attempt: u32 },
    Running(RunningInfo),
    Retry,
    Timeout,
    /// `cancel_on_worker` is false when the worker itself reported the kill.
    Kill { cancel_on_worker: bool },
    Success { end_time: DateTime<Utc> },
    Fail { reason: String },
}

impl TaskEventKind {
    #[must_use]
    pub const fn event_type(&self) -> TaskEventType {
        match self {
            Self::Dispatch { .. } => TaskEventType::Dispatch,
            Self::Running(_) => TaskEventType::Running,
            Self::Retry => TaskEventType::Retry,
            Self::Timeout => TaskEventType::Timeout,
            Self::Kill { .. } => TaskEventType::Kill,
            Self::Success { .. } => TaskEventType::Success,
            Self::Fail { .. } => TaskEventType::Fail,
        }
    }
}

/// Event addressed to one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLifecycleEvent {
    pub task_instance_id: TaskInstanceId,
    pub kind: TaskEventKind,
    pub delay: Duration,
}

impl TaskLifecycleEvent {
    const fn immediate(task_instance_id: TaskInstanceId, kind: TaskEventKind) -> Self {
        Self {
            task_instance_id,
            kind,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn dispatch(id: TaskInstanceId) -> Self {
        Self::immediate(id, TaskEventKind::Dispatch { attempt: 0 })
    }

    /// Re-dispatch after a backoff, used when no host was available.
    #[must_use]
    pub const fn dispatch_after(id: TaskInstanceId, attempt: u32, delay: Duration) -> Self {
        Self {
            task_instance_id: id,
            kind: TaskEventKind::Dispatch { attempt },
            delay,
        }
    }

    #[must_use]
    pub const fn running(id: TaskInstanceId, info: RunningInfo) -> Self {
        Self::immediate(id, TaskEventKind::Running(info))
    }

    /// Kill requested by the master; the worker is told to cancel.
    #[must_use]
    pub const fn kill(id: TaskInstanceId) -> Self {
        Self::immediate(
            id,
            TaskEventKind::Kill {
                cancel_on_worker: true,
            },
        )
    }

    /// Kill reported by the worker; nothing to cancel.
    #[must_use]
    pub const fn killed_by_worker(id: TaskInstanceId) -> Self {
        Self::immediate(
            id,
            TaskEventKind::Kill {
                cancel_on_worker: false,
            },
        )
    }

    #[must_use]
    pub const fn success(id: TaskInstanceId, end_time: DateTime<Utc>) -> Self {
        Self::immediate(id, TaskEventKind::Success { end_time })
    }

    #[must_use]
    pub fn fail(id: TaskInstanceId, reason: impl Into<String>) -> Self {
        Self::immediate(
            id,
            TaskEventKind::Fail {
                reason: reason.into(),
            },
        )
    }

    /// RETRY for `task`, due `retry_interval` after the attempt ended.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::IllegalStateTransition`] when the task has
    /// no retries left.
    pub fn retry(task: &TaskInstance, now: DateTime<Utc>) -> LifecycleResult<Self> {
        if !task.can_retry() {
            return Err(LifecycleError::illegal_transition(
                format!("task instance {}", task.id),
                format!(
                    "retry_times {} must be below max_retry_times {}",
                    task.retry_times, task.max_retry_times
                ),
            ));
        }

        let interval = i64::from(task.retry_interval_minutes).saturating_mul(MILLIS_PER_MINUTE);
        let delay = interval.saturating_add(millis_since(now, task.end_time));
        Ok(Self {
            task_instance_id: task.id,
            kind: TaskEventKind::Retry,
            delay: clamp_millis(delay),
        })
    }

    /// TIMEOUT for `task`, computed from its submit time and configured
    /// timeout.
    #[must_use]
    pub fn timeout(task: &TaskInstance, now: DateTime<Utc>) -> Self {
        let timeout = i64::from(task.timeout_minutes).saturating_mul(MILLIS_PER_MINUTE);
        let delay = millis_since(now, task.submit_time).saturating_add(timeout);
        Self {
            task_instance_id: task.id,
            kind: TaskEventKind::Timeout,
            delay: clamp_millis(delay),
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> TaskEventType {
        self.kind.event_type()
    }
}

/// Everything that travels on a workflow instance's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Workflow(WorkflowLifecycleEvent),
    Task(TaskLifecycleEvent),
}

impl From<WorkflowLifecycleEvent> for LifecycleEvent {
    fn from(event: WorkflowLifecycleEvent) -> Self {
        Self::Workflow(event)
    }
}

impl From<TaskLifecycleEvent> for LifecycleEvent {
    fn from(event: TaskLifecycleEvent) -> Self {
        Self::Task(event)
    }
}

impl DelayedEvent for LifecycleEvent {
    fn delay(&self) -> Duration {
        match self {
            Self::Workflow(e) => e.delay,
            Self::Task(e) => e.delay,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow(e) => write!(f, "workflow {} {}", e.workflow_instance_id, e.event_type()),
            Self::Task(e) => write!(f, "task {} {}", e.task_instance_id, e.event_type()),
        }
    }
}

/// Milliseconds from `since` to `now`; a missing timestamp counts as `now`.
fn millis_since(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> i64 {
    since.map_or(0, |t| now.signed_duration_since(t).num_milliseconds())
}

fn clamp_millis(millis: i64) -> Duration {
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;
    use chrono::TimeDelta;

    use crate::model::{Command, CommandType, TaskDefinition, TimeoutStrategy, WorkflowDefinition, WorkflowInstance};
    use drover_core::WorkflowCode;

    fn task(max_retry: u32, interval: u32) -> TaskInstance {
        let def = WorkflowDefinition::new(WorkflowCode::new(1), 1, "wf");
        let cmd = Command::new(CommandType::StartWorkflow, WorkflowCode::new(1), 1);
        let wf = WorkflowInstance::from_command(&cmd, &def, Utc::now());
        let td = TaskDefinition::new(TaskCode::new(1), "t", "SHELL")
            .with_retries(max_retry, interval)
            .with_timeout(10, TimeoutStrategy::Failed);
        TaskInstance::first_attempt(&td, &wf, "default", Utc::now())
    }

    #[test]
    fn test_retry_rejected_when_retries_exhausted() {
        let mut t = task(2, 1);
        t.retry_times = 2;
        let result = TaskLifecycleEvent::retry(&t, Utc::now());
        assert!(matches!(
            result,
            Err(LifecycleError::IllegalStateTransition { .. })
        ));

        t.retry_times = 3;
        assert!(TaskLifecycleEvent::retry(&t, Utc::now()).is_err());
    }

    #[test]
    fn test_retry_delay_follows_interval_and_end_time() {
        let now = Utc::now();
        let mut t = task(3, 2);
        t.end_time = Some(now);

        let event = TaskLifecycleEvent::retry(&t, now);
        assert_eq!(event.map(|e| e.delay), Ok(Duration::from_millis(120_000)));

        t.end_time = Some(now - TimeDelta::seconds(30));
        let event = TaskLifecycleEvent::retry(&t, now);
        assert_eq!(event.map(|e| e.delay), Ok(Duration::from_millis(150_000)));
    }

    #[test]
    fn test_retry_delay_never_negative() {
        let now = Utc::now();
        let mut t = task(1, 0);
        t.end_time = Some(now + TimeDelta::seconds(5));
        let event = TaskLifecycleEvent::retry(&t, now);
        assert_eq!(event.map(|e| e.delay), Ok(Duration::ZERO));
    }

    #[test]
    fn test_timeout_delay_counts_from_submit_time() {
        let now = Utc::now();
        let mut t = task(0, 0);
        t.submit_time = Some(now - TimeDelta::seconds(1));

        let event = TaskLifecycleEvent::timeout(&t, now);
        assert_eq!(event.delay, Duration::from_millis(601_000));
        assert_eq!(event.event_type(), TaskEventType::Timeout);
    }

    #[test]
    fn test_default_events_are_immediate() {
        let id = TaskInstanceId::new(1);
        assert_eq!(TaskLifecycleEvent::dispatch(id).delay, Duration::ZERO);
        assert_eq!(TaskLifecycleEvent::kill(id).delay, Duration::ZERO);
        assert_eq!(
            WorkflowLifecycleEvent::start(WorkflowInstanceId::new(1)).delay,
            Duration::ZERO
        );
    }

    #[test]
    fn test_event_display_names_type() {
        let event: LifecycleEvent = WorkflowLifecycleEvent::finalize(WorkflowInstanceId::new(8)).into();
        assert_eq!(event.to_string(), "workflow 8 FINALIZE");

        let event: LifecycleEvent = TaskLifecycleEvent::fail(TaskInstanceId::new(3), "boom").into();
        assert_eq!(event.to_string(), "task 3 FAIL");
    }
}
