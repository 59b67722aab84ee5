//! Task execution runnable: the live controller of one task attempt.
//!
//! Only the owning workflow's consumer task calls into it, so it mutates its
//! instance freely. Every handler first checks that the event still applies
//! to the current state; stale events are logged and dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drover_core::{TaskCode, TaskInstanceId};
use tracing::{debug, error, info, warn};

use super::context::ExecutionContext;
use super::listener::ListenerRegistry;
use crate::lifecycle::{
    EventBus, LifecycleEvent, RunningInfo, TaskEventKind, TaskLifecycleEvent,
    WorkflowLifecycleEvent,
};
use crate::model::{TaskInstance, TaskState, TimeoutStrategy};

#[derive(Debug)]
pub struct TaskExecutionRunnable {
    instance: TaskInstance,
    /// Failed or killed, with a RETRY event pending on the bus.
    awaiting_retry: bool,
    bus: Arc<EventBus<LifecycleEvent>>,
    listeners: Arc<ListenerRegistry>,
    ctx: Arc<ExecutionContext>,
}

impl TaskExecutionRunnable {
    pub(crate) const fn new(
        instance: TaskInstance,
        bus: Arc<EventBus<LifecycleEvent>>,
        listeners: Arc<ListenerRegistry>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        Self {
            instance,
            awaiting_retry: false,
            bus,
            listeners,
            ctx,
        }
    }

    #[must_use]
    pub const fn instance(&self) -> &TaskInstance {
        &self.instance
    }

    #[must_use]
    pub const fn id(&self) -> TaskInstanceId {
        self.instance.id
    }

    #[must_use]
    pub const fn code(&self) -> TaskCode {
        self.instance.task_code
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.instance.state
    }

    #[must_use]
    pub const fn is_awaiting_retry(&self) -> bool {
        self.awaiting_retry
    }

    /// Still owes its workflow a TASK_FINISHED.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.instance.state.is_finished() || self.awaiting_retry
    }

    /// Apply one event. `may_continue` is false once the workflow stopped
    /// accepting new work (not running, or failing fast): no attempt is
    /// dispatched or retried after that.
    pub(crate) async fn handle_event(&mut self, kind: TaskEventKind, may_continue: bool) {
        debug!(
            task_instance_id = %self.instance.id,
            event = %kind.event_type(),
            state = %self.instance.state,
            "task event"
        );
        match kind {
            TaskEventKind::Dispatch { attempt } => self.on_dispatch(attempt, may_continue).await,
            TaskEventKind::Running(info) => self.on_running(info).await,
            TaskEventKind::Retry => self.on_retry(may_continue).await,
            TaskEventKind::Timeout => self.on_timeout(may_continue).await,
            TaskEventKind::Kill { cancel_on_worker } => self.on_kill(cancel_on_worker).await,
            TaskEventKind::Success { end_time } => self.on_success(end_time).await,
            TaskEventKind::Fail { reason } => self.on_fail(&reason, may_continue).await,
        }
    }

    /// Park an undispatched attempt, or drop a pending retry, because the
    /// workflow is pausing.
    pub(crate) async fn pause(&mut self) {
        if self.awaiting_retry {
            self.cancel_retry();
        } else if self.instance.state == TaskState::Submitted && self.move_to(TaskState::Paused).await {
            self.finish();
        }
    }

    async fn on_dispatch(&mut self, attempt: u32, may_continue: bool) {
        if self.instance.state != TaskState::Submitted {
            debug!(task_instance_id = %self.instance.id, "stale dispatch discarded");
            return;
        }
        if !may_continue {
            debug!(task_instance_id = %self.instance.id, "workflow not accepting work, dispatch skipped");
            return;
        }

        if self.instance.dry_run {
            let now = Utc::now();
            self.instance.start_time = Some(now);
            self.instance.end_time = Some(now);
            if self.move_to(TaskState::Success).await {
                self.finish();
            }
            return;
        }

        let group = self.instance.worker_group.clone();
        let candidates = self.ctx.workers.candidates(&group);
        let host = match self.ctx.selector.select(&group, &candidates) {
            Ok(host) => host,
            Err(e) => {
                let delay = self.ctx.dispatch_backoff(attempt);
                warn!(
                    task_instance_id = %self.instance.id,
                    worker_group = %group,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "no host available, dispatch postponed"
                );
                self.publish(TaskLifecycleEvent::dispatch_after(
                    self.instance.id,
                    attempt.saturating_add(1),
                    delay,
                ));
                return;
            }
        };

        self.instance.host = Some(host.address.clone());
        if !self.move_to(TaskState::Dispatched).await {
            return;
        }
        match self.ctx.dispatcher.dispatch(&host.address, &self.instance).await {
            Ok(()) => info!(
                task_instance_id = %self.instance.id,
                host = %host.address,
                "task dispatched"
            ),
            Err(e) => {
                warn!(
                    task_instance_id = %self.instance.id,
                    host = %host.address,
                    error = %e,
                    "dispatch failed"
                );
                self.publish(TaskLifecycleEvent::fail(self.instance.id, e.to_string()));
            }
        }
    }

    async fn on_running(&mut self, info: RunningInfo) {
        if self.instance.state != TaskState::Dispatched {
            debug!(task_instance_id = %self.instance.id, "stale running report discarded");
            return;
        }
        self.instance.host = Some(info.host);
        self.instance.start_time = Some(info.start_time);
        self.instance.log_path = info.log_path;
        self.instance.runtime_context = info.runtime_context;
        self.instance.app_ids = info.app_ids;
        if !self.move_to(TaskState::Running).await {
            return;
        }

        if self.instance.timeout_enabled() {
            let timeout = TaskLifecycleEvent::timeout(&self.instance, Utc::now());
            debug!(
                task_instance_id = %self.instance.id,
                delay_ms = u64::try_from(timeout.delay.as_millis()).unwrap_or(u64::MAX),
                "timeout scheduled"
            );
            self.publish(timeout);
        }
    }

    async fn on_success(&mut self, end_time: DateTime<Utc>) {
        if !self.instance.state.is_on_worker() {
            debug!(task_instance_id = %self.instance.id, "stale success discarded");
            return;
        }
        self.instance.end_time = Some(end_time);
        if self.move_to(TaskState::Success).await {
            self.finish();
        }
    }

    async fn on_fail(&mut self, reason: &str, may_continue: bool) {
        if !self.instance.state.is_on_worker() {
            debug!(task_instance_id = %self.instance.id, "stale failure discarded");
            return;
        }
        warn!(task_instance_id = %self.instance.id, reason, "task failed");
        self.instance.end_time = Some(Utc::now());
        if self.move_to(TaskState::Failure).await {
            self.retry_or_finish(may_continue);
        }
    }

    async fn on_retry(&mut self, may_continue: bool) {
        if !self.awaiting_retry {
            debug!(task_instance_id = %self.instance.id, "stale retry discarded");
            return;
        }
        self.awaiting_retry = false;
        if !may_continue {
            info!(task_instance_id = %self.instance.id, "workflow not accepting work, retry dropped");
            self.finish();
            return;
        }

        let mut next = self.instance.next_attempt(Utc::now());
        match self.ctx.task_dao.insert_task_instance(next.clone()).await {
            Ok(id) => {
                next.id = id;
                info!(
                    task_code = %next.task_code,
                    previous_attempt = %self.instance.id,
                    task_instance_id = %id,
                    retry_times = next.retry_times,
                    "retrying task"
                );
                self.instance = next;
                self.listeners.task_state_changed(&self.instance, None);
                self.publish(TaskLifecycleEvent::dispatch(id));
            }
            Err(e) => {
                error!(
                    task_instance_id = %self.instance.id,
                    error = %e,
                    "could not persist retry attempt"
                );
                self.finish();
            }
        }
    }

    async fn on_timeout(&mut self, may_continue: bool) {
        if !self.instance.state.is_on_worker() {
            debug!(task_instance_id = %self.instance.id, "stale timeout discarded");
            return;
        }
        let Some(strategy) = self.instance.timeout_strategy else {
            return;
        };
        warn!(
            task_instance_id = %self.instance.id,
            timeout_minutes = self.instance.timeout_minutes,
            ?strategy,
            "task timed out"
        );
        self.listeners.task_timed_out(&self.instance);

        let next = match strategy {
            TimeoutStrategy::Warn => return,
            TimeoutStrategy::Failed => TaskState::Failure,
            TimeoutStrategy::KillAndRetry if may_continue && self.instance.can_retry() => TaskState::Killed,
            TimeoutStrategy::KillAndRetry => TaskState::Failure,
        };

        self.cancel_on_worker().await;
        self.instance.end_time = Some(Utc::now());
        if !self.move_to(next).await {
            return;
        }
        if strategy == TimeoutStrategy::KillAndRetry {
            self.retry_or_finish(may_continue);
        } else {
            self.finish();
        }
    }

    async fn on_kill(&mut self, cancel_on_worker: bool) {
        if self.awaiting_retry {
            // A worker-reported kill here acknowledges the cancel that
            // preceded the retry; only the master may drop the retry.
            if cancel_on_worker {
                self.cancel_retry();
            } else {
                debug!(task_instance_id = %self.instance.id, "worker kill ignored, retry pending");
            }
            return;
        }
        if self.instance.state.is_finished() {
            debug!(task_instance_id = %self.instance.id, "stale kill discarded");
            return;
        }
        if cancel_on_worker && self.instance.state.is_on_worker() {
            self.cancel_on_worker().await;
        }
        self.instance.end_time = Some(Utc::now());
        if self.move_to(TaskState::Killed).await {
            self.finish();
        }
    }

    fn retry_or_finish(&mut self, may_continue: bool) {
        if may_continue && self.instance.can_retry() {
            match TaskLifecycleEvent::retry(&self.instance, Utc::now()) {
                Ok(event) => {
                    info!(
                        task_instance_id = %self.instance.id,
                        retry_times = self.instance.retry_times,
                        max_retry_times = self.instance.max_retry_times,
                        delay_ms = u64::try_from(event.delay.as_millis()).unwrap_or(u64::MAX),
                        "retry scheduled"
                    );
                    self.awaiting_retry = true;
                    self.publish(event);
                    return;
                }
                Err(e) => error!(task_instance_id = %self.instance.id, error = %e, "retry rejected"),
            }
        }
        self.finish();
    }

    /// Drop the pending retry and report the failed attempt as final. The
    /// queued RETRY event is then stale.
    pub(crate) fn cancel_retry(&mut self) {
        self.awaiting_retry = false;
        info!(task_instance_id = %self.instance.id, "pending retry cancelled");
        self.finish();
    }

    async fn cancel_on_worker(&self) {
        let Some(host) = self.instance.host.as_deref() else {
            return;
        };
        if let Err(e) = self.ctx.dispatcher.kill(host, self.instance.id).await {
            warn!(
                task_instance_id = %self.instance.id,
                host,
                error = %e,
                "could not cancel task on worker"
            );
        }
    }

    /// Apply a transition, persist it, and tell the listeners. Returns
    /// `false` when the transition is illegal from the current state.
    async fn move_to(&mut self, next: TaskState) -> bool {
        let from = self.instance.state;
        if !from.can_transition_to(next) {
            debug!(
                task_instance_id = %self.instance.id,
                from = %from,
                to = %next,
                "illegal task transition discarded"
            );
            return false;
        }
        self.instance.state = next;
        info!(
            task_instance_id = %self.instance.id,
            task_code = %self.instance.task_code,
            from = %from,
            to = %next,
            "task state changed"
        );
        if let Err(e) = self.ctx.task_dao.save_task_instance(&self.instance).await {
            error!(task_instance_id = %self.instance.id, error = %e, "could not persist task state");
        }
        self.listeners.task_state_changed(&self.instance, Some(from));
        true
    }

    fn finish(&self) {
        self.bus.publish(
            WorkflowLifecycleEvent::task_finished(
                self.instance.workflow_instance_id,
                self.instance.task_code,
                self.instance.id,
                self.instance.state,
            )
            .into(),
        );
    }

    fn publish(&self, event: TaskLifecycleEvent) {
        if !self.bus.publish(event.into()) {
            debug!(task_instance_id = %self.instance.id, "bus closed, event dropped");
        }
    }
}
