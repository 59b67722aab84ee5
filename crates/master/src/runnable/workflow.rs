//! Workflow execution runnable.
//!
//! Owns the execution graph and the task runnables of one workflow instance,
//! and is the single consumer of that instance's event bus. Everything else
//! talks to it by publishing events through a [`WorkflowHandle`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use drover_core::{TaskCode, TaskInstanceId, WorkflowInstanceId};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::context::ExecutionContext;
use super::handle::WorkflowHandle;
use super::listener::ListenerRegistry;
use super::task::TaskExecutionRunnable;
use crate::graph::{ExecutionGraph, NodeStatus};
use crate::lifecycle::{
    EventBus, LifecycleEvent, TaskLifecycleEvent, WorkflowEventKind, WorkflowLifecycleEvent,
};
use crate::model::{
    FailureStrategy, TaskInstance, TaskState, WorkflowDefinition, WorkflowInstance, WorkflowState,
};

pub struct WorkflowExecutionRunnable {
    instance: WorkflowInstance,
    definition: Arc<WorkflowDefinition>,
    graph: ExecutionGraph,
    tasks: BTreeMap<TaskCode, TaskExecutionRunnable>,
    bus: Arc<EventBus<LifecycleEvent>>,
    listeners: Arc<ListenerRegistry>,
    state_tx: watch::Sender<WorkflowState>,
    ctx: Arc<ExecutionContext>,
    /// A node failed under fail-fast; nothing new is triggered.
    failing: bool,
}

impl WorkflowExecutionRunnable {
    /// Wrap a persisted instance. `graph` may already carry succeeded nodes
    /// when the instance is being recovered.
    #[must_use]
    pub fn new(
        instance: WorkflowInstance,
        definition: Arc<WorkflowDefinition>,
        graph: ExecutionGraph,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let (state_tx, _) = watch::channel(instance.state);
        Self {
            instance,
            definition,
            graph,
            tasks: BTreeMap::new(),
            bus: Arc::new(EventBus::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            state_tx,
            ctx,
            failing: false,
        }
    }

    #[must_use]
    pub fn handle(&self) -> WorkflowHandle {
        WorkflowHandle::new(
            self.instance.id,
            Arc::clone(&self.bus),
            Arc::clone(&self.listeners),
            self.state_tx.subscribe(),
        )
    }

    /// Queue START. Returns `false` if the bus is already closed.
    pub fn start(&self) -> bool {
        self.bus
            .publish(WorkflowLifecycleEvent::start(self.instance.id).into())
    }

    #[must_use]
    pub const fn id(&self) -> WorkflowInstanceId {
        self.instance.id
    }

    #[must_use]
    pub const fn state(&self) -> WorkflowState {
        self.instance.state
    }

    #[must_use]
    pub const fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    #[must_use]
    pub const fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    #[must_use]
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.instance.state.is_finished()
    }

    #[must_use]
    pub fn bus(&self) -> Arc<EventBus<LifecycleEvent>> {
        Arc::clone(&self.bus)
    }

    /// Consume events until the instance reaches a terminal state or the bus
    /// is closed, then hand back the final record.
    pub async fn run(mut self) -> WorkflowInstance {
        info!(
            workflow_instance_id = %self.instance.id,
            workflow_code = %self.instance.workflow_code,
            nodes = self.graph.node_count(),
            "workflow runnable started"
        );
        while let Some(event) = self.bus.consume_next().await {
            self.on_event(event).await;
            if self.is_finished() {
                break;
            }
        }
        self.bus.close();
        self.instance
    }

    /// Apply one event. Exposed for callers that drive the runnable
    /// themselves instead of through [`run`](Self::run).
    pub async fn on_event(&mut self, event: LifecycleEvent) {
        if self.is_finished() {
            debug!(
                workflow_instance_id = %self.instance.id,
                %event,
                "workflow finished, event discarded"
            );
            return;
        }
        match event {
            LifecycleEvent::Workflow(event) => {
                if event.workflow_instance_id != self.instance.id {
                    warn!(
                        workflow_instance_id = %self.instance.id,
                        addressed_to = %event.workflow_instance_id,
                        "misrouted workflow event discarded"
                    );
                    return;
                }
                self.on_workflow_event(event.kind).await;
            }
            LifecycleEvent::Task(event) => self.on_task_event(event).await,
        }
    }

    async fn on_workflow_event(&mut self, kind: WorkflowEventKind) {
        debug!(
            workflow_instance_id = %self.instance.id,
            event = %kind.event_type(),
            state = %self.instance.state,
            "workflow event"
        );
        match kind {
            WorkflowEventKind::Start => self.on_start().await,
            WorkflowEventKind::Pause => self.on_pause().await,
            WorkflowEventKind::Stop => self.on_stop().await,
            WorkflowEventKind::TaskFinished {
                task_code,
                task_instance_id,
                state,
            } => self.on_task_finished(task_code, task_instance_id, state).await,
            WorkflowEventKind::Finalize => self.on_finalize().await,
        }
    }

    async fn on_task_event(&mut self, event: TaskLifecycleEvent) {
        let may_continue = self.accepts_work();
        match self
            .tasks
            .values_mut()
            .find(|task| task.id() == event.task_instance_id)
        {
            Some(task) => task.handle_event(event.kind, may_continue).await,
            None => debug!(
                workflow_instance_id = %self.instance.id,
                task_instance_id = %event.task_instance_id,
                event = %event.event_type(),
                "event for unknown task attempt discarded"
            ),
        }
    }

    async fn on_start(&mut self) {
        if self.instance.state != WorkflowState::Submitted {
            debug!(workflow_instance_id = %self.instance.id, "duplicate start discarded");
            return;
        }
        let now = Utc::now();
        if self.instance.start_time.is_none() {
            self.instance.start_time = Some(now);
        }
        if !self.move_to(WorkflowState::Running).await {
            return;
        }
        for code in self.graph.triggerable() {
            self.trigger_task(code).await;
        }
        self.finalize_if_idle();
    }

    async fn on_pause(&mut self) {
        if self.instance.state != WorkflowState::Running {
            debug!(
                workflow_instance_id = %self.instance.id,
                state = %self.instance.state,
                "pause ignored"
            );
            return;
        }
        if !self.move_to(WorkflowState::ReadyPause).await {
            return;
        }
        for task in self.tasks.values_mut() {
            task.pause().await;
        }
        self.finalize_if_idle();
    }

    async fn on_stop(&mut self) {
        if !matches!(
            self.instance.state,
            WorkflowState::Running | WorkflowState::ReadyPause
        ) {
            debug!(
                workflow_instance_id = %self.instance.id,
                state = %self.instance.state,
                "stop ignored"
            );
            return;
        }
        if !self.move_to(WorkflowState::ReadyStop).await {
            return;
        }
        self.kill_active_tasks();
        self.finalize_if_idle();
    }

    async fn on_task_finished(&mut self, code: TaskCode, task_instance_id: TaskInstanceId, state: TaskState) {
        let current = self.tasks.get(&code).map(TaskExecutionRunnable::id);
        if self.graph.status(code) != Some(NodeStatus::Active) || current != Some(task_instance_id) {
            debug!(
                workflow_instance_id = %self.instance.id,
                task_code = %code,
                task_instance_id = %task_instance_id,
                "stale task completion discarded"
            );
            return;
        }

        let status = NodeStatus::from_task_state(state);
        if let Err(e) = self.graph.mark(code, status) {
            warn!(workflow_instance_id = %self.instance.id, error = %e, "could not mark node");
            return;
        }
        info!(
            workflow_instance_id = %self.instance.id,
            task_code = %code,
            task_state = %state,
            "task finished"
        );

        let running = self.instance.state == WorkflowState::Running;
        match status {
            NodeStatus::Succeeded if self.accepts_work() => {
                for next in self.graph.ready_successors(code) {
                    self.trigger_task(next).await;
                }
            }
            NodeStatus::Failed | NodeStatus::Killed if running => self.on_node_failed(),
            _ => {}
        }
        self.finalize_if_idle();
    }

    async fn on_finalize(&mut self) {
        if self.graph.active_count() > 0 {
            debug!(
                workflow_instance_id = %self.instance.id,
                active = self.graph.active_count(),
                "tasks still in flight, finalize deferred"
            );
            return;
        }
        let target = match self.instance.state {
            WorkflowState::ReadyPause => WorkflowState::Pause,
            WorkflowState::ReadyStop => WorkflowState::Stop,
            WorkflowState::Running if !self.failing && !self.graph.triggerable().is_empty() => {
                debug!(workflow_instance_id = %self.instance.id, "nodes still triggerable, finalize deferred");
                return;
            }
            WorkflowState::Running if self.graph.all_succeeded() => WorkflowState::Success,
            WorkflowState::Running => WorkflowState::Failure,
            other => {
                debug!(workflow_instance_id = %self.instance.id, state = %other, "finalize ignored");
                return;
            }
        };

        self.instance.end_time = Some(Utc::now());
        if self.move_to(target).await {
            self.bus.close();
        }
    }

    async fn trigger_task(&mut self, code: TaskCode) {
        let definition = Arc::clone(&self.definition);
        let Some(task_definition) = definition.task(code) else {
            warn!(workflow_instance_id = %self.instance.id, task_code = %code, "node has no task definition");
            self.fail_node(code);
            return;
        };

        let mut attempt = TaskInstance::first_attempt(
            task_definition,
            &self.instance,
            &self.ctx.settings.default_worker_group,
            Utc::now(),
        );
        match self.ctx.task_dao.insert_task_instance(attempt.clone()).await {
            Ok(id) => {
                attempt.id = id;
                if let Err(e) = self.graph.mark(code, NodeStatus::Active) {
                    warn!(workflow_instance_id = %self.instance.id, error = %e, "could not mark node");
                    return;
                }
                debug!(
                    workflow_instance_id = %self.instance.id,
                    task_code = %code,
                    task_instance_id = %id,
                    "task triggered"
                );
                self.listeners.task_state_changed(&attempt, None);
                let runnable = TaskExecutionRunnable::new(
                    attempt,
                    Arc::clone(&self.bus),
                    Arc::clone(&self.listeners),
                    Arc::clone(&self.ctx),
                );
                self.tasks.insert(code, runnable);
                self.bus.publish(TaskLifecycleEvent::dispatch(id).into());
            }
            Err(e) => {
                error!(
                    workflow_instance_id = %self.instance.id,
                    task_code = %code,
                    error = %e,
                    "could not persist task instance"
                );
                self.fail_node(code);
            }
        }
    }

    fn fail_node(&mut self, code: TaskCode) {
        if let Err(e) = self.graph.mark(code, NodeStatus::Failed) {
            warn!(workflow_instance_id = %self.instance.id, error = %e, "could not mark node");
        }
        self.on_node_failed();
    }

    fn on_node_failed(&mut self) {
        if self.instance.failure_strategy == FailureStrategy::End && !self.failing {
            info!(workflow_instance_id = %self.instance.id, "node failed, killing remaining tasks");
            self.failing = true;
            self.kill_active_tasks();
        }
    }

    /// Pending retries are dropped in place so that no queued RETRY can
    /// mint a fresh attempt the KILL would no longer match.
    fn kill_active_tasks(&mut self) {
        for task in self.tasks.values_mut().filter(|t| t.is_active()) {
            if task.is_awaiting_retry() {
                task.cancel_retry();
            } else {
                self.bus.publish(TaskLifecycleEvent::kill(task.id()).into());
            }
        }
    }

    const fn accepts_work(&self) -> bool {
        matches!(self.instance.state, WorkflowState::Running) && !self.failing
    }

    fn finalize_if_idle(&self) {
        if self.graph.active_count() > 0 {
            return;
        }
        let idle = self.instance.state != WorkflowState::Running
            || self.failing
            || self.graph.triggerable().is_empty();
        if idle {
            self.bus
                .publish(WorkflowLifecycleEvent::finalize(self.instance.id).into());
        }
    }

    async fn move_to(&mut self, next: WorkflowState) -> bool {
        let from = self.instance.state;
        if !from.can_transition_to(next) {
            debug!(
                workflow_instance_id = %self.instance.id,
                from = %from,
                to = %next,
                "illegal workflow transition discarded"
            );
            return false;
        }
        self.instance.state = next;
        info!(
            workflow_instance_id = %self.instance.id,
            from = %from,
            to = %next,
            "workflow state changed"
        );
        if let Err(e) = self.ctx.workflow_dao.save_workflow_instance(&self.instance).await {
            error!(workflow_instance_id = %self.instance.id, error = %e, "could not persist workflow state");
        }
        self.listeners.workflow_state_changed(&self.instance, from);
        self.state_tx.send_replace(next);
        true
    }
}

impl std::fmt::Debug for WorkflowExecutionRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionRunnable")
            .field("id", &self.instance.id)
            .field("state", &self.instance.state)
            .field("tasks", &self.tasks.len())
            .field("failing", &self.failing)
            .finish_non_exhaustive()
    }
}
