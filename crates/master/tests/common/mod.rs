//! Shared harness for the behavioral suites.
//!
//! Every observable side effect (dispatches, kills, state changes) lands in
//! one ordered [`Journal`] so tests can assert on causality, not just counts.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    dead_code
)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drover_core::{TaskCode, TaskInstanceId, WorkflowCode};
use drover_master::cluster::WorkerClusterView;
use drover_master::dispatch::{DispatchError, WorkerDispatcher};
use drover_master::factory::WorkflowExecutionRunnableFactory;
use drover_master::lifecycle::{RunningInfo, TaskLifecycleEvent};
use drover_master::model::{
    Command, CommandType, TaskDefinition, TaskInstance, TaskState, WorkflowDefinition,
    WorkflowInstance, WorkflowState,
};
use drover_master::persistence::{CommandDao, MemoryStore, WorkflowDefinitionDao};
use drover_master::runnable::{
    ExecutionContext, ExecutionSettings, WorkflowHandle, WorkflowLifecycleListener,
};
use drover_master::selector::{SelectorKind, SelectorSettings, WorkerHost, create_selector};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub const CODE: WorkflowCode = WorkflowCode::new(900);
pub const HOST: &str = "10.0.0.1:1234";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Dispatched(TaskInstanceId),
    Killed(TaskInstanceId),
    Task(TaskInstanceId, TaskState),
    Workflow(WorkflowState),
    Timeout(TaskInstanceId),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn push(&self, entry: Entry) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub fn dispatched(&self) -> Vec<TaskInstanceId> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Dispatched(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn killed(&self) -> Vec<TaskInstanceId> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Killed(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, entry: &Entry) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &Entry) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Debug)]
pub struct RecordingDispatcher {
    journal: Journal,
}

#[async_trait]
impl WorkerDispatcher for RecordingDispatcher {
    async fn dispatch(&self, _host: &str, task: &TaskInstance) -> Result<(), DispatchError> {
        self.journal.push(Entry::Dispatched(task.id));
        Ok(())
    }

    async fn kill(&self, _host: &str, task_instance_id: TaskInstanceId) -> Result<(), DispatchError> {
        self.journal.push(Entry::Killed(task_instance_id));
        Ok(())
    }
}

#[derive(Debug)]
pub struct RecordingListener {
    journal: Journal,
}

impl WorkflowLifecycleListener for RecordingListener {
    fn on_workflow_state_changed(&self, instance: &WorkflowInstance, _from: WorkflowState) {
        self.journal.push(Entry::Workflow(instance.state));
    }

    fn on_task_state_changed(&self, task: &TaskInstance, _from: Option<TaskState>) {
        self.journal.push(Entry::Task(task.id, task.state));
    }

    fn on_task_timeout(&self, task: &TaskInstance) {
        self.journal.push(Entry::Timeout(task.id));
    }
}

/// A workflow started through the factory and running on its own task.
pub struct Started {
    pub handle: WorkflowHandle,
    pub join: JoinHandle<WorkflowInstance>,
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub view: Arc<WorkerClusterView>,
    pub ctx: Arc<ExecutionContext>,
    pub journal: Journal,
}

impl Harness {
    /// Round-robin harness over equally weighted hosts in the default group.
    pub async fn new(definition: WorkflowDefinition, hosts: &[&str]) -> Self {
        let hosts = hosts.iter().map(|h| WorkerHost::new(*h, "default")).collect();
        Self::with_hosts(definition, hosts, SelectorKind::RoundRobin).await
    }

    pub async fn with_hosts(definition: WorkflowDefinition, hosts: Vec<WorkerHost>, selector: SelectorKind) -> Self {
        init_logging();
        let store = Arc::new(MemoryStore::new());
        store.insert_definition(definition).await.unwrap();

        let journal = Journal::default();
        let view = Arc::new(WorkerClusterView::new());
        for host in hosts {
            view.upsert(host);
        }
        let ctx = ExecutionContext::new(
            store.clone(),
            store.clone(),
            Arc::new(RecordingDispatcher {
                journal: journal.clone(),
            }),
            view.clone(),
            create_selector(selector, SelectorSettings::default()),
        )
        .with_settings(ExecutionSettings {
            dispatch_backoff_base_ms: 10,
            dispatch_backoff_max_ms: 50,
            ..ExecutionSettings::default()
        });
        Self {
            store,
            view,
            ctx: Arc::new(ctx),
            journal,
        }
    }

    pub fn factory(&self) -> WorkflowExecutionRunnableFactory {
        WorkflowExecutionRunnableFactory::new(self.store.clone(), self.store.clone(), Arc::clone(&self.ctx))
    }

    pub async fn enqueue(&self, command: Command) -> Command {
        let id = self.store.insert_command(command.clone()).await.unwrap();
        Command { id, ..command }
    }

    /// Consume `command` and run the resulting runnable in the background.
    pub async fn start(&self, command: Command) -> Started {
        let command = self.enqueue(command).await;
        let runnable = self.factory().create(command).await.unwrap();
        let handle = runnable.handle();
        handle.register_listener(Arc::new(RecordingListener {
            journal: self.journal.clone(),
        }));
        assert!(runnable.start());
        let join = tokio::spawn(runnable.run());
        Started { handle, join }
    }
}

/// Route engine logs through the test writer; `RUST_LOG=debug` to see them.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn start_command() -> Command {
    Command::new(CommandType::StartWorkflow, CODE, 1)
}

pub fn task(code: i64) -> TaskDefinition {
    TaskDefinition::new(TaskCode::new(code), format!("task-{code}"), "SHELL")
}

pub fn definition(tasks: Vec<TaskDefinition>, relations: &[(i64, i64)]) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new(CODE, 1, "behavior");
    for t in tasks {
        def = def.with_task(t);
    }
    for &(pre, post) in relations {
        def = def.with_relation(TaskCode::new(pre), TaskCode::new(post));
    }
    def
}

pub fn report_running(handle: &WorkflowHandle, id: TaskInstanceId) {
    handle
        .report(TaskLifecycleEvent::running(id, RunningInfo::new(HOST, Utc::now())))
        .unwrap();
}

pub fn report_success(handle: &WorkflowHandle, id: TaskInstanceId) {
    handle.report(TaskLifecycleEvent::success(id, Utc::now())).unwrap();
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait for a workflow future with a generous ceiling.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for workflow")
}
