//! Observers of a workflow instance's state transitions.
//!
//! Registration is append-only for the lifetime of the instance, so
//! notification can work on a cheap snapshot.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{TaskInstance, TaskState, WorkflowInstance, WorkflowState};

/// Hooks for alerting, metrics, and similar side channels. Called on the
/// instance's consumer task; implementations must not block.
pub trait WorkflowLifecycleListener: Send + Sync {
    fn on_workflow_state_changed(&self, _instance: &WorkflowInstance, _from: WorkflowState) {}

    /// `from` is `None` when a new attempt was just submitted.
    fn on_task_state_changed(&self, _task: &TaskInstance, _from: Option<TaskState>) {}

    fn on_task_timeout(&self, _task: &TaskInstance) {}
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn WorkflowLifecycleListener>>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn WorkflowLifecycleListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn WorkflowLifecycleListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn workflow_state_changed(&self, instance: &WorkflowInstance, from: WorkflowState) {
        for listener in self.snapshot() {
            listener.on_workflow_state_changed(instance, from);
        }
    }

    pub(crate) fn task_state_changed(&self, task: &TaskInstance, from: Option<TaskState>) {
        for listener in self.snapshot() {
            listener.on_task_state_changed(task, from);
        }
    }

    pub(crate) fn task_timed_out(&self, task: &TaskInstance) {
        for listener in self.snapshot() {
            listener.on_task_timeout(task);
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
