//! Cloneable front door to a running workflow instance.

use std::sync::Arc;

use drover_core::WorkflowInstanceId;
use tokio::sync::watch;

use super::listener::{ListenerRegistry, WorkflowLifecycleListener};
use crate::lifecycle::{
    EventBus, LifecycleError, LifecycleEvent, LifecycleResult, TaskLifecycleEvent,
    WorkflowLifecycleEvent,
};
use crate::model::WorkflowState;

/// Publishes commands and worker reports onto the instance's bus and
/// observes its state. Pause and stop return as soon as the event is queued.
#[derive(Clone)]
pub struct WorkflowHandle {
    id: WorkflowInstanceId,
    bus: Arc<EventBus<LifecycleEvent>>,
    listeners: Arc<ListenerRegistry>,
    state: watch::Receiver<WorkflowState>,
}

impl WorkflowHandle {
    pub(crate) const fn new(
        id: WorkflowInstanceId,
        bus: Arc<EventBus<LifecycleEvent>>,
        listeners: Arc<ListenerRegistry>,
        state: watch::Receiver<WorkflowState>,
    ) -> Self {
        Self {
            id,
            bus,
            listeners,
            state,
        }
    }

    #[must_use]
    pub const fn id(&self) -> WorkflowInstanceId {
        self.id
    }

    /// Last state published by the runnable.
    #[must_use]
    pub fn state(&self) -> WorkflowState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// # Errors
    ///
    /// [`LifecycleError::BusClosed`] once the instance has finished.
    pub fn pause(&self) -> LifecycleResult<()> {
        self.publish(WorkflowLifecycleEvent::pause(self.id).into())
    }

    /// # Errors
    ///
    /// [`LifecycleError::BusClosed`] once the instance has finished.
    pub fn stop(&self) -> LifecycleResult<()> {
        self.publish(WorkflowLifecycleEvent::stop(self.id).into())
    }

    /// Forward a worker report (RUNNING, SUCCESS, FAIL, KILL).
    ///
    /// # Errors
    ///
    /// [`LifecycleError::BusClosed`] once the instance has finished.
    pub fn report(&self, event: TaskLifecycleEvent) -> LifecycleResult<()> {
        self.publish(event.into())
    }

    pub fn register_listener(&self, listener: Arc<dyn WorkflowLifecycleListener>) {
        self.listeners.register(listener);
    }

    /// Resolve with the terminal state. If the runnable is dropped first, the
    /// last observed state is returned.
    pub async fn wait_until_finished(&self) -> WorkflowState {
        let mut rx = self.state.clone();
        if let Ok(state) = rx.wait_for(|state| state.is_finished()).await {
            return *state;
        }
        let last = *rx.borrow();
        last
    }

    fn publish(&self, event: LifecycleEvent) -> LifecycleResult<()> {
        if self.bus.publish(event) {
            Ok(())
        } else {
            Err(LifecycleError::bus_closed(self.id))
        }
    }
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
