//! Lifecycle events and the bus that orders them.

mod bus;
mod error;
mod event;

pub use bus::EventBus;
pub use error::{LifecycleError, LifecycleResult};
pub use event::{
    DelayedEvent, LifecycleEvent, RunningInfo, TaskEventKind, TaskEventType, TaskLifecycleEvent,
    WorkflowEventKind, WorkflowEventType, WorkflowLifecycleEvent,
};
