//! # Execution runnables
//!
//! State machines for one workflow instance and its task attempts. A
//! [`WorkflowExecutionRunnable`] is the only consumer of its instance's
//! [`EventBus`](crate::lifecycle::EventBus); callers interact through a
//! cloneable [`WorkflowHandle`].

mod context;
mod handle;
mod listener;
mod task;
mod workflow;

pub use context::{ExecutionContext, ExecutionSettings, calculate_backoff};
pub use handle::WorkflowHandle;
pub use listener::{ListenerRegistry, WorkflowLifecycleListener};
pub use task::TaskExecutionRunnable;
pub use workflow::WorkflowExecutionRunnable;
