//! Persisted records the master works with: commands, workflow and task
//! definitions, and their running instances.

mod command;
mod task;
mod workflow;

pub use command::{Command, CommandType, ErrorCommand, Priority};
pub use task::{TaskDefinition, TaskInstance, TaskState, TimeoutStrategy};
pub use workflow::{
    FailureStrategy, TaskRelation, WorkflowDefinition, WorkflowInstance, WorkflowState,
};
