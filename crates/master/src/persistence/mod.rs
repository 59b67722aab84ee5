//! Persistence collaborators: DAO traits and an in-memory store.

mod dao;
mod error;
mod memory;

pub use dao::{CommandDao, TaskInstanceDao, WorkflowDefinitionDao, WorkflowInstanceDao};
pub use error::{PersistenceError, PersistenceResult};
pub use memory::MemoryStore;
