//! Distributed registry collaborator: key-value store, prefix watches,
//! mutual-exclusion locks, and connection state.

mod error;
mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

pub use error::{RegistryError, RegistryResult};
pub use memory::MemoryRegistry;

/// Prefix under which workers publish heartbeats: `{prefix}/{group}/{address}`.
pub const WORKER_NODE_PREFIX: &str = "/nodes/worker";

/// Lock key guarding consumption of one command.
#[must_use]
pub fn command_lock_key(command_id: impl fmt::Display) -> String {
    format!("/lock/commands/{command_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryEventKind {
    Add,
    Update,
    Remove,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub key: String,
    /// New value; `None` for removals.
    pub value: Option<String>,
    pub kind: RegistryEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Reconnected,
    Suspended,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

/// A live watch on a key prefix.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<RegistryEvent>,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Create or overwrite `key`.
    async fn put(&self, key: &str, value: &str) -> RegistryResult<()>;

    async fn get(&self, key: &str) -> RegistryResult<Option<String>>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> RegistryResult<bool>;

    /// Direct child names of `key`.
    async fn children(&self, key: &str) -> RegistryResult<Vec<String>>;

    async fn exists(&self, key: &str) -> RegistryResult<bool>;

    /// Watch every key under `prefix`.
    async fn subscribe(&self, prefix: &str) -> RegistryResult<Subscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> RegistryResult<bool>;

    /// Try to take the lock on `key`, waiting up to `timeout` (forever when
    /// `None`). Returns whether the lock is now held.
    async fn acquire_lock(&self, key: &str, timeout: Option<Duration>) -> RegistryResult<bool>;

    /// Returns whether a held lock was released.
    async fn release_lock(&self, key: &str) -> RegistryResult<bool>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
