//! Single-process registry, used by tests and the standalone binary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::{Notify, mpsc, watch};
use tracing::debug;

use super::{
    ConnectionState, Registry, RegistryError, RegistryEvent, RegistryEventKind, RegistryResult,
    Subscription, SubscriptionId,
};

type Watchers = HashMap<SubscriptionId, (String, mpsc::UnboundedSender<RegistryEvent>)>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MemoryRegistry {
    data: Mutex<BTreeMap<String, String>>,
    watchers: Mutex<Watchers>,
    locks: Mutex<HashSet<String>>,
    lock_released: Notify,
    connection: watch::Sender<ConnectionState>,
    next_subscription: AtomicU64,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Self {
            data: Mutex::new(BTreeMap::new()),
            watchers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashSet::new()),
            lock_released: Notify::new(),
            connection,
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Drive the connection state, as a real client would on session events.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    fn ensure_connected(&self) -> RegistryResult<()> {
        match *self.connection.borrow() {
            ConnectionState::Connected | ConnectionState::Reconnected => Ok(()),
            ConnectionState::Suspended | ConnectionState::Lost => Err(RegistryError::ConnectionLost),
        }
    }

    fn emit(&self, event: &RegistryEvent) {
        let mut watchers = guard(&self.watchers);
        watchers.retain(|_, (prefix, sender)| {
            !event.key.starts_with(prefix.as_str()) || sender.send(event.clone()).is_ok()
        });
    }

    fn try_lock(&self, key: &str) -> bool {
        guard(&self.locks).insert(key.to_string())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn put(&self, key: &str, value: &str) -> RegistryResult<()> {
        self.ensure_connected()?;
        let previous = guard(&self.data).insert(key.to_string(), value.to_string());
        let kind = if previous.is_some() {
            RegistryEventKind::Update
        } else {
            RegistryEventKind::Add
        };
        self.emit(&RegistryEvent {
            key: key.to_string(),
            value: Some(value.to_string()),
            kind,
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        self.ensure_connected()?;
        Ok(guard(&self.data).get(key).cloned())
    }

    async fn delete(&self, key: &str) -> RegistryResult<bool> {
        self.ensure_connected()?;
        let removed = guard(&self.data).remove(key).is_some();
        if removed {
            self.emit(&RegistryEvent {
                key: key.to_string(),
                value: None,
                kind: RegistryEventKind::Remove,
            });
        }
        Ok(removed)
    }

    async fn children(&self, key: &str) -> RegistryResult<Vec<String>> {
        self.ensure_connected()?;
        let parent = format!("{}/", key.trim_end_matches('/'));
        Ok(guard(&self.data)
            .keys()
            .filter_map(|k| k.strip_prefix(parent.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .dedup()
            .collect())
    }

    async fn exists(&self, key: &str) -> RegistryResult<bool> {
        self.ensure_connected()?;
        Ok(guard(&self.data).contains_key(key))
    }

    async fn subscribe(&self, prefix: &str) -> RegistryResult<Subscription> {
        self.ensure_connected()?;
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (sender, events) = mpsc::unbounded_channel();
        guard(&self.watchers).insert(id, (prefix.to_string(), sender));
        debug!(prefix, "registry subscription added");
        Ok(Subscription { id, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> RegistryResult<bool> {
        Ok(guard(&self.watchers).remove(&id).is_some())
    }

    async fn acquire_lock(&self, key: &str, timeout: Option<Duration>) -> RegistryResult<bool> {
        self.ensure_connected()?;
        let attempt = async {
            loop {
                let released = self.lock_released.notified();
                if self.try_lock(key) {
                    return true;
                }
                released.await;
            }
        };
        Ok(match timeout {
            Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or(false),
            None => attempt.await,
        })
    }

    async fn release_lock(&self, key: &str) -> RegistryResult<bool> {
        let released = guard(&self.locks).remove(key);
        if released {
            self.lock_released.notify_waiters();
        }
        Ok(released)
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}
