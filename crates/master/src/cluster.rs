//! Live view of the worker fleet, grouped by worker group.
//!
//! Workers publish JSON heartbeats at `/nodes/worker/{group}/{address}`. The
//! view applies registry events to keep candidates and their metrics
//! current, and serves them to the selectors.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{RegistryEvent, RegistryEventKind, Subscription, WORKER_NODE_PREFIX};
use crate::selector::{HostMetrics, WorkerHost};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("registry key '{0}' is not a worker node key")]
    NotAWorkerKey(String),

    #[error("malformed heartbeat for {key}: {reason}")]
    MalformedHeartbeat { key: String, reason: String },
}

/// Source of candidate hosts for a worker group.
pub trait WorkerMetricsSource: Send + Sync {
    fn candidates(&self, worker_group: &str) -> Vec<WorkerHost>;
}

/// Heartbeat payload a worker writes into the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    #[serde(flatten)]
    pub metrics: HostMetrics,
    /// Process start time, epoch milliseconds.
    pub started_at_ms: i64,
    #[serde(default = "default_host_weight")]
    pub host_weight: i32,
}

const fn default_host_weight() -> i32 {
    WorkerHost::DEFAULT_WEIGHT
}

impl WorkerHeartbeat {
    #[must_use]
    pub fn from_host(host: &WorkerHost) -> Self {
        Self {
            metrics: host.metrics,
            started_at_ms: host.started_at.timestamp_millis(),
            host_weight: host.weight,
        }
    }

    fn started_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.started_at_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Registry key of a worker's heartbeat.
#[must_use]
pub fn worker_node_key(worker_group: &str, address: &str) -> String {
    format!("{WORKER_NODE_PREFIX}/{worker_group}/{address}")
}

fn parse_worker_key(key: &str) -> Result<(&str, &str), ClusterError> {
    key.strip_prefix(WORKER_NODE_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.split_once('/'))
        .filter(|(group, address)| !group.is_empty() && !address.is_empty())
        .ok_or_else(|| ClusterError::NotAWorkerKey(key.to_string()))
}

type Groups = HashMap<String, BTreeMap<String, WorkerHost>>;

#[derive(Debug, Default)]
pub struct WorkerClusterView {
    groups: RwLock<Groups>,
}

impl WorkerClusterView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, host: WorkerHost) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .entry(host.worker_group.clone())
            .or_default()
            .insert(host.address.clone(), host);
    }

    /// Returns whether the host was known.
    pub fn remove(&self, worker_group: &str, address: &str) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups
            .get_mut(worker_group)
            .and_then(|hosts| hosts.remove(address))
            .is_some()
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Apply one registry change under the worker prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] for foreign keys or unparsable heartbeats;
    /// the view is left unchanged.
    pub fn apply(&self, event: &RegistryEvent) -> Result<(), ClusterError> {
        let (group, address) = parse_worker_key(&event.key)?;
        match (event.kind, event.value.as_deref()) {
            (RegistryEventKind::Remove, _) | (_, None) => {
                if self.remove(group, address) {
                    info!(worker_group = group, host = address, "worker left");
                }
            }
            (RegistryEventKind::Add | RegistryEventKind::Update, Some(raw)) => {
                let heartbeat: WorkerHeartbeat =
                    serde_json::from_str(raw).map_err(|e| ClusterError::MalformedHeartbeat {
                        key: event.key.clone(),
                        reason: e.to_string(),
                    })?;
                if event.kind == RegistryEventKind::Add {
                    info!(worker_group = group, host = address, "worker joined");
                }
                self.upsert(WorkerHost {
                    address: address.to_string(),
                    worker_group: group.to_string(),
                    weight: heartbeat.host_weight,
                    started_at: heartbeat.started_at(),
                    metrics: heartbeat.metrics,
                });
            }
        }
        Ok(())
    }

    /// Keep the view in sync with a registry subscription until it ends.
    #[must_use]
    pub fn follow(self: Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = subscription.events.recv().await {
                if let Err(e) = self.apply(&event) {
                    warn!(error = %e, "ignoring worker registry event");
                }
            }
            debug!("worker registry subscription closed");
        })
    }
}

impl WorkerMetricsSource for WorkerClusterView {
    fn candidates(&self, worker_group: &str) -> Vec<WorkerHost> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_group)
            .map(|hosts| hosts.values().cloned().collect())
            .unwrap_or_default()
    }
}
