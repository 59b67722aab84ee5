//! Worker hosts as the selectors see them, and the load-derived weight.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CPU_FACTOR: f64 = 20.0;
const MEMORY_FACTOR: f64 = 20.0;
const DISK_FACTOR: f64 = 50.0;
const THREAD_POOL_FACTOR: f64 = 10.0;
const FULL_CAPACITY: f64 = 100.0;
const MIN_UPTIME: Duration = Duration::from_millis(1);

/// Live load of a worker host. Usages are fractions in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HostMetrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub thread_pool_usage: f64,
    #[serde(default)]
    pub waiting_tasks: u32,
}

/// A candidate worker for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHost {
    /// `ip:port` the dispatcher talks to.
    pub address: String,
    pub worker_group: String,
    /// Operator-assigned weight used by the round-robin selectors.
    pub weight: i32,
    pub started_at: DateTime<Utc>,
    pub metrics: HostMetrics,
}

impl WorkerHost {
    pub const DEFAULT_WEIGHT: i32 = 100;

    #[must_use]
    pub fn new(address: impl Into<String>, worker_group: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            worker_group: worker_group.into(),
            weight: Self::DEFAULT_WEIGHT,
            started_at: Utc::now(),
            metrics: HostMetrics::default(),
        }
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub const fn with_metrics(mut self, metrics: HostMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub const fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    #[must_use]
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Ephemeral ranking record, rebuilt for every dispatch decision.
#[derive(Debug, Clone, PartialEq)]
pub struct HostWeight {
    pub address: String,
    pub weight: f64,
    pub current_weight: f64,
    pub waiting_tasks: u32,
}

impl HostWeight {
    #[must_use]
    pub fn new(address: impl Into<String>, weight: f64, waiting_tasks: u32) -> Self {
        Self {
            address: address.into(),
            weight,
            current_weight: weight,
            waiting_tasks,
        }
    }

    #[must_use]
    pub fn from_host(host: &WorkerHost, now: DateTime<Utc>, warmup: Duration) -> Self {
        let weight = Self::calculate(&host.metrics, host.uptime(now), warmup);
        Self::new(host.address.clone(), weight, host.metrics.waiting_tasks)
    }

    /// Capacity score in `0..=100`, disk pressure weighing most.
    #[must_use]
    pub fn score(metrics: &HostMetrics) -> f64 {
        let load = metrics.cpu_usage * CPU_FACTOR
            + metrics.memory_usage * MEMORY_FACTOR
            + metrics.disk_usage * DISK_FACTOR
            + metrics.thread_pool_usage * THREAD_POOL_FACTOR;
        (FULL_CAPACITY - load).max(0.0)
    }

    /// Multiplier applied while a host is still inside its warm-up window.
    #[must_use]
    pub fn warmup_factor(uptime: Duration, warmup: Duration) -> f64 {
        if uptime >= warmup {
            return 1.0;
        }
        let uptime = uptime.max(MIN_UPTIME);
        warmup.as_secs_f64() / uptime.as_secs_f64()
    }

    #[must_use]
    pub fn calculate(metrics: &HostMetrics, uptime: Duration, warmup: Duration) -> f64 {
        Self::score(metrics) * Self::warmup_factor(uptime, warmup)
    }
}
