//! Master configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use drover_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::engine::ConsumerSettings;
use crate::runnable::ExecutionSettings;
use crate::selector::{SelectorKind, SelectorSettings, WorkerHost};

/// A worker known up front instead of through registry heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticWorker {
    pub address: String,
    #[serde(default = "default_worker_group")]
    pub worker_group: String,
    #[serde(default = "default_worker_weight")]
    pub weight: i32,
}

impl StaticWorker {
    #[must_use]
    pub fn to_host(&self) -> WorkerHost {
        WorkerHost::new(self.address.clone(), self.worker_group.clone()).with_weight(self.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_fetch_interval_ms")]
    pub command_fetch_interval_ms: u64,

    #[serde(default = "default_fetch_size")]
    pub command_fetch_size: usize,

    #[serde(default)]
    pub master_slot: u32,

    #[serde(default = "default_total_masters")]
    pub total_masters: u32,

    #[serde(default)]
    pub host_selector: SelectorKind,

    /// Time a freshly started worker needs to reach full weight.
    #[serde(default = "default_warmup_secs")]
    pub worker_warmup_secs: u64,

    /// Round-robin entries not selected for this long are dropped.
    #[serde(default = "default_recycle_secs")]
    pub round_robin_recycle_secs: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub dispatch_backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub dispatch_backoff_max_ms: u64,

    #[serde(default = "default_worker_group")]
    pub default_worker_group: String,

    #[serde(default = "default_lock_timeout_ms")]
    pub command_lock_timeout_ms: u64,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default)]
    pub workers: Vec<StaticWorker>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            command_fetch_interval_ms: default_fetch_interval_ms(),
            command_fetch_size: default_fetch_size(),
            master_slot: 0,
            total_masters: default_total_masters(),
            host_selector: SelectorKind::default(),
            worker_warmup_secs: default_warmup_secs(),
            round_robin_recycle_secs: default_recycle_secs(),
            dispatch_backoff_base_ms: default_backoff_base_ms(),
            dispatch_backoff_max_ms: default_backoff_max_ms(),
            default_worker_group: default_worker_group(),
            command_lock_timeout_ms: default_lock_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            workers: Vec::new(),
        }
    }
}

impl MasterConfig {
    /// Parse and validate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] or [`Error::InvalidConfig`].
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigReadFailed`] if the file cannot be read, and
    /// the errors of [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&input)
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.command_fetch_interval_ms == 0 {
            return Err(Error::invalid_config("command_fetch_interval_ms must be greater than 0"));
        }
        if self.command_fetch_size == 0 {
            return Err(Error::invalid_config("command_fetch_size must be greater than 0"));
        }
        if self.total_masters == 0 {
            return Err(Error::invalid_config("total_masters must be greater than 0"));
        }
        if self.master_slot >= self.total_masters {
            return Err(Error::invalid_config(format!(
                "master_slot {} must be below total_masters {}",
                self.master_slot, self.total_masters
            )));
        }
        if self.dispatch_backoff_base_ms == 0 {
            return Err(Error::invalid_config("dispatch_backoff_base_ms must be greater than 0"));
        }
        if self.dispatch_backoff_max_ms < self.dispatch_backoff_base_ms {
            return Err(Error::invalid_config(
                "dispatch_backoff_max_ms must not be below dispatch_backoff_base_ms",
            ));
        }
        if self.default_worker_group.trim().is_empty() {
            return Err(Error::invalid_config("default_worker_group must not be empty"));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(Error::invalid_config("rpc_timeout_ms must be greater than 0"));
        }
        if let Some(worker) = self.workers.iter().find(|w| w.address.trim().is_empty()) {
            return Err(Error::invalid_config(format!(
                "worker in group '{}' has an empty address",
                worker.worker_group
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn selector_settings(&self) -> SelectorSettings {
        SelectorSettings {
            warmup: Duration::from_secs(self.worker_warmup_secs),
            recycle_period: Duration::from_secs(self.round_robin_recycle_secs),
        }
    }

    #[must_use]
    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            dispatch_backoff_base_ms: self.dispatch_backoff_base_ms,
            dispatch_backoff_max_ms: self.dispatch_backoff_max_ms,
            default_worker_group: self.default_worker_group.clone(),
        }
    }

    #[must_use]
    pub const fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            fetch_interval: Duration::from_millis(self.command_fetch_interval_ms),
            fetch_size: self.command_fetch_size,
            master_slot: self.master_slot,
            total_masters: self.total_masters,
        }
    }

    #[must_use]
    pub const fn command_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.command_lock_timeout_ms)
    }

    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

const fn default_fetch_interval_ms() -> u64 {
    1_000
}

const fn default_fetch_size() -> usize {
    10
}

const fn default_total_masters() -> u32 {
    1
}

const fn default_warmup_secs() -> u64 {
    600
}

const fn default_recycle_secs() -> u64 {
    100
}

const fn default_backoff_base_ms() -> u64 {
    100
}

const fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_worker_group() -> String {
    "default".to_string()
}

const fn default_worker_weight() -> i32 {
    WorkerHost::DEFAULT_WEIGHT
}

const fn default_lock_timeout_ms() -> u64 {
    3_000
}

const fn default_rpc_timeout_ms() -> u64 {
    5_000
}
