//! Worker host selection.
//!
//! - `LowerWeightSelector`: least backlog first, then load-derived weight
//! - `RoundRobinSelector`: smooth weighted round-robin on configured weights
//! - `RandomSelector`: weighted random on configured weights
//!
//! Selectors are shared by every running workflow, so they are `Send + Sync`
//! and keep their bookkeeping behind atomics or short locks.

mod error;
mod host;
mod lower_weight;
mod random;
mod round_robin;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{SelectorError, SelectorResult};
pub use host::{HostMetrics, HostWeight, WorkerHost};
pub use lower_weight::LowerWeightSelector;
pub use random::RandomSelector;
pub use round_robin::{DEFAULT_RECYCLE_PERIOD, RoundRobinSelector};

/// Picks one host out of a worker group's candidates.
pub trait HostSelector: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns [`SelectorError::NoHostsAvailable`] when nothing can be
    /// picked.
    fn select(&self, worker_group: &str, hosts: &[WorkerHost]) -> SelectorResult<WorkerHost>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    #[default]
    LowerWeight,
    RoundRobin,
    Random,
}

impl SelectorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowerWeight => "lower_weight",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorKind {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lower_weight" => Ok(Self::LowerWeight),
            "round_robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(SelectorError::UnknownSelector(other.to_string())),
        }
    }
}

/// Tuning shared by the selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSettings {
    pub warmup: Duration,
    pub recycle_period: Duration,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(600),
            recycle_period: DEFAULT_RECYCLE_PERIOD,
        }
    }
}

/// Build a shared selector of the given kind.
#[must_use]
pub fn create_selector(kind: SelectorKind, settings: SelectorSettings) -> Arc<dyn HostSelector> {
    match kind {
        SelectorKind::LowerWeight => Arc::new(LowerWeightSelector::new(settings.warmup)),
        SelectorKind::RoundRobin => Arc::new(RoundRobinSelector::new(settings.recycle_period)),
        SelectorKind::Random => Arc::new(RandomSelector::new()),
    }
}

/// Names accepted by [`SelectorKind::from_str`].
#[must_use]
pub const fn available_selectors() -> &'static [&'static str] {
    &["lower_weight", "round_robin", "random"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_selector_by_kind() {
        for name in available_selectors() {
            let kind = name.parse::<SelectorKind>();
            assert!(kind.is_ok(), "{name} should parse");
            if let Ok(kind) = kind {
                let selector = create_selector(kind, SelectorSettings::default());
                assert_eq!(selector.name(), *name);
            }
        }
    }

    #[test]
    fn test_unknown_selector_rejected() {
        assert_eq!(
            "fastest".parse::<SelectorKind>(),
            Err(SelectorError::UnknownSelector("fastest".into()))
        );
    }
}
