//! Weighted random selection over operator-assigned weights.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;

use super::error::{SelectorError, SelectorResult};
use super::host::WorkerHost;
use super::HostSelector;

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl RandomSelector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HostSelector for RandomSelector {
    fn select(&self, worker_group: &str, hosts: &[WorkerHost]) -> SelectorResult<WorkerHost> {
        let mut rng = rand::thread_rng();
        let weights = hosts.iter().map(|h| u32::try_from(h.weight).unwrap_or(0));

        // WeightedIndex rejects an empty or all-zero set; fall back to uniform.
        let picked = match WeightedIndex::new(weights) {
            Ok(index) => hosts.get(index.sample(&mut rng)),
            Err(_) => hosts.choose(&mut rng),
        };
        picked
            .cloned()
            .ok_or_else(|| SelectorError::no_hosts(worker_group))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
