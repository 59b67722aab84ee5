//! Backlog-first selection: narrow to the hosts with the smallest queue, then
//! spread work over them with the smooth weighted accumulator.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use super::error::{SelectorError, SelectorResult};
use super::host::{HostWeight, WorkerHost};
use super::HostSelector;

/// Per worker group, per host accumulated weight.
type Accumulators = HashMap<String, HashMap<String, f64>>;

#[derive(Debug)]
pub struct LowerWeightSelector {
    warmup: Duration,
    accumulators: Mutex<Accumulators>,
}

impl LowerWeightSelector {
    #[must_use]
    pub fn new(warmup: Duration) -> Self {
        Self {
            warmup,
            accumulators: Mutex::new(HashMap::new()),
        }
    }

    /// Select among precomputed weights. Returns the winning address.
    ///
    /// Hosts with no waiting tasks are preferred; when every host has a
    /// backlog only those sharing the minimum backlog compete.
    pub fn select_weighted(&self, worker_group: &str, weights: &[HostWeight]) -> Option<String> {
        let eligible = weights.iter().min_set_by_key(|w| w.waiting_tasks);
        let total: f64 = eligible.iter().map(|w| w.weight).sum();

        let mut accumulators = self
            .accumulators
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let group = accumulators.entry(worker_group.to_string()).or_default();
        group.retain(|address, _| weights.iter().any(|w| &w.address == address));

        let mut winner: Option<(&str, f64)> = None;
        for host in &eligible {
            let current = group
                .entry(host.address.clone())
                .or_insert(host.current_weight);
            *current += host.weight;
            if winner.is_none_or(|(_, best)| *current > best) {
                winner = Some((host.address.as_str(), *current));
            }
        }

        let (address, _) = winner?;
        if let Some(current) = group.get_mut(address) {
            *current -= total;
        }
        Some(address.to_string())
    }

    /// # Errors
    ///
    /// Returns [`SelectorError::NoHostsAvailable`] when `hosts` is empty.
    pub fn select_at(
        &self,
        worker_group: &str,
        hosts: &[WorkerHost],
        now: DateTime<Utc>,
    ) -> SelectorResult<WorkerHost> {
        let weights: Vec<HostWeight> = hosts
            .iter()
            .map(|h| HostWeight::from_host(h, now, self.warmup))
            .collect();

        self.select_weighted(worker_group, &weights)
            .and_then(|address| hosts.iter().find(|h| h.address == address).cloned())
            .ok_or_else(|| SelectorError::no_hosts(worker_group))
    }
}

impl HostSelector for LowerWeightSelector {
    fn select(&self, worker_group: &str, hosts: &[WorkerHost]) -> SelectorResult<WorkerHost> {
        self.select_at(worker_group, hosts, Utc::now())
    }

    fn name(&self) -> &'static str {
        "lower_weight"
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;
    use crate::selector::HostMetrics;

    fn fixture() -> Vec<HostWeight> {
        vec![
            HostWeight::new("A", 10.0, 0),
            HostWeight::new("B", 5.0, 0),
            HostWeight::new("C", 100.0, 3),
        ]
    }

    #[test]
    fn test_backlogged_host_never_selected() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let weights = fixture();

        for _ in 0..300 {
            let picked = selector.select_weighted("default", &weights);
            assert_ne!(picked.as_deref(), Some("C"));
            assert!(picked.is_some());
        }
    }

    #[test]
    fn test_selection_ratio_follows_weight() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let weights = fixture();

        let mut a = 0_u32;
        let mut b = 0_u32;
        for _ in 0..300 {
            match selector.select_weighted("default", &weights).as_deref() {
                Some("A") => a += 1,
                Some("B") => b += 1,
                other => assert!(other.is_none(), "unexpected host {other:?}"),
            }
        }
        assert_eq!(a, 200);
        assert_eq!(b, 100);
    }

    #[test]
    fn test_min_backlog_subset_used_when_all_busy() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let weights = vec![
            HostWeight::new("A", 90.0, 4),
            HostWeight::new("B", 10.0, 2),
            HostWeight::new("C", 10.0, 2),
        ];

        for _ in 0..20 {
            let picked = selector.select_weighted("default", &weights);
            assert!(matches!(picked.as_deref(), Some("B" | "C")));
        }
    }

    #[test]
    fn test_groups_keep_separate_accumulators() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let weights = vec![HostWeight::new("A", 10.0, 0), HostWeight::new("B", 10.0, 0)];

        assert_eq!(selector.select_weighted("g1", &weights).as_deref(), Some("A"));
        assert_eq!(selector.select_weighted("g2", &weights).as_deref(), Some("A"));
        assert_eq!(selector.select_weighted("g1", &weights).as_deref(), Some("B"));
    }

    #[test]
    fn test_empty_candidates_is_no_hosts_error() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let result = selector.select_at("etl", &[], Utc::now());
        assert_eq!(result, Err(SelectorError::no_hosts("etl")));
    }

    #[test]
    fn test_select_uses_live_metrics() {
        let selector = LowerWeightSelector::new(Duration::ZERO);
        let busy = WorkerHost::new("busy:1", "default").with_metrics(HostMetrics {
            waiting_tasks: 5,
            ..HostMetrics::default()
        });
        let idle = WorkerHost::new("idle:1", "default");

        let picked = selector.select("default", &[busy, idle]);
        assert_eq!(picked.map(|h| h.address), Ok("idle:1".to_string()));
    }
}
