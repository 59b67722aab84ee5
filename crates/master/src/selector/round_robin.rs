//! Smooth weighted round-robin over operator-assigned host weights.
//!
//! State lives per (worker group, host). Counters are atomics so concurrent
//! selections only share read locks; stale hosts are pruned by whichever
//! caller wins a compare-exchange on `pruning`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::error::{SelectorError, SelectorResult};
use super::host::WorkerHost;
use super::HostSelector;

pub const DEFAULT_RECYCLE_PERIOD: Duration = Duration::from_secs(100);

#[derive(Debug, Default)]
struct WeightedRoundRobinEntry {
    weight: AtomicI64,
    current: AtomicI64,
    last_update: AtomicI64,
}

impl WeightedRoundRobinEntry {
    fn set_weight(&self, weight: i64) {
        self.weight.store(weight, Ordering::SeqCst);
        self.current.store(0, Ordering::SeqCst);
    }

    fn increase_current(&self) -> i64 {
        let weight = self.weight.load(Ordering::SeqCst);
        self.current
            .fetch_add(weight, Ordering::SeqCst)
            .saturating_add(weight)
    }

    fn selected(&self, total: i64) {
        self.current.fetch_sub(total, Ordering::SeqCst);
    }
}

type HostEntries = RwLock<HashMap<String, Arc<WeightedRoundRobinEntry>>>;

#[derive(Debug)]
pub struct RoundRobinSelector {
    groups: RwLock<HashMap<String, Arc<HostEntries>>>,
    pruning: AtomicBool,
    recycle_period: Duration,
}

impl RoundRobinSelector {
    #[must_use]
    pub fn new(recycle_period: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            pruning: AtomicBool::new(false),
            recycle_period,
        }
    }

    fn group_entries(&self, worker_group: &str) -> Arc<HostEntries> {
        let existing = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_group)
            .cloned();
        existing.unwrap_or_else(|| {
            let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(groups.entry(worker_group.to_string()).or_default())
        })
    }

    fn entry(entries: &HostEntries, address: &str, weight: i64, now_ms: i64) -> Arc<WeightedRoundRobinEntry> {
        let existing = entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned();
        existing.unwrap_or_else(|| {
            let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(address.to_string()).or_insert_with(|| {
                let entry = WeightedRoundRobinEntry::default();
                entry.set_weight(weight);
                // Born fresh, so a concurrent prune cannot recycle it.
                entry.last_update.store(now_ms, Ordering::SeqCst);
                Arc::new(entry)
            }))
        })
    }

    /// Selection with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::NoHostsAvailable`] when `hosts` is empty.
    pub fn select_at(
        &self,
        worker_group: &str,
        hosts: &[WorkerHost],
        now: DateTime<Utc>,
    ) -> SelectorResult<WorkerHost> {
        let now_ms = now.timestamp_millis();
        let entries = self.group_entries(worker_group);

        let mut total: i64 = 0;
        let mut best: Option<(&WorkerHost, Arc<WeightedRoundRobinEntry>, i64)> = None;
        for host in hosts {
            let weight = i64::from(host.weight.max(0));
            let entry = Self::entry(&entries, &host.address, weight, now_ms);
            if entry.weight.load(Ordering::SeqCst) != weight {
                entry.set_weight(weight);
            }
            let current = entry.increase_current();
            entry.last_update.store(now_ms, Ordering::SeqCst);
            total = total.saturating_add(weight);

            if best.as_ref().is_none_or(|(_, _, max)| current > *max) {
                best = Some((host, entry, current));
            }
        }

        self.prune_stale(worker_group, &entries, hosts.len(), now_ms);

        let (host, entry, _) = best.ok_or_else(|| SelectorError::no_hosts(worker_group))?;
        entry.selected(total);
        Ok(host.clone())
    }

    fn prune_stale(&self, worker_group: &str, entries: &HostEntries, candidates: usize, now_ms: i64) {
        let tracked = entries.read().unwrap_or_else(PoisonError::into_inner).len();
        if self.pruning.load(Ordering::SeqCst) || candidates == tracked {
            return;
        }
        if self
            .pruning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let recycle_ms = i64::try_from(self.recycle_period.as_millis()).unwrap_or(i64::MAX);
        let pruned = {
            let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|_, e| now_ms.saturating_sub(e.last_update.load(Ordering::SeqCst)) <= recycle_ms);
            before.saturating_sub(entries.len())
        };

        if pruned > 0 {
            debug!(worker_group, pruned, "recycled stale round-robin entries");
        }
        self.pruning.store(false, Ordering::SeqCst);
    }

    /// Hosts currently tracked for `worker_group`.
    #[must_use]
    pub fn tracked_hosts(&self, worker_group: &str) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_group)
            .map_or(0, |entries| {
                entries.read().unwrap_or_else(PoisonError::into_inner).len()
            })
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new(DEFAULT_RECYCLE_PERIOD)
    }
}

impl HostSelector for RoundRobinSelector {
    fn select(&self, worker_group: &str, hosts: &[WorkerHost]) -> SelectorResult<WorkerHost> {
        self.select_at(worker_group, hosts, Utc::now())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
