//! Behavioral tests for where tasks land, observed through dispatches of a
//! real workflow rather than by calling selectors directly.
//!
//! Each test follows Given/When/Then:
//! - GIVEN a worker cluster and a selector kind
//! - WHEN independent tasks are dispatched
//! - THEN the hosts they land on follow the selector's policy

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod common;

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use common::{Harness, definition, eventually, start_command, task};
use drover_master::model::TaskState;
use drover_master::persistence::TaskInstanceDao;
use drover_master::selector::{HostMetrics, SelectorKind, WorkerHost};

fn independent_tasks(count: i64) -> drover_master::model::WorkflowDefinition {
    definition((1..=count).map(task).collect(), &[])
}

/// Host each dispatched attempt was sent to, counted per address.
async fn placements(harness: &Harness) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in harness.journal.dispatched() {
        let attempt = harness.store.load_task_instance(id).await.unwrap().unwrap();
        *counts.entry(attempt.host.unwrap()).or_insert(0) += 1;
    }
    counts
}

fn warmed(address: &str) -> WorkerHost {
    WorkerHost::new(address, "default").with_started_at(Utc::now() - TimeDelta::hours(1))
}

#[tokio::test]
async fn given_weighted_hosts_when_six_tasks_dispatch_under_round_robin_then_load_follows_weights() {
    // GIVEN: three hosts weighted 3, 2 and 1
    let hosts = vec![
        warmed("a:1").with_weight(3),
        warmed("b:1").with_weight(2),
        warmed("c:1").with_weight(1),
    ];
    let harness = Harness::with_hosts(independent_tasks(6), hosts, SelectorKind::RoundRobin).await;

    // WHEN: six independent tasks are dispatched
    let _started = harness.start(start_command()).await;
    assert!(eventually(|| harness.journal.dispatched().len() == 6).await);

    // THEN: one full cycle lands exactly in proportion to the weights
    let counts = placements(&harness).await;
    assert_eq!(counts.get("a:1"), Some(&3));
    assert_eq!(counts.get("b:1"), Some(&2));
    assert_eq!(counts.get("c:1"), Some(&1));
}

#[tokio::test]
async fn given_a_backlogged_host_when_tasks_dispatch_under_lower_weight_then_it_is_skipped() {
    // GIVEN: two idle hosts and a much stronger host with queued work
    let backlogged = warmed("c:1").with_metrics(HostMetrics {
        waiting_tasks: 3,
        ..HostMetrics::default()
    });
    let busy_cpu = warmed("a:1").with_metrics(HostMetrics {
        cpu_usage: 0.5,
        ..HostMetrics::default()
    });
    let hosts = vec![busy_cpu, warmed("b:1"), backlogged];
    let harness = Harness::with_hosts(independent_tasks(6), hosts, SelectorKind::LowerWeight).await;

    // WHEN: six independent tasks are dispatched
    let _started = harness.start(start_command()).await;
    assert!(eventually(|| harness.journal.dispatched().len() == 6).await);

    // THEN: only the idle hosts receive work, and both of them do
    let counts = placements(&harness).await;
    assert_eq!(counts.get("c:1"), None);
    assert!(counts.get("a:1").copied().unwrap_or(0) >= 2);
    assert!(counts.get("b:1").copied().unwrap_or(0) >= 2);
}

#[tokio::test]
async fn given_a_host_halfway_through_warmup_when_tasks_dispatch_then_it_gets_double_share() {
    // GIVEN: two equally loaded hosts, one started five minutes ago
    let load = HostMetrics {
        disk_usage: 1.0,
        ..HostMetrics::default()
    };
    let warming = WorkerHost::new("fresh:1", "default")
        .with_metrics(load)
        .with_started_at(Utc::now() - TimeDelta::minutes(5));
    let hosts = vec![warming, warmed("old:1").with_metrics(load)];
    let harness = Harness::with_hosts(independent_tasks(3), hosts, SelectorKind::LowerWeight).await;

    // WHEN: three independent tasks are dispatched
    let _started = harness.start(start_command()).await;
    assert!(eventually(|| harness.journal.dispatched().len() == 3).await);

    // THEN: the warming host weighs twice as much and takes two of three
    let counts = placements(&harness).await;
    assert_eq!(counts.get("fresh:1"), Some(&2));
    assert_eq!(counts.get("old:1"), Some(&1));
}

#[tokio::test]
async fn given_an_empty_worker_group_when_a_host_joins_then_the_postponed_task_dispatches() {
    // GIVEN: a task bound to a worker group with no hosts yet
    let harness = Harness::with_hosts(
        definition(vec![task(1).with_worker_group("gpu")], &[]),
        vec![warmed("cpu:1")],
        SelectorKind::LowerWeight,
    )
    .await;
    let started = harness.start(start_command()).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(harness.journal.dispatched().is_empty());

    // WHEN: a host registers in that group
    harness
        .view
        .upsert(WorkerHost::new("gpu:1", "gpu").with_started_at(Utc::now() - TimeDelta::hours(1)));

    // THEN: the backed-off dispatch finds it
    assert!(eventually(|| harness.journal.dispatched().len() == 1).await);
    let id = harness.journal.dispatched()[0];
    let attempt = harness.store.load_task_instance(id).await.unwrap().unwrap();
    assert_eq!(attempt.host.as_deref(), Some("gpu:1"));
    assert_eq!(attempt.state, TaskState::Dispatched);
    assert!(!started.handle.is_finished());
}
