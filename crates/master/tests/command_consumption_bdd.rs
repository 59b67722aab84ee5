//! Behavioral tests for turning queued commands into running workflows.
//!
//! Each test follows Given/When/Then:
//! - GIVEN commands waiting in the store
//! - WHEN one or more masters consume them
//! - THEN each command produces at most one runnable

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, definition, eventually, report_running, report_success, start_command, task, within};
use drover_master::engine::{CommandConsumer, ConsumerSettings, EngineHandle};
use drover_master::factory::{FactoryError, WorkflowExecutionRunnableFactory};
use drover_master::model::WorkflowState;
use drover_master::persistence::{CommandDao, TaskInstanceDao};
use drover_master::registry::MemoryRegistry;

#[tokio::test]
async fn given_one_command_when_many_masters_consume_it_then_exactly_one_wins() {
    // GIVEN: a single queued start command
    let harness = Harness::new(definition(vec![task(1)], &[]), &["h1:1"]).await;
    let command = harness.enqueue(start_command()).await;

    // WHEN: eight independent factories race for it
    let factories: Vec<Arc<WorkflowExecutionRunnableFactory>> =
        (0..8).map(|_| Arc::new(harness.factory())).collect();
    let attempts = factories.iter().map(|factory| {
        let factory = Arc::clone(factory);
        let command = command.clone();
        tokio::spawn(async move { factory.create(command).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // THEN: one runnable was built and everyone else saw a duplicate
    let built = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_duplicate()))
        .count();
    assert_eq!(built, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(harness.store.workflow_count(), 1);
    assert_eq!(harness.store.pending_commands(), 0);
}

#[tokio::test]
async fn given_a_registry_lock_when_two_masters_consume_then_the_loser_sees_a_duplicate() {
    // GIVEN: two masters sharing one registry for the consumption lock
    let harness = Harness::new(definition(vec![task(1)], &[]), &["h1:1"]).await;
    let registry = Arc::new(MemoryRegistry::new());
    let first = harness
        .factory()
        .with_registry_lock(registry.clone(), Duration::from_millis(200));
    let second = harness
        .factory()
        .with_registry_lock(registry, Duration::from_millis(200));
    let command = harness.enqueue(start_command()).await;

    // WHEN: both consume the same command
    let (a, b) = tokio::join!(first.create(command.clone()), second.create(command.clone()));

    // THEN: one runnable exists and the command is gone
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(FactoryError::DuplicateCommand(id)) if id == command.id));
    assert_eq!(harness.store.pending_commands(), 0);
}

#[tokio::test]
async fn given_a_command_for_an_unknown_definition_when_consumed_then_it_is_parked() {
    // GIVEN: a command naming a workflow nobody defined
    let harness = Harness::new(definition(vec![task(1)], &[]), &["h1:1"]).await;
    let mut command = start_command();
    command.workflow_version = 99;
    let command = harness.enqueue(command).await;

    // WHEN: a master consumes it
    let result = harness.factory().create(command.clone()).await;

    // THEN: it is malformed, removed from the queue and kept as an error
    assert!(matches!(result, Err(FactoryError::MalformedCommand { .. })));
    assert_eq!(harness.store.pending_commands(), 0);
    let parked = harness.store.error_commands().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].command.id, command.id);
    assert_eq!(harness.store.workflow_count(), 0);
}

#[tokio::test]
async fn given_queued_commands_when_the_consumer_runs_then_the_engine_drives_them_to_success() {
    // GIVEN: an engine, a consumer and two queued start commands
    let harness = Harness::new(definition(vec![task(1)], &[]), &["h1:1", "h2:1"]).await;
    let (engine, _join) = EngineHandle::spawn(Duration::from_secs(1)).await.unwrap();
    let consumer = CommandConsumer::new(
        harness.store.clone(),
        Arc::new(harness.factory()),
        engine.clone(),
        ConsumerSettings::default(),
    );
    harness.enqueue(start_command()).await;
    harness.enqueue(start_command()).await;

    // WHEN: one consumption round runs and workers report success
    let report = consumer.run_once().await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.started, 2);
    assert!(eventually(|| harness.journal.dispatched().len() == 2).await);

    let running = engine.running().await.unwrap();
    assert_eq!(running.len(), 2);
    let mut handles = Vec::new();
    for id in running {
        handles.push(engine.workflow(id).await.unwrap().unwrap());
    }
    for task_id in harness.journal.dispatched() {
        let attempt = harness.store.load_task_instance(task_id).await.unwrap().unwrap();
        let handle = handles
            .iter()
            .find(|h| h.id() == attempt.workflow_instance_id)
            .unwrap();
        report_running(handle, task_id);
        report_success(handle, task_id);
    }

    // THEN: both workflows succeed and leave the engine
    for handle in &handles {
        assert_eq!(within(handle.wait_until_finished()).await, WorkflowState::Success);
    }
    let mut drained = false;
    for _ in 0..100 {
        let stats = engine.stats().await.unwrap();
        if stats.running == 0 && stats.succeeded == 2 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drained);
    engine.shutdown();
}
