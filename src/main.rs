//! # drover
//!
//! Command-line front end for the master engine.
//!
//! `check-config` validates a configuration file. `run` wires a complete
//! master in-process (memory store, memory registry, engine actor, command
//! consumer) with simulated workers taken from the configuration, submits
//! `--runs` start commands for a definition, and prints how each instance
//! ended.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod simulation;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use drover_core::{TaskCode, WorkflowInstanceId};
use drover_master::cluster::WorkerClusterView;
use drover_master::config::MasterConfig;
use drover_master::engine::{CommandConsumer, EngineHandle};
use drover_master::factory::WorkflowExecutionRunnableFactory;
use drover_master::model::{Command, CommandType, WorkflowDefinition};
use drover_master::persistence::{CommandDao, MemoryStore, WorkflowDefinitionDao, WorkflowInstanceDao};
use drover_master::registry::MemoryRegistry;
use drover_master::runnable::ExecutionContext;
use drover_master::selector::create_selector;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use simulation::SimulatedWorkers;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Commands::CheckConfig { config } => check_config(&config),
        Commands::Run {
            config,
            definition,
            runs,
            task_ms,
            fail_tasks,
            dry_run,
        } => {
            let options = RunOptions {
                config,
                definition,
                runs,
                task_duration: Duration::from_millis(task_ms),
                fail_tasks: fail_tasks.into_iter().map(TaskCode::new).collect(),
                dry_run,
            };
            run(options).await
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn check_config(path: &Path) -> Result<()> {
    let config = MasterConfig::load(path)
        .with_context(|| format!("Configuration {} is invalid", path.display()))?;
    println!(
        "{}: ok (selector {}, slot {}/{}, {} static workers)",
        path.display(),
        config.host_selector,
        config.master_slot,
        config.total_masters,
        config.workers.len()
    );
    Ok(())
}

struct RunOptions {
    config: PathBuf,
    definition: PathBuf,
    runs: u32,
    task_duration: Duration,
    fail_tasks: Vec<TaskCode>,
    dry_run: bool,
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition {}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|e| drover_core::Error::json_parse_failed(e.to_string()))
        .with_context(|| format!("Definition {} is not valid JSON", path.display()))
}

async fn run(options: RunOptions) -> Result<()> {
    let started = Instant::now();
    let config = MasterConfig::load(&options.config)
        .with_context(|| format!("Configuration {} is invalid", options.config.display()))?;
    let definition = load_definition(&options.definition)?;
    let (code, version) = (definition.code, definition.version);

    let store = Arc::new(MemoryStore::new());
    store
        .insert_definition(definition)
        .await
        .context("Failed to store definition")?;

    let workers = Arc::new(WorkerClusterView::new());
    for worker in &config.workers {
        workers.upsert(worker.to_host());
    }
    if config.workers.is_empty() && !options.dry_run {
        warn!("no [[workers]] configured; tasks will wait for a host forever");
    }

    let (engine, _engine_join) = EngineHandle::spawn(config.rpc_timeout())
        .await
        .context("Failed to start engine")?;
    let dispatcher = Arc::new(SimulatedWorkers::new(
        engine.clone(),
        options.task_duration,
        options.fail_tasks.iter().copied(),
    ));
    let ctx = ExecutionContext::new(
        store.clone(),
        store.clone(),
        dispatcher,
        workers,
        create_selector(config.host_selector, config.selector_settings()),
    )
    .with_settings(config.execution_settings());
    let factory = WorkflowExecutionRunnableFactory::new(store.clone(), store.clone(), Arc::new(ctx))
        .with_registry_lock(Arc::new(MemoryRegistry::new()), config.command_lock_timeout());

    for _ in 0..options.runs {
        let command = Command::new(CommandType::StartWorkflow, code, version).with_dry_run(options.dry_run);
        store.insert_command(command).await.context("Failed to enqueue command")?;
    }
    info!(runs = options.runs, workflow_code = %code, "commands enqueued");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = CommandConsumer::new(
        store.clone(),
        Arc::new(factory),
        engine.clone(),
        config.consumer_settings(),
    );
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx));

    tokio::select! {
        result = wait_for_completion(&store, &engine, options.runs, config.consumer_settings().fetch_interval) => {
            result?;
        }
        () = wait_for_interrupt() => {
            for id in engine.running().await.unwrap_or_default() {
                if let Err(e) = engine.stop(id).await {
                    warn!(workflow_instance_id = %id, error = %e, "stop failed");
                }
            }
            wait_for_completion(&store, &engine, options.runs, Duration::from_millis(50)).await?;
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        error!(error = %e, "command consumer task failed");
    }
    engine.shutdown();

    print_summary(&store, options.runs).await?;
    info!(elapsed = ?started.elapsed(), "drover run finished");
    Ok(())
}

/// Wait until every command has been consumed and nothing is running.
async fn wait_for_completion(store: &MemoryStore, engine: &EngineHandle, runs: u32, poll: Duration) -> Result<()> {
    let expected = u64::from(runs);
    loop {
        tokio::time::sleep(poll).await;
        let stats = engine.stats().await.context("Engine stopped answering")?;
        let rejected = store.error_commands().await.context("Failed to read error commands")?.len();
        let settled = stats.started.saturating_add(u64::try_from(rejected).unwrap_or(u64::MAX));
        if store.pending_commands() == 0 && settled >= expected && stats.running == 0 {
            return Ok(());
        }
    }
}

async fn wait_for_interrupt() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping running workflows"),
        Err(err) => {
            error!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

async fn print_summary(store: &MemoryStore, runs: u32) -> Result<()> {
    println!("{:<6} {:<40} {:<10} {:>10}", "ID", "NAME", "STATE", "MILLIS");
    for raw in 1..=i64::from(runs) {
        let id = WorkflowInstanceId::new(raw);
        let Some(instance) = store
            .load_workflow_instance(id)
            .await
            .context("Failed to load workflow instance")?
        else {
            continue;
        };
        let millis = match (instance.start_time, instance.end_time) {
            (Some(start), Some(end)) => end.signed_duration_since(start).num_milliseconds().to_string(),
            _ => "-".to_string(),
        };
        println!(
            "{:<6} {:<40} {:<10} {:>10}",
            instance.id.to_string(),
            instance.name,
            instance.state.to_string(),
            millis
        );
    }
    for parked in store.error_commands().await.context("Failed to read error commands")? {
        println!("command {} rejected: {}", parked.command.id, parked.message);
    }
    Ok(())
}
