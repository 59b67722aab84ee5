//! Periodic command consumption: fetch this master's slice of the command
//! queue, turn each command into a runnable, and hand it to the engine.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::EngineHandle;
use crate::factory::{FactoryError, FactoryResult, WorkflowExecutionRunnableFactory};
use crate::persistence::CommandDao;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub fetch_interval: Duration,
    pub fetch_size: usize,
    /// This master's position among `total_masters`.
    pub master_slot: u32,
    pub total_masters: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(1),
            fetch_size: 10,
            master_slot: 0,
            total_masters: 1,
        }
    }
}

/// Outcome of one fetch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub fetched: usize,
    pub started: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct CommandConsumer {
    commands: Arc<dyn CommandDao>,
    factory: Arc<WorkflowExecutionRunnableFactory>,
    engine: EngineHandle,
    settings: ConsumerSettings,
}

impl CommandConsumer {
    #[must_use]
    pub fn new(
        commands: Arc<dyn CommandDao>,
        factory: Arc<WorkflowExecutionRunnableFactory>,
        engine: EngineHandle,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            commands,
            factory,
            engine,
            settings,
        }
    }

    /// One round: fetch, build concurrently, submit in fetch order.
    ///
    /// # Errors
    ///
    /// Only a failed fetch is an error; per-command failures are counted in
    /// the report.
    pub async fn run_once(&self) -> FactoryResult<ConsumeReport> {
        let batch = self
            .commands
            .fetch_commands(
                self.settings.fetch_size,
                self.settings.master_slot,
                self.settings.total_masters,
            )
            .await?;
        let mut report = ConsumeReport {
            fetched: batch.len(),
            ..ConsumeReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let built = join_all(batch.into_iter().map(|command| self.factory.create(command))).await;
        for result in built {
            match result {
                Ok(runnable) => {
                    let id = runnable.id();
                    match self.engine.execute(runnable).await {
                        Ok(_) => report.started = report.started.saturating_add(1),
                        Err(e) => {
                            error!(workflow_instance_id = %id, error = %e, "engine rejected workflow");
                            report.failed = report.failed.saturating_add(1);
                        }
                    }
                }
                Err(FactoryError::DuplicateCommand(id)) => {
                    debug!(command_id = %id, "command taken by another master");
                    report.duplicates = report.duplicates.saturating_add(1);
                }
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "command not started");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        info!(
            fetched = report.fetched,
            started = report.started,
            duplicates = report.duplicates,
            failed = report.failed,
            "commands consumed"
        );
        Ok(report)
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.fetch_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            slot = self.settings.master_slot,
            total = self.settings.total_masters,
            interval_ms = u64::try_from(self.settings.fetch_interval.as_millis()).unwrap_or(u64::MAX),
            "command consumer started"
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "command fetch failed");
                    }
                }
            }
        }
        info!("command consumer stopped");
    }
}

impl std::fmt::Debug for CommandConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandConsumer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
