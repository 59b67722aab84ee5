//! In-process stand-ins for worker hosts.
//!
//! A dispatched task is acknowledged right away, runs for a fixed time, and
//! then reports success (or failure for the configured task codes) back
//! through the engine, the same path a real worker report takes.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drover_core::{TaskCode, TaskInstanceId};
use drover_master::dispatch::{DispatchError, WorkerDispatcher};
use drover_master::engine::EngineHandle;
use drover_master::lifecycle::{RunningInfo, TaskLifecycleEvent};
use drover_master::model::TaskInstance;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SimulatedWorkers {
    engine: EngineHandle,
    task_duration: Duration,
    failing: HashSet<TaskCode>,
}

impl SimulatedWorkers {
    pub fn new(engine: EngineHandle, task_duration: Duration, failing: impl IntoIterator<Item = TaskCode>) -> Self {
        Self {
            engine,
            task_duration,
            failing: failing.into_iter().collect(),
        }
    }
}

#[async_trait]
impl WorkerDispatcher for SimulatedWorkers {
    async fn dispatch(&self, host: &str, task: &TaskInstance) -> Result<(), DispatchError> {
        let engine = self.engine.clone();
        let duration = self.task_duration;
        let fails = self.failing.contains(&task.task_code);
        let host = host.to_string();
        let workflow_instance_id = task.workflow_instance_id;
        let id = task.id;

        tokio::spawn(async move {
            let running = TaskLifecycleEvent::running(
                id,
                RunningInfo::new(host.clone(), Utc::now()).with_log_path(format!("/tmp/drover/{id}.log")),
            );
            if let Err(e) = engine.report(workflow_instance_id, running).await {
                warn!(task_instance_id = %id, error = %e, "running report rejected");
                return;
            }
            tokio::time::sleep(duration).await;
            let outcome = if fails {
                TaskLifecycleEvent::fail(id, format!("simulated failure on {host}"))
            } else {
                TaskLifecycleEvent::success(id, Utc::now())
            };
            if let Err(e) = engine.report(workflow_instance_id, outcome).await {
                debug!(task_instance_id = %id, error = %e, "completion report rejected");
            }
        });
        Ok(())
    }

    async fn kill(&self, host: &str, task_instance_id: TaskInstanceId) -> Result<(), DispatchError> {
        debug!(host, task_instance_id = %task_instance_id, "simulated kill");
        Ok(())
    }
}
