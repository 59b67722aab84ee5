//! # Workflow engine
//!
//! A `ractor` actor that owns the registry of workflow instances running on
//! this master. Each accepted runnable is started on its own tokio task; the
//! actor only tracks handles, routes pause/stop/worker reports to them, and
//! forgets an instance once its runnable returns.
//!
//! [`EngineHandle`] wraps every query in an RPC with a timeout.

mod consumer;
mod error;

use std::time::Duration;

use drover_core::WorkflowInstanceId;
use im::HashMap;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub use consumer::{CommandConsumer, ConsumeReport, ConsumerSettings};
pub use error::{EngineError, EngineResult};

use crate::lifecycle::TaskLifecycleEvent;
use crate::model::WorkflowState;
use crate::runnable::{WorkflowExecutionRunnable, WorkflowHandle};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters since the engine started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub running: usize,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub paused: u64,
    pub stopped: u64,
    /// Runnables refused because their instance was already tracked. Each
    /// one left a persisted instance nobody drives.
    pub rejected: u64,
}

#[derive(Debug)]
pub enum EngineMessage {
    /// Start a runnable and track it.
    Execute {
        runnable: Box<WorkflowExecutionRunnable>,
        reply: RpcReplyPort<EngineResult<WorkflowHandle>>,
    },

    /// Sent by the task driving a runnable once it returns.
    WorkflowFinished {
        workflow_instance_id: WorkflowInstanceId,
        state: WorkflowState,
    },

    Pause {
        workflow_instance_id: WorkflowInstanceId,
        reply: RpcReplyPort<EngineResult<()>>,
    },

    Stop {
        workflow_instance_id: WorkflowInstanceId,
        reply: RpcReplyPort<EngineResult<()>>,
    },

    /// Forward a worker report to the owning instance.
    ReportTaskEvent {
        workflow_instance_id: WorkflowInstanceId,
        event: TaskLifecycleEvent,
        reply: RpcReplyPort<EngineResult<()>>,
    },

    GetWorkflow {
        workflow_instance_id: WorkflowInstanceId,
        reply: RpcReplyPort<Option<WorkflowHandle>>,
    },

    ListRunning {
        reply: RpcReplyPort<Vec<WorkflowInstanceId>>,
    },

    GetStats {
        reply: RpcReplyPort<EngineStats>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineActor;

#[derive(Debug, Default)]
pub struct EngineState {
    running: HashMap<WorkflowInstanceId, WorkflowHandle>,
    stats: EngineStats,
}

impl Actor for EngineActor {
    type Msg = EngineMessage;
    type State = EngineState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("engine actor starting");
        Ok(EngineState::default())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::Execute { runnable, reply } => {
                let result = Self::handle_execute(&myself, state, *runnable);
                // Caller may have timed out.
                let _ = reply.send(result);
            }
            EngineMessage::WorkflowFinished {
                workflow_instance_id,
                state: final_state,
            } => Self::handle_finished(state, workflow_instance_id, final_state),
            EngineMessage::Pause {
                workflow_instance_id,
                reply,
            } => {
                let result = Self::lookup(state, workflow_instance_id)
                    .and_then(|handle| handle.pause().map_err(EngineError::from));
                let _ = reply.send(result);
            }
            EngineMessage::Stop {
                workflow_instance_id,
                reply,
            } => {
                let result = Self::lookup(state, workflow_instance_id)
                    .and_then(|handle| handle.stop().map_err(EngineError::from));
                let _ = reply.send(result);
            }
            EngineMessage::ReportTaskEvent {
                workflow_instance_id,
                event,
                reply,
            } => {
                let result = Self::lookup(state, workflow_instance_id)
                    .and_then(|handle| handle.report(event).map_err(EngineError::from));
                let _ = reply.send(result);
            }
            EngineMessage::GetWorkflow {
                workflow_instance_id,
                reply,
            } => {
                let _ = reply.send(state.running.get(&workflow_instance_id).cloned());
            }
            EngineMessage::ListRunning { reply } => {
                let mut ids: Vec<_> = state.running.keys().copied().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            EngineMessage::GetStats { reply } => {
                let stats = EngineStats {
                    running: state.running.len(),
                    ..state.stats
                };
                let _ = reply.send(stats);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(running = state.running.len(), "engine actor stopping");
        Ok(())
    }
}

impl EngineActor {
    fn handle_execute(
        myself: &ActorRef<EngineMessage>,
        state: &mut EngineState,
        runnable: WorkflowExecutionRunnable,
    ) -> EngineResult<WorkflowHandle> {
        let id = runnable.id();
        if state.running.contains_key(&id) {
            state.stats.rejected = state.stats.rejected.saturating_add(1);
            error!(
                workflow_instance_id = %id,
                workflow_state = %runnable.state(),
                "workflow already running, duplicate runnable dropped; \
                 issue RECOVER_TOLERANCE_FAULT once the running copy finishes"
            );
            return Err(EngineError::AlreadyRunning(id));
        }

        let handle = runnable.handle();
        runnable.start();
        let notify = myself.clone();
        tokio::spawn(async move {
            let instance = runnable.run().await;
            if notify
                .send_message(EngineMessage::WorkflowFinished {
                    workflow_instance_id: instance.id,
                    state: instance.state,
                })
                .is_err()
            {
                debug!(workflow_instance_id = %instance.id, "engine gone before workflow finished");
            }
        });

        state.running.insert(id, handle.clone());
        state.stats.started = state.stats.started.saturating_add(1);
        info!(workflow_instance_id = %id, running = state.running.len(), "workflow started");
        Ok(handle)
    }

    fn handle_finished(state: &mut EngineState, id: WorkflowInstanceId, final_state: WorkflowState) {
        if state.running.remove(&id).is_none() {
            debug!(workflow_instance_id = %id, "finish for untracked workflow");
            return;
        }
        let counter = match final_state {
            WorkflowState::Success => &mut state.stats.succeeded,
            WorkflowState::Pause => &mut state.stats.paused,
            WorkflowState::Stop => &mut state.stats.stopped,
            _ => &mut state.stats.failed,
        };
        *counter = counter.saturating_add(1);
        info!(
            workflow_instance_id = %id,
            state = %final_state,
            running = state.running.len(),
            "workflow left the engine"
        );
    }

    fn lookup(state: &EngineState, id: WorkflowInstanceId) -> EngineResult<&WorkflowHandle> {
        state.running.get(&id).ok_or(EngineError::WorkflowNotFound(id))
    }
}

/// Cloneable client for the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    actor: ActorRef<EngineMessage>,
    rpc_timeout: Duration,
}

impl EngineHandle {
    /// Spawn an engine actor.
    ///
    /// # Errors
    ///
    /// [`EngineError::SpawnFailed`] if ractor refuses to start the actor.
    pub async fn spawn(rpc_timeout: Duration) -> EngineResult<(Self, JoinHandle<()>)> {
        let (actor, join) = Actor::spawn(None, EngineActor, ())
            .await
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;
        Ok((Self { actor, rpc_timeout }, join))
    }

    /// Start `runnable` and return its handle.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyRunning`] if an instance with the same id is
    /// tracked, or an RPC failure.
    pub async fn execute(&self, runnable: WorkflowExecutionRunnable) -> EngineResult<WorkflowHandle> {
        let runnable = Box::new(runnable);
        self.call(|reply| EngineMessage::Execute { runnable, reply })
            .await?
    }

    /// # Errors
    ///
    /// [`EngineError::WorkflowNotFound`] for untracked ids, or an RPC failure.
    pub async fn pause(&self, workflow_instance_id: WorkflowInstanceId) -> EngineResult<()> {
        self.call(|reply| EngineMessage::Pause {
            workflow_instance_id,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// [`EngineError::WorkflowNotFound`] for untracked ids, or an RPC failure.
    pub async fn stop(&self, workflow_instance_id: WorkflowInstanceId) -> EngineResult<()> {
        self.call(|reply| EngineMessage::Stop {
            workflow_instance_id,
            reply,
        })
        .await?
    }

    /// Deliver a worker report to the instance that owns the task.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkflowNotFound`] for untracked ids, or an RPC failure.
    pub async fn report(
        &self,
        workflow_instance_id: WorkflowInstanceId,
        event: TaskLifecycleEvent,
    ) -> EngineResult<()> {
        self.call(|reply| EngineMessage::ReportTaskEvent {
            workflow_instance_id,
            event,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// RPC failure only.
    pub async fn workflow(&self, workflow_instance_id: WorkflowInstanceId) -> EngineResult<Option<WorkflowHandle>> {
        self.call(|reply| EngineMessage::GetWorkflow {
            workflow_instance_id,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// RPC failure only.
    pub async fn running(&self) -> EngineResult<Vec<WorkflowInstanceId>> {
        self.call(|reply| EngineMessage::ListRunning { reply }).await
    }

    /// # Errors
    ///
    /// RPC failure only.
    pub async fn stats(&self) -> EngineResult<EngineStats> {
        self.call(|reply| EngineMessage::GetStats { reply }).await
    }

    /// Stop the actor. Running workflows keep going but are no longer
    /// reachable through the engine.
    pub fn shutdown(&self) {
        self.actor.stop(None);
    }

    async fn call<T: Send + 'static>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> EngineMessage,
    ) -> EngineResult<T> {
        match self.actor.call(build, Some(self.rpc_timeout)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(EngineError::RpcTimeout(self.rpc_timeout)),
            Ok(CallResult::SenderError) | Err(_) => Err(EngineError::ActorUnavailable),
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("actor", &self.actor.get_id())
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}
