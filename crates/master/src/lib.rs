//! # drover-master
//!
//! Master-side execution engine: turns persisted commands into running
//! workflow instances, drives their lifecycle state machines over
//! per-instance event buses, and picks worker hosts for tasks.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub use drover_core::{Error, Result};

/// Worker view fed from registry heartbeats
pub mod cluster;

/// Master configuration
pub mod config;

/// Channel to worker processes
pub mod dispatch;

/// Engine actor and command consumer
pub mod engine;

/// Command-to-runnable factory
pub mod factory;

/// Execution graph of a workflow instance
pub mod graph;

/// Lifecycle events and the per-instance event bus
pub mod lifecycle;

/// Commands, definitions, and instances
pub mod model;

/// Data access traits and the in-memory store
pub mod persistence;

/// Coordination registry
pub mod registry;

/// Workflow and task state machines
pub mod runnable;

/// Host selection
pub mod selector;
