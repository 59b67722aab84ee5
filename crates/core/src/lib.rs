//! # drover-core
//!
//! Identifiers, errors, and result types shared by every drover crate.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod ids;
pub mod result;

pub use error::Error;
pub use ids::{CommandId, TaskCode, TaskInstanceId, WorkflowCode, WorkflowInstanceId};
pub use result::Result;
