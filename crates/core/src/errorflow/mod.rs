//! Failure classification, accounting and escalation.

mod handler;
mod types;

pub use handler::ErrorFlowHandler;
pub use types::{Decision, FailureContext, FailureKind, WorkerFailure, WorkerKind};
