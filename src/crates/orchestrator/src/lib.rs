//! Session controller: accepts a submitted computation graph over a
//! WebSocket, validates and runs it on the scheduler, and streams execution
//! events back as wire frames.

pub mod api;
pub mod config;
pub mod proto;
pub mod session;

use thiserror::Error;

/// Errors surfaced at the session-controller boundary, distinct from the
/// engine-internal error types each lower crate defines.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid graph submission: {0}")]
    InvalidGraph(String),
    #[error("scheduler failed: {0}")]
    SchedulerFailed(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidGraph(_) => "invalid-graph",
            OrchestratorError::SchedulerFailed(_) => "scheduler-failed",
            OrchestratorError::Config(_) => "config-error",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
