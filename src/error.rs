//! Unified error handling for the cadence crate
//!
//! Each subsystem keeps its own error type; this module folds them into a
//! single [`Error`] enum for use across module boundaries, together with a
//! coarse [`ErrorCategory`] that mirrors how failures are handled: surfaced
//! to the caller, retried, or absorbed as a no-op.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::executor::ExecutorError;
pub use crate::optimizer::OptimizerError;
pub use crate::publish::{MetricsUnavailableError, PublishError};
pub use crate::scheduler::SchedulerError;

/// Result alias using the unified error type
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Schedule validation errors, surfaced synchronously to the caller
    Scheduling,
    /// Publish/metrics collaborator failures, retried by the executor
    Execution,
    /// Optimizer failures, absorbed as a rebalance no-op
    Optimization,
    /// Persistence failures
    Storage,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the cadence crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduling and dispatch errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Campaign execution errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Publish collaborator errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Metrics collaborator errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsUnavailableError),

    /// Budget optimizer errors
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(_) => ErrorCategory::Scheduling,
            Self::Executor(_) | Self::Publish(_) | Self::Metrics(_) => ErrorCategory::Execution,
            Self::Optimizer(_) => ErrorCategory::Optimization,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Execution | ErrorCategory::Storage
        ) || matches!(self, Self::Scheduler(e) if e.is_recoverable())
    }
}
