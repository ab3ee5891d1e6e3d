//! cadence - Recurring campaign scheduler with budget orchestration
//!
//! A scheduling and budget-orchestration core for recurring marketing
//! campaigns: calendar-correct occurrence timetables, bounded-concurrency
//! job dispatch with retry and cancellation semantics, and a constrained
//! numerical optimizer that keeps a shared budget pool allocated toward
//! observed performance without thrashing.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and status enums
//! - [`scheduler`] - Occurrence generation, job store, dispatch loop
//! - [`executor`] - Campaign execution state machine
//! - [`metrics`] - Performance scoring over metric windows
//! - [`optimizer`] - Constrained budget reallocation and rebalance gating
//! - [`campaign`] - Lifecycle operations and schedule reconciliation
//! - [`orchestrator`] - Runtime wiring with start/shutdown lifecycle
//! - [`publish`] - Publish/metrics collaborator boundary and mocks
//! - [`storage`] - SQLite persistence
//!
//! # Example
//!
//! ```no_run
//! use cadence::config::Config;
//! use cadence::orchestrator::Orchestrator;
//! use cadence::publish::{MockMetricsProvider, MockPublisher};
//! use cadence::storage::Database;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Arc::new(Database::open(&config.database.path)?);
//!
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         db,
//!         Arc::new(MockPublisher::new()),
//!         Arc::new(MockMetricsProvider::new()),
//!     );
//!     orchestrator.start().await?;
//!     // ... run until shutdown signal ...
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod campaign;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod publish;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::campaign::{CampaignService, ReconcileReport};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{
        Campaign, CampaignSpec, CampaignStatus, Channel, Frequency, MetricSample, Occurrence,
        OccurrenceStatus,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::scheduler::{JobStore, ScheduleGenerator};
    pub use crate::storage::Database;
}

// Direct re-exports for convenience
pub use models::{Campaign, CampaignStatus, Channel, Frequency, Occurrence, OccurrenceStatus};
