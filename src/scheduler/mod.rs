//! Campaign scheduling infrastructure
//!
//! This module provides the timetable and dispatch machinery for recurring
//! campaign execution: calendar-correct occurrence generation, an
//! addressable in-memory job store, and a dispatch loop with a bounded
//! worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │   Schedule   │   │     Job      │   │    Dispatcher    │  │
//! │  │  Generator   │──▶│    Store     │◀──│  (control loop)  │  │
//! │  └──────────────┘   └──────────────┘   └────────┬─────────┘  │
//! │                                                 │            │
//! └─────────────────────────────────────────────────┼────────────┘
//!                                                   │ semaphore
//!                                     ┌─────────────┼─────────────┐
//!                                     ▼             ▼             ▼
//!                                ┌────────┐    ┌────────┐    ┌────────┐
//!                                │ worker │    │ worker │    │ worker │
//!                                └────────┘    └────────┘    └────────┘
//! ```
//!
//! The generator is a pure timetable function; the job store holds pending
//! work keyed by handle with replace-on-reschedule and idempotent cancel;
//! the dispatcher decides *when* without ever blocking on *how long* a
//! handler takes.
//!
//! # Modules
//!
//! - [`generator`] - Occurrence timestamp generation (calendar stepping)
//! - [`jobstore`] - Addressable pending-job store with misfire coalescing
//! - [`dispatcher`] - Bounded-concurrency dispatch loop
//! - [`error`] - Scheduler error types

pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod jobstore;

// Re-export main types
pub use dispatcher::{Dispatcher, DispatcherConfig, JobHandler};
pub use error::{SchedulerError, SchedulerResult};
pub use generator::ScheduleGenerator;
pub use jobstore::{FiredJob, Job, JobId, JobPayload, JobStore};
