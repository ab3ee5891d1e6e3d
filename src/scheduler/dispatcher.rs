//! Dispatch loop feeding due jobs onto a bounded worker pool
//!
//! A single cooperative control loop polls the job store for due work and
//! hands each fired job to a handler task guarded by a semaphore permit.
//! Scheduling decisions therefore never wait on a slow handler: a campaign
//! stuck in a long publish call only occupies one pool slot.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};

use super::jobstore::{FiredJob, JobPayload, JobStore};

// ============================================================================
// Handler
// ============================================================================

/// Receiver of fired jobs.
///
/// Implementations absorb their own failures: a handler must never let one
/// campaign's error propagate back into the dispatch loop.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: FiredJob);
}

// ============================================================================
// Configuration
// ============================================================================

/// Dispatcher tuning knobs
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Poll interval of the control loop
    pub tick: std::time::Duration,

    /// Worker pool size (max concurrently executing jobs)
    pub max_concurrent: usize,

    /// Lateness beyond which a fire is logged as a misfire
    pub misfire_grace: chrono::Duration,

    /// How long to wait for a free worker before re-queueing the job
    pub acquire_timeout: std::time::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_secs(1),
            max_concurrent: 10,
            misfire_grace: chrono::Duration::seconds(30),
            acquire_timeout: std::time::Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Control loop firing due jobs onto the worker pool
pub struct Dispatcher {
    store: Arc<JobStore>,
    handler: Arc<dyn JobHandler>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    is_running: Arc<RwLock<bool>>,
}

impl Dispatcher {
    /// Create a new dispatcher over a job store and handler
    pub fn new(
        store: Arc<JobStore>,
        handler: Arc<dyn JobHandler>,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            handler,
            config,
            semaphore,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the dispatch loop until [`Dispatcher::shutdown`] is called
    pub async fn run(&self) {
        *self.is_running.write().await = true;
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            tick_ms = self.config.tick.as_millis() as u64,
            "Dispatcher started"
        );

        while *self.is_running.read().await {
            self.drain_due().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick) => {}
                _ = self.wait_for_stop() => break,
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    /// Stop the dispatch loop. In-flight handler tasks are not interrupted.
    pub async fn shutdown(&self) {
        *self.is_running.write().await = false;
    }

    /// Check if the loop is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Fire everything currently due
    async fn drain_due(&self) {
        let due = self.store.list_due(Utc::now()).await;

        for job in due {
            if job.is_past_grace(self.config.misfire_grace) {
                tracing::warn!(
                    job_id = %job.id,
                    late_secs = job.lateness().num_seconds(),
                    "Job fired past misfire grace period; running coalesced"
                );
            }

            self.dispatch(job).await;
        }
    }

    /// Hand one fired job to the worker pool
    async fn dispatch(&self, job: FiredJob) {
        let acquired = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;

        match acquired {
            Ok(Ok(permit)) => {
                let handler = Arc::clone(&self.handler);
                tokio::spawn(async move {
                    handler.handle(job).await;
                    drop(permit);
                });
            }
            Ok(Err(_)) => {
                // Semaphore closed only happens during teardown
                tracing::warn!(job_id = %job.id, "Worker pool closed; job dropped");
            }
            Err(_) => self.requeue_saturated(job).await,
        }
    }

    /// Worker pool stayed saturated past the acquire timeout. One-shot
    /// jobs are pushed back into the store so the executor's retry policy
    /// sees them again; recurring jobs rely on their next interval.
    async fn requeue_saturated(&self, job: FiredJob) {
        match &job.payload {
            JobPayload::ExecuteOccurrence { .. } => {
                let retry_at = Utc::now() + chrono::Duration::from_std(self.config.tick)
                    .unwrap_or_else(|_| chrono::Duration::seconds(1));
                tracing::warn!(
                    job_id = %job.id,
                    "Worker pool saturated; re-queueing occurrence job"
                );
                self.store
                    .schedule_once(job.id, retry_at, job.payload)
                    .await;
            }
            _ => {
                tracing::warn!(
                    job_id = %job.id,
                    "Worker pool saturated; periodic job will fire on next interval"
                );
            }
        }
    }

    // Internal: wait for the stop flag
    async fn wait_for_stop(&self) {
        loop {
            if !*self.is_running.read().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
