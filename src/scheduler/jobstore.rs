//! Addressable in-memory job store
//!
//! Pending jobs are held keyed by id. Scheduling under an existing id
//! replaces the previous entry (the semantics used when a campaign's
//! frequency or start time changes), and cancellation is an idempotent
//! no-op for absent ids. The store only decides *what* is due; firing is
//! the dispatcher's job.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identifier of a stored job (the occurrence job handle)
pub type JobId = String;

// ============================================================================
// Payloads and triggers
// ============================================================================

/// What a job does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    /// Run one execution attempt for a due occurrence
    ExecuteOccurrence {
        campaign_id: Uuid,
        occurrence_id: Uuid,
    },

    /// Collect a metric sample for every active campaign
    CollectMetrics,

    /// Run a periodic budget rebalance
    Rebalance,

    /// Delete old terminal occurrences
    CleanupOccurrences,
}

impl JobPayload {
    /// Campaign this payload belongs to, if any
    pub fn campaign_id(&self) -> Option<Uuid> {
        match self {
            JobPayload::ExecuteOccurrence { campaign_id, .. } => Some(*campaign_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum JobTrigger {
    /// Fire once at a fixed time, then forget
    Once { run_at: DateTime<Utc> },

    /// Fire every `interval`, starting one interval after registration
    Recurring {
        interval: Duration,
        next_fire: DateTime<Utc>,
    },
}

/// A registered pending job
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
    trigger: JobTrigger,
}

impl Job {
    /// When this job will next fire
    pub fn next_fire(&self) -> DateTime<Utc> {
        match &self.trigger {
            JobTrigger::Once { run_at } => *run_at,
            JobTrigger::Recurring { next_fire, .. } => *next_fire,
        }
    }
}

/// A job handed out by [`JobStore::list_due`]
#[derive(Debug, Clone)]
pub struct FiredJob {
    pub id: JobId,
    pub payload: JobPayload,
    /// Time the job was supposed to run
    pub scheduled_for: DateTime<Utc>,
    /// Time it was actually picked up
    pub fired_at: DateTime<Utc>,
}

impl FiredJob {
    /// How far behind schedule this fire is
    pub fn lateness(&self) -> Duration {
        self.fired_at - self.scheduled_for
    }

    /// Whether the fire exceeded the misfire grace period
    pub fn is_past_grace(&self, grace: Duration) -> bool {
        self.lateness() > grace
    }
}

// ============================================================================
// Job Store
// ============================================================================

/// Thread-safe store of pending jobs
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    /// Create an empty job store
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a one-shot job. Replaces any existing job under the id.
    pub async fn schedule_once(
        &self,
        id: impl Into<JobId>,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) {
        let id = id.into();
        let job = Job {
            id: id.clone(),
            payload,
            created_at: Utc::now(),
            trigger: JobTrigger::Once { run_at },
        };

        let replaced = self.jobs.write().await.insert(id.clone(), job).is_some();
        if replaced {
            tracing::debug!(job_id = %id, run_at = %run_at, "Replaced existing job");
        } else {
            tracing::debug!(job_id = %id, run_at = %run_at, "Scheduled one-shot job");
        }
    }

    /// Register a recurring job firing every `interval`, first fire one
    /// interval from now. Replaces any existing job under the id.
    pub async fn schedule_recurring(
        &self,
        id: impl Into<JobId>,
        interval: Duration,
        payload: JobPayload,
    ) {
        let id = id.into();
        let next_fire = Utc::now() + interval;
        let job = Job {
            id: id.clone(),
            payload,
            created_at: Utc::now(),
            trigger: JobTrigger::Recurring {
                interval,
                next_fire,
            },
        };

        let replaced = self.jobs.write().await.insert(id.clone(), job).is_some();
        if replaced {
            tracing::debug!(job_id = %id, interval = %interval, "Replaced existing recurring job");
        } else {
            tracing::debug!(job_id = %id, interval = %interval, "Scheduled recurring job");
        }
    }

    /// Remove a job. Returns false for absent ids; never errors, so
    /// cancelling twice (or cancelling a handle that already fired) is a
    /// safe no-op.
    pub async fn cancel(&self, id: &str) -> bool {
        let removed = self.jobs.write().await.remove(id).is_some();
        if removed {
            tracing::debug!(job_id = %id, "Cancelled job");
        }
        removed
    }

    /// Check whether a job is currently registered
    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// Number of registered jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the store holds no jobs
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Earliest upcoming fire time across all jobs
    pub async fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.jobs.read().await.values().map(Job::next_fire).min()
    }

    /// Collect all jobs due at `now`.
    ///
    /// One-shot jobs are removed from the store. Recurring jobs fire once
    /// per call regardless of how many intervals were missed (coalescing)
    /// and re-arm strictly in the future.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Vec<FiredJob> {
        let mut jobs = self.jobs.write().await;
        let mut fired = Vec::new();
        let mut finished = Vec::new();

        for (id, job) in jobs.iter_mut() {
            match &mut job.trigger {
                JobTrigger::Once { run_at } => {
                    if *run_at <= now {
                        fired.push(FiredJob {
                            id: id.clone(),
                            payload: job.payload.clone(),
                            scheduled_for: *run_at,
                            fired_at: now,
                        });
                        finished.push(id.clone());
                    }
                }
                JobTrigger::Recurring {
                    interval,
                    next_fire,
                } => {
                    if *next_fire <= now {
                        let scheduled_for = *next_fire;
                        // Coalesce missed intervals into a single fire
                        while *next_fire <= now {
                            *next_fire = *next_fire + *interval;
                        }
                        fired.push(FiredJob {
                            id: id.clone(),
                            payload: job.payload.clone(),
                            scheduled_for,
                            fired_at: now,
                        });
                    }
                }
            }
        }

        for id in finished {
            jobs.remove(&id);
        }

        // Oldest first, so overdue work drains in schedule order
        fired.sort_by_key(|job| job.scheduled_for);
        fired
    }

    /// Drop all jobs (used on shutdown)
    pub async fn clear(&self) {
        self.jobs.write().await.clear();
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
