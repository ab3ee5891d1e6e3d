//! Campaign execution state machine
//!
//! Runs one execution attempt for a due occurrence: build content, publish
//! it, collect a metric sample, advance the occurrence state. Failures are
//! retried a bounded number of times with a fixed delay, then the
//! occurrence is marked permanently failed. One campaign's failure never
//! touches another campaign's schedule.
//!
//! State transitions:
//!
//! ```text
//! pending ──▶ executing ──▶ completed
//!    │            │
//!    │            └──▶ rescheduled ──▶ executing ──▶ ... ──▶ failed
//!    │                               (bounded retries)
//!    └──────▶ cancelled (explicit cancel or campaign pause)
//! ```

pub mod content;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::models::{Campaign, Channel, MetricSample, Occurrence, OccurrenceStatus};
use crate::publish::{MetricsProvider, MetricsUnavailableError, PublishError, Publisher, RawMetrics};
use crate::scheduler::{JobPayload, JobStore};
use crate::storage::Database;

// ============================================================================
// Errors
// ============================================================================

/// Failure of a single execution attempt
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("metrics unavailable: {0}")]
    Metrics(#[from] MetricsUnavailableError),
}

// ============================================================================
// Reach counter
// ============================================================================

/// Process-wide accumulated reach, for reporting only.
///
/// Not authoritative state: the figure can always be recomputed from the
/// stored metric samples, so losing it on restart is acceptable.
pub struct ReachCounter {
    total: std::sync::Mutex<f64>,
}

impl ReachCounter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self {
            total: std::sync::Mutex::new(0.0),
        }
    }

    /// Accumulate the reach of one sample. Returns the amount added.
    pub fn record(&self, channel: Channel, sample: &MetricSample) -> f64 {
        let reach = reach_of(channel, sample);
        *self.total.lock().unwrap() += reach;
        reach
    }

    /// Current accumulated total
    pub fn total(&self) -> f64 {
        *self.total.lock().unwrap()
    }

    /// Reset to zero
    pub fn reset(&self) {
        *self.total.lock().unwrap() = 0.0;
    }
}

impl Default for ReachCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-weighted composite reach of one sample.
///
/// Impressions scaled by the engagement/conversion multipliers each
/// channel's audience behavior warrants.
pub fn reach_of(channel: Channel, sample: &MetricSample) -> f64 {
    let impressions = sample.impressions as f64;
    match channel {
        Channel::Facebook => {
            impressions * sample.engagement_rate * (1.0 + sample.conversion_rate * 10.0)
        }
        Channel::Email => {
            impressions * sample.engagement_rate * (1.0 + sample.conversion_rate * 15.0)
        }
        Channel::Search => impressions * sample.ctr() * (1.0 + sample.conversion_rate * 20.0),
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executes due occurrences against the publish collaborators
pub struct CampaignExecutor {
    db: Arc<Database>,
    jobs: Arc<JobStore>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<dyn MetricsProvider>,
    config: ExecutorConfig,
    reach: Arc<ReachCounter>,
}

impl CampaignExecutor {
    /// Create an executor
    pub fn new(
        db: Arc<Database>,
        jobs: Arc<JobStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<dyn MetricsProvider>,
        config: ExecutorConfig,
        reach: Arc<ReachCounter>,
    ) -> Self {
        Self {
            db,
            jobs,
            publisher,
            metrics,
            config,
            reach,
        }
    }

    /// Run one execution attempt for a due occurrence.
    ///
    /// Consistency problems (campaign or occurrence deleted between
    /// scheduling and firing, campaign no longer active) drop the job with
    /// a log line and are not failures. Only storage errors propagate.
    pub async fn execute_occurrence(
        &self,
        campaign_id: Uuid,
        occurrence_id: Uuid,
    ) -> Result<()> {
        let Some(campaign) = self.db.get_campaign(campaign_id)? else {
            tracing::warn!(
                %campaign_id,
                %occurrence_id,
                "Job fired for a campaign that no longer exists; dropping"
            );
            return Ok(());
        };

        let Some(occurrence) = self.db.get_occurrence(occurrence_id)? else {
            tracing::warn!(
                %campaign_id,
                %occurrence_id,
                "Job fired for an occurrence that no longer exists; dropping"
            );
            return Ok(());
        };

        if occurrence.status.is_terminal() {
            tracing::debug!(
                %occurrence_id,
                status = %occurrence.status,
                "Occurrence already terminal; dropping fire"
            );
            return Ok(());
        }

        if !campaign.is_active() {
            tracing::info!(
                %campaign_id,
                %occurrence_id,
                status = %campaign.status,
                "Campaign not active; occurrence dropped"
            );
            self.db
                .set_occurrence_status(occurrence_id, OccurrenceStatus::Cancelled)?;
            return Ok(());
        }

        // Atomic claim: enforces at most one executing occurrence per
        // campaign. Losing the claim means another occurrence is mid-flight;
        // push this fire back instead of racing it.
        if !self.db.try_mark_executing(occurrence_id, campaign_id)? {
            if self.db.has_executing(campaign_id)? {
                self.defer_occurrence(&campaign, &occurrence).await;
            } else {
                tracing::debug!(
                    %occurrence_id,
                    "Occurrence state changed under a concurrent fire; dropping"
                );
            }
            return Ok(());
        }
        let attempt = occurrence.attempt + 1;

        tracing::info!(
            campaign = %campaign.name,
            %occurrence_id,
            attempt,
            "Executing campaign occurrence"
        );

        match self.run_attempt(&campaign).await {
            Ok(sample) => {
                self.db.append_metric(&sample)?;
                self.db.complete_occurrence(occurrence_id, Utc::now())?;

                let reach = self.reach.record(campaign.channel, &sample);
                tracing::info!(
                    campaign = %campaign.name,
                    %occurrence_id,
                    impressions = sample.impressions,
                    reach = reach as u64,
                    "Occurrence completed"
                );
                Ok(())
            }
            Err(err) => self.handle_failure(&campaign, &occurrence, attempt, err).await,
        }
    }

    /// Re-arm an occurrence whose campaign is already mid-execution
    async fn defer_occurrence(&self, campaign: &Campaign, occurrence: &Occurrence) {
        let handle = occurrence.job_handle.clone().unwrap_or_else(|| {
            format!(
                "exec:{}:{}",
                campaign.id,
                occurrence.scheduled_time.timestamp()
            )
        });
        let retry_at = Utc::now() + chrono::Duration::seconds(self.config.retry_delay_secs as i64);

        tracing::debug!(
            campaign = %campaign.name,
            occurrence_id = %occurrence.id,
            retry_at = %retry_at,
            "Campaign already executing; occurrence deferred"
        );

        self.jobs
            .schedule_once(
                handle,
                retry_at,
                JobPayload::ExecuteOccurrence {
                    campaign_id: campaign.id,
                    occurrence_id: occurrence.id,
                },
            )
            .await;
    }

    /// One publish-and-measure attempt
    async fn run_attempt(&self, campaign: &Campaign) -> Result<MetricSample, ExecutorError> {
        let content = content::build(campaign);
        let receipt = self.publisher.publish(campaign.channel, &content).await?;
        let raw = self
            .metrics
            .fetch(&receipt.external_id, receipt.published_at)
            .await?;

        Ok(sample_from_raw(campaign.id, raw))
    }

    /// Mark the occurrence rescheduled with a retry job, or permanently
    /// failed once attempts are exhausted
    async fn handle_failure(
        &self,
        campaign: &Campaign,
        occurrence: &Occurrence,
        attempt: u32,
        err: ExecutorError,
    ) -> Result<()> {
        if attempt >= self.config.retry_attempts {
            tracing::error!(
                campaign = %campaign.name,
                occurrence_id = %occurrence.id,
                attempt,
                error = %err,
                "Occurrence permanently failed after retry exhaustion"
            );
            self.db
                .set_occurrence_status(occurrence.id, OccurrenceStatus::Failed)?;
            return Ok(());
        }

        let retry_handle = format!("retry:{}:{}", occurrence.id, attempt);
        let retry_at = Utc::now() + chrono::Duration::seconds(self.config.retry_delay_secs as i64);

        self.db.reschedule_occurrence(occurrence.id, &retry_handle)?;
        self.jobs
            .schedule_once(
                retry_handle.clone(),
                retry_at,
                JobPayload::ExecuteOccurrence {
                    campaign_id: campaign.id,
                    occurrence_id: occurrence.id,
                },
            )
            .await;

        tracing::warn!(
            campaign = %campaign.name,
            occurrence_id = %occurrence.id,
            attempt,
            retry_at = %retry_at,
            error = %err,
            "Execution attempt failed; retry scheduled"
        );
        Ok(())
    }
}

/// Convert raw platform metrics into a stored sample
fn sample_from_raw(campaign_id: Uuid, raw: RawMetrics) -> MetricSample {
    MetricSample {
        id: Uuid::new_v4(),
        campaign_id,
        impressions: raw.impressions,
        clicks: raw.clicks,
        engagement_rate: raw.engagement_rate,
        conversion_rate: raw.conversion_rate,
        cpa: raw.cpa,
        timestamp: Utc::now(),
    }
}

// ============================================================================
// Tests
// ============================================================================
