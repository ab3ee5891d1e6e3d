//! Campaign lifecycle operations
//!
//! Implements the operations the campaign management layer calls into the
//! core: create, activate, reschedule, pause, delete, and direct budget
//! edits. Schedule changes go through an idempotent reconciliation step
//! that diffs desired occurrences against live ones instead of blindly
//! cancelling and regenerating, so an in-flight cancellation can never
//! race a fresh generation into orphaned jobs.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{BudgetConfig, SchedulerConfig};
use crate::models::{
    Campaign, CampaignSpec, CampaignStatus, Frequency, Occurrence, OccurrenceStatus,
};
use crate::optimizer::{RebalanceOutcome, RebalanceReason, RebalanceTrigger};
use crate::scheduler::{JobPayload, JobStore, ScheduleGenerator};
use crate::storage::Database;

// ============================================================================
// Types
// ============================================================================

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// New occurrences created and registered
    pub created: usize,

    /// Stale occurrences cancelled (wrong cadence or start)
    pub cancelled: usize,

    /// Live occurrences already matching the desired schedule
    pub retained: usize,
}

impl ReconcileReport {
    /// Whether the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.cancelled == 0
    }
}

// ============================================================================
// Service
// ============================================================================

/// Coordinates campaign lifecycle transitions with the scheduler core
pub struct CampaignService {
    db: Arc<Database>,
    jobs: Arc<JobStore>,
    generator: ScheduleGenerator,
    rebalance: Arc<RebalanceTrigger>,
    scheduler_config: SchedulerConfig,
    budget_config: BudgetConfig,
}

impl CampaignService {
    /// Create a lifecycle service
    pub fn new(
        db: Arc<Database>,
        jobs: Arc<JobStore>,
        rebalance: Arc<RebalanceTrigger>,
        scheduler_config: SchedulerConfig,
        budget_config: BudgetConfig,
    ) -> Self {
        Self {
            db,
            jobs,
            generator: ScheduleGenerator::new(),
            rebalance,
            scheduler_config,
            budget_config,
        }
    }

    /// Create a new draft campaign. The core's involvement begins at
    /// activation; no schedules exist yet.
    pub fn create_campaign(&self, spec: CampaignSpec) -> Result<Campaign> {
        if spec.name.trim().is_empty() {
            anyhow::bail!("campaign name must not be empty");
        }
        if !spec.budget.is_finite() || spec.budget < 0.0 {
            anyhow::bail!("campaign budget must be a non-negative amount");
        }

        let campaign = Campaign::new(spec);
        self.db.insert_campaign(&campaign)?;

        tracing::info!(campaign = %campaign.name, id = %campaign.id, "Campaign created");
        Ok(campaign)
    }

    /// Activate a campaign: ensure a workable budget, materialize its
    /// schedule, flip it to active, and rebalance the pool.
    pub async fn activate_campaign(&self, id: Uuid) -> Result<Campaign> {
        let mut campaign = self.require_campaign(id)?;

        if campaign.budget <= 0.0 {
            // A zero-budget campaign cannot run; let the pool assign it
            // something, and floor it if the pool cannot.
            self.rebalance
                .rebalance(RebalanceReason::CampaignActivated(id))
                .await?;
            campaign = self.require_campaign(id)?;

            if campaign.budget <= 0.0 {
                self.db
                    .update_campaign_budget(id, self.budget_config.min_budget)?;
                campaign = self.require_campaign(id)?;
                tracing::info!(
                    campaign = %campaign.name,
                    floor = self.budget_config.min_budget,
                    "Zero-budget activation floored to minimum budget"
                );
            }
        }

        let report = self.reconcile_schedule(&campaign).await?;
        self.db.update_campaign_status(id, CampaignStatus::Active)?;

        tracing::info!(
            campaign = %campaign.name,
            id = %id,
            created = report.created,
            "Campaign activated"
        );

        self.rebalance
            .rebalance(RebalanceReason::CampaignActivated(id))
            .await?;

        self.require_campaign(id)
    }

    /// Change a campaign's cadence and/or start time, reconciling the
    /// schedule so no occurrence of the old cadence survives.
    pub async fn update_schedule(
        &self,
        id: Uuid,
        frequency: Frequency,
        start_time: chrono::DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let campaign = self.require_campaign(id)?;
        self.db.update_campaign_schedule(id, frequency, start_time)?;
        let campaign = Campaign {
            frequency,
            start_time,
            ..campaign
        };

        if campaign.status != CampaignStatus::Active {
            // Draft and paused campaigns carry no live schedule to fix up
            return Ok(ReconcileReport::default());
        }

        let report = self.reconcile_schedule(&campaign).await?;
        tracing::info!(
            campaign = %campaign.name,
            frequency = %frequency,
            created = report.created,
            cancelled = report.cancelled,
            "Schedule updated"
        );
        Ok(report)
    }

    /// Pause a campaign, cancelling every open occurrence
    pub async fn pause_campaign(&self, id: Uuid) -> Result<()> {
        let campaign = self.require_campaign(id)?;

        let cancelled = self.cancel_open(id).await?;
        self.db.update_campaign_status(id, CampaignStatus::Paused)?;

        tracing::info!(campaign = %campaign.name, cancelled, "Campaign paused");
        Ok(())
    }

    /// Delete a campaign after cancelling all of its occurrences
    pub async fn delete_campaign(&self, id: Uuid) -> Result<()> {
        let campaign = self.require_campaign(id)?;

        self.cancel_open(id).await?;
        self.db.delete_occurrences(id)?;
        self.db.delete_campaign(id)?;

        tracing::info!(campaign = %campaign.name, id = %id, "Campaign deleted");
        Ok(())
    }

    /// Direct budget edit. Deliberately funneled through the same
    /// rebalance path the optimizer uses, so a manual change still gets
    /// gated and the pool stays coherent.
    pub async fn set_budget(&self, id: Uuid, budget: f64) -> Result<RebalanceOutcome> {
        if !budget.is_finite() || budget < 0.0 {
            anyhow::bail!("budget must be a non-negative amount");
        }

        self.require_campaign(id)?;
        self.db.update_campaign_budget(id, budget)?;

        self.rebalance
            .rebalance(RebalanceReason::BudgetEdited(id))
            .await
    }

    /// Diff the desired schedule against live occurrences and fix the
    /// difference. Idempotent: a second pass with unchanged parameters is
    /// a no-op.
    pub async fn reconcile_schedule(&self, campaign: &Campaign) -> Result<ReconcileReport> {
        let desired = self
            .generator
            .upcoming(
                campaign.start_time,
                campaign.frequency,
                self.scheduler_config.horizon_months,
                Utc::now(),
            )
            .with_context(|| format!("cannot schedule campaign {}", campaign.id))?;
        let desired_set: HashSet<_> = desired.iter().copied().collect();

        let open = self.db.open_occurrences(campaign.id)?;
        let mut report = ReconcileReport::default();

        // Cancel occurrences the new schedule no longer wants
        let mut live_times = HashSet::new();
        for occurrence in &open {
            if desired_set.contains(&occurrence.scheduled_time) {
                live_times.insert(occurrence.scheduled_time);
                report.retained += 1;
                continue;
            }

            if let Some(handle) = &occurrence.job_handle {
                self.jobs.cancel(handle).await;
            }
            self.db
                .set_occurrence_status(occurrence.id, OccurrenceStatus::Cancelled)?;
            report.cancelled += 1;
        }

        // Create and register what is missing, in schedule order
        for ts in desired {
            if live_times.contains(&ts) {
                continue;
            }

            let handle = format!("exec:{}:{}", campaign.id, ts.timestamp());
            let occurrence = Occurrence::new(campaign.id, ts).with_job_handle(&handle);
            self.db.insert_occurrence(&occurrence)?;
            self.jobs
                .schedule_once(
                    handle,
                    ts,
                    JobPayload::ExecuteOccurrence {
                        campaign_id: campaign.id,
                        occurrence_id: occurrence.id,
                    },
                )
                .await;
            report.created += 1;
        }

        Ok(report)
    }

    /// Cancel all open occurrences and their jobs. Returns how many rows
    /// were cancelled. Job removal is best-effort: a handle that already
    /// fired is a no-op.
    async fn cancel_open(&self, campaign_id: Uuid) -> Result<usize> {
        let handles = self.db.cancel_open_occurrences(campaign_id)?;
        let count = handles.len();
        for handle in handles {
            self.jobs.cancel(&handle).await;
        }
        Ok(count)
    }

    fn require_campaign(&self, id: Uuid) -> Result<Campaign> {
        self.db
            .get_campaign(id)?
            .with_context(|| format!("campaign {id} not found"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::PerformanceScorer;
    use crate::models::Channel;
    use chrono::Duration;

    struct Fixture {
        db: Arc<Database>,
        jobs: Arc<JobStore>,
        service: CampaignService,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let jobs = Arc::new(JobStore::new());
        let budget_config = BudgetConfig {
            total_budget: 1_000.0,
            ..Default::default()
        };
        let scorer = PerformanceScorer::new(Arc::clone(&db), MetricsConfig::default());
        let rebalance = Arc::new(RebalanceTrigger::new(
            Arc::clone(&db),
            scorer,
            budget_config.clone(),
        ));
        let service = CampaignService::new(
            Arc::clone(&db),
            Arc::clone(&jobs),
            rebalance,
            SchedulerConfig {
                horizon_months: 1,
                ..Default::default()
            },
            budget_config,
        );
        Fixture { db, jobs, service }
    }

    fn weekly_spec(budget: f64) -> CampaignSpec {
        CampaignSpec {
            name: "weekly-push".to_string(),
            product_id: None,
            channel: Channel::Email,
            frequency: Frequency::Weekly,
            start_time: Utc::now() + Duration::minutes(5),
            budget,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_spec() {
        let f = fixture();

        let mut spec = weekly_spec(100.0);
        spec.name = "  ".to_string();
        assert!(f.service.create_campaign(spec).is_err());

        let mut spec = weekly_spec(100.0);
        spec.budget = -5.0;
        assert!(f.service.create_campaign(spec).is_err());
    }

    #[tokio::test]
    async fn test_activation_materializes_schedule() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(400.0)).unwrap();

        let activated = f.service.activate_campaign(campaign.id).await.unwrap();
        assert_eq!(activated.status, CampaignStatus::Active);

        // Weekly cadence over a one-month horizon: five occurrences
        let occurrences = f.db.occurrences_for_campaign(campaign.id).unwrap();
        assert_eq!(occurrences.len(), 5);
        assert_eq!(f.jobs.len().await, 5);

        // Strictly increasing in generation order
        for pair in occurrences.windows(2) {
            assert!(pair[0].scheduled_time < pair[1].scheduled_time);
        }
    }

    #[tokio::test]
    async fn test_zero_budget_activation_gets_floor() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(0.0)).unwrap();

        let activated = f.service.activate_campaign(campaign.id).await.unwrap();
        assert!(activated.budget > 0.0);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(300.0)).unwrap();
        f.service.activate_campaign(campaign.id).await.unwrap();

        let campaign = f.db.get_campaign(campaign.id).unwrap().unwrap();
        let report = f.service.reconcile_schedule(&campaign).await.unwrap();

        assert!(report.is_noop(), "second reconcile changed {report:?}");
        assert_eq!(report.retained, 5);
    }

    #[tokio::test]
    async fn test_frequency_change_leaves_no_stale_occurrences() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(300.0)).unwrap();
        f.service.activate_campaign(campaign.id).await.unwrap();

        let new_start = Utc::now() + Duration::hours(1);
        let report = f
            .service
            .update_schedule(campaign.id, Frequency::Daily, new_start)
            .await
            .unwrap();

        // Old weekly cadence fully replaced by daily cadence
        assert_eq!(report.cancelled, 5);
        assert_eq!(report.created, 31);

        let open = f.db.open_occurrences(campaign.id).unwrap();
        assert_eq!(open.len(), 31);
        for pair in open.windows(2) {
            let gap = pair[1].scheduled_time - pair[0].scheduled_time;
            assert_eq!(gap, Duration::hours(24), "stale cadence survived");
        }
        assert_eq!(f.jobs.len().await, 31);
    }

    #[tokio::test]
    async fn test_pause_cancels_everything() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(300.0)).unwrap();
        f.service.activate_campaign(campaign.id).await.unwrap();

        f.service.pause_campaign(campaign.id).await.unwrap();

        let campaign = f.db.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert!(f.db.open_occurrences(campaign.id).unwrap().is_empty());
        assert!(f.jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_removes_campaign_and_occurrences() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(300.0)).unwrap();
        f.service.activate_campaign(campaign.id).await.unwrap();

        f.service.delete_campaign(campaign.id).await.unwrap();

        assert!(f.db.get_campaign(campaign.id).unwrap().is_none());
        assert!(f.db.occurrences_for_campaign(campaign.id).unwrap().is_empty());
        assert!(f.jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_one_shot_campaign_single_occurrence() {
        let f = fixture();
        let mut spec = weekly_spec(300.0);
        spec.frequency = Frequency::None;
        let campaign = f.service.create_campaign(spec).unwrap();

        f.service.activate_campaign(campaign.id).await.unwrap();
        assert_eq!(f.db.occurrences_for_campaign(campaign.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_horizon_surfaces_error() {
        let f = fixture();
        let mut spec = weekly_spec(300.0);
        spec.start_time = Utc::now() - Duration::days(400);
        let campaign = f.service.create_campaign(spec).unwrap();

        let result = f.service.activate_campaign(campaign.id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_set_budget_enters_rebalance_path() {
        let f = fixture();
        let campaign = f.service.create_campaign(weekly_spec(500.0)).unwrap();
        f.service.activate_campaign(campaign.id).await.unwrap();

        let outcome = f.service.set_budget(campaign.id, 50.0).await.unwrap();

        // A single active campaign takes the full pool back
        match outcome {
            RebalanceOutcome::Applied { changes, .. } => {
                assert_eq!(changes.len(), 1);
                assert!((changes[0].new - 1_000.0).abs() < 1e-6);
            }
            RebalanceOutcome::Skipped { reason } => panic!("unexpected skip: {reason}"),
        }
    }
}
