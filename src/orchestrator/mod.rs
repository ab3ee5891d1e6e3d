//! Scheduler runtime wiring
//!
//! The [`Orchestrator`] is the explicit, injectable state object that owns
//! the job store, dispatcher loop, executor, rebalance trigger, and reach
//! counter, with a defined start/shutdown lifecycle. Multiple instances
//! can coexist in one process, which is what makes the runtime testable in
//! isolation — there is no module-level global registry anywhere.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use async_trait::async_trait;

use crate::campaign::CampaignService;
use crate::config::Config;
use crate::executor::{CampaignExecutor, ReachCounter};
use crate::metrics::PerformanceScorer;
use crate::models::CampaignStatus;
use crate::optimizer::{RebalanceReason, RebalanceTrigger};
use crate::publish::{MetricsProvider, Publisher};
use crate::scheduler::{
    Dispatcher, DispatcherConfig, FiredJob, JobHandler, JobPayload, JobStore,
};
use crate::storage::Database;

/// Job ids of the periodic system passes
const JOB_METRICS: &str = "system:metrics";
const JOB_REBALANCE: &str = "system:rebalance";
const JOB_CLEANUP: &str = "system:cleanup";

// ============================================================================
// Job handler
// ============================================================================

/// Routes fired jobs to the executor and the periodic passes.
///
/// Every failure is absorbed here: one campaign's bad day must never stop
/// the dispatch loop or another campaign's work.
struct OrchestratorHandler {
    db: Arc<Database>,
    executor: Arc<CampaignExecutor>,
    rebalance: Arc<RebalanceTrigger>,
    metrics_provider: Arc<dyn MetricsProvider>,
    retention_days: i64,
}

#[async_trait]
impl JobHandler for OrchestratorHandler {
    async fn handle(&self, job: FiredJob) {
        match job.payload {
            JobPayload::ExecuteOccurrence {
                campaign_id,
                occurrence_id,
            } => {
                // The executor owns the single-executing-per-campaign claim
                // and its own retry policy; only storage errors come back.
                if let Err(err) = self
                    .executor
                    .execute_occurrence(campaign_id, occurrence_id)
                    .await
                {
                    tracing::error!(
                        %campaign_id,
                        %occurrence_id,
                        error = %err,
                        "Occurrence execution hit a storage error"
                    );
                }
            }
            JobPayload::CollectMetrics => self.collect_metrics().await,
            JobPayload::Rebalance => {
                if let Err(err) = self.rebalance.rebalance(RebalanceReason::Periodic).await {
                    tracing::error!(error = %err, "Periodic rebalance failed");
                }
            }
            JobPayload::CleanupOccurrences => {
                let cutoff = Utc::now() - Duration::days(self.retention_days);
                match self.db.cleanup_terminal_before(cutoff) {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::info!(removed, "Cleaned up old terminal occurrences")
                    }
                    Err(err) => tracing::error!(error = %err, "Occurrence cleanup failed"),
                }
            }
        }
    }
}

impl OrchestratorHandler {
    /// Periodic metrics pass: pull a sample for every active campaign,
    /// independent of execution runs
    async fn collect_metrics(&self) {
        let campaigns = match self.db.campaigns_by_status(CampaignStatus::Active) {
            Ok(campaigns) => campaigns,
            Err(err) => {
                tracing::error!(error = %err, "Metrics pass could not list campaigns");
                return;
            }
        };

        let fetches = campaigns.iter().map(|campaign| {
            let asset_ref = format!("{}:{}", campaign.channel.as_str(), campaign.id);
            let provider = Arc::clone(&self.metrics_provider);
            async move { (campaign, provider.fetch(&asset_ref, Utc::now()).await) }
        });

        for (campaign, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(raw) => {
                    let sample = crate::models::MetricSample {
                        id: uuid::Uuid::new_v4(),
                        campaign_id: campaign.id,
                        impressions: raw.impressions,
                        clicks: raw.clicks,
                        engagement_rate: raw.engagement_rate,
                        conversion_rate: raw.conversion_rate,
                        cpa: raw.cpa,
                        timestamp: Utc::now(),
                    };
                    if let Err(err) = self.db.append_metric(&sample) {
                        tracing::error!(campaign = %campaign.name, error = %err, "Failed to store metric sample");
                    }
                }
                Err(err) => {
                    tracing::debug!(campaign = %campaign.name, error = %err, "Metrics not yet available");
                }
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Owns and runs the whole scheduling core
pub struct Orchestrator {
    config: Config,
    db: Arc<Database>,
    jobs: Arc<JobStore>,
    reach: Arc<ReachCounter>,
    rebalance: Arc<RebalanceTrigger>,
    service: CampaignService,
    dispatcher: Arc<Dispatcher>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire up a runtime over the given store and collaborators
    pub fn new(
        config: Config,
        db: Arc<Database>,
        publisher: Arc<dyn Publisher>,
        metrics_provider: Arc<dyn MetricsProvider>,
    ) -> Self {
        let jobs = Arc::new(JobStore::new());
        let reach = Arc::new(ReachCounter::new());

        let scorer = PerformanceScorer::new(Arc::clone(&db), config.metrics.clone());
        let rebalance = Arc::new(RebalanceTrigger::new(
            Arc::clone(&db),
            scorer,
            config.budget.clone(),
        ));

        let executor = Arc::new(CampaignExecutor::new(
            Arc::clone(&db),
            Arc::clone(&jobs),
            publisher,
            Arc::clone(&metrics_provider),
            config.executor.clone(),
            Arc::clone(&reach),
        ));

        let handler = Arc::new(OrchestratorHandler {
            db: Arc::clone(&db),
            executor,
            rebalance: Arc::clone(&rebalance),
            metrics_provider,
            retention_days: config.scheduler.cleanup_retention_days,
        });

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&jobs),
            handler,
            DispatcherConfig {
                tick: config.tick(),
                max_concurrent: config.scheduler.max_concurrent_campaigns,
                misfire_grace: config.misfire_grace(),
                acquire_timeout: config.tick().max(std::time::Duration::from_secs(30)),
            },
        ));

        let service = CampaignService::new(
            Arc::clone(&db),
            Arc::clone(&jobs),
            Arc::clone(&rebalance),
            config.scheduler.clone(),
            config.budget.clone(),
        );

        Self {
            config,
            db,
            jobs,
            reach,
            rebalance,
            service,
            dispatcher,
            dispatcher_task: Mutex::new(None),
        }
    }

    /// Campaign lifecycle operations bound to this runtime
    pub fn service(&self) -> &CampaignService {
        &self.service
    }

    /// The runtime's job store, for embedding and inspection
    pub fn job_store(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// The rebalance trigger, for manual runs
    pub fn rebalance_trigger(&self) -> &Arc<RebalanceTrigger> {
        &self.rebalance
    }

    /// Accumulated reporting reach
    pub fn reach_total(&self) -> f64 {
        self.reach.total()
    }

    /// Start the runtime: rebuild jobs from persisted occurrences,
    /// register the periodic system passes, and launch the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        self.restore_schedules().await?;

        self.jobs
            .schedule_recurring(
                JOB_METRICS,
                self.config.metrics_interval(),
                JobPayload::CollectMetrics,
            )
            .await;
        self.jobs
            .schedule_recurring(
                JOB_REBALANCE,
                self.config.rebalance_interval(),
                JobPayload::Rebalance,
            )
            .await;
        self.jobs
            .schedule_recurring(JOB_CLEANUP, Duration::days(1), JobPayload::CleanupOccurrences)
            .await;

        let dispatcher = Arc::clone(&self.dispatcher);
        let task = tokio::spawn(async move { dispatcher.run().await });
        *self.dispatcher_task.lock().await = Some(task);

        tracing::info!("Orchestrator started");
        Ok(())
    }

    /// Stop the dispatch loop and drop pending jobs. Occurrence rows stay
    /// behind as the durable source of truth for the next start.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        if let Some(task) = self.dispatcher_task.lock().await.take() {
            let _ = task.await;
        }
        self.jobs.clear().await;
        tracing::info!("Orchestrator stopped");
    }

    /// Re-register jobs for every open occurrence of active campaigns.
    /// Overdue occurrences fire immediately (coalesced), matching the
    /// misfire policy.
    async fn restore_schedules(&self) -> Result<()> {
        let mut restored = 0usize;

        for campaign in self.db.campaigns_by_status(CampaignStatus::Active)? {
            for occurrence in self.db.open_occurrences(campaign.id)? {
                let handle = occurrence.job_handle.clone().unwrap_or_else(|| {
                    format!(
                        "exec:{}:{}",
                        campaign.id,
                        occurrence.scheduled_time.timestamp()
                    )
                });
                self.jobs
                    .schedule_once(
                        handle,
                        occurrence.scheduled_time,
                        JobPayload::ExecuteOccurrence {
                            campaign_id: campaign.id,
                            occurrence_id: occurrence.id,
                        },
                    )
                    .await;
                restored += 1;
            }
        }

        if restored > 0 {
            tracing::info!(restored, "Restored occurrence jobs from storage");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
