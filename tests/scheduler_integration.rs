//! Integration tests for the scheduling core
//!
//! These tests verify the complete workflow of:
//! - Schedule generation through campaign activation
//! - Reconciliation on cadence changes
//! - Dispatch, retry, and the single-executing invariant
//! - Restart restoration from persisted occurrences

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadence::config::Config;
use cadence::models::{
    CampaignSpec, Channel, Frequency, Occurrence, OccurrenceStatus,
};
use cadence::orchestrator::Orchestrator;
use cadence::publish::{
    ChannelContent, MockMetricsProvider, MockPublisher, PublishError, PublishReceipt, Publisher,
};
use cadence::scheduler::{JobPayload, JobStore};
use cadence::storage::Database;

// ============================================================================
// Helpers
// ============================================================================

fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.tick_ms = 10;
    config.scheduler.horizon_months = 1;
    config.executor.retry_delay_secs = 1;
    config.budget.total_budget = 1_000.0;
    config
}

fn weekly_spec(offset_secs: i64) -> CampaignSpec {
    CampaignSpec {
        name: "integration-weekly".to_string(),
        product_id: None,
        channel: Channel::Facebook,
        frequency: Frequency::Weekly,
        start_time: Utc::now() + Duration::seconds(offset_secs),
        budget: 400.0,
    }
}

/// Publisher that records how many publishes run concurrently
struct TrackingPublisher {
    inner: MockPublisher,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: std::time::Duration,
}

impl TrackingPublisher {
    fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: MockPublisher::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        }
    }

    fn max_seen(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for TrackingPublisher {
    async fn publish(
        &self,
        channel: Channel,
        content: &ChannelContent,
    ) -> Result<PublishReceipt, PublishError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = self.inner.publish(channel, content).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Schedule generation through activation
// ============================================================================

#[tokio::test]
async fn test_weekly_campaign_over_one_month_yields_five_occurrences() {
    let db = Arc::new(Database::in_memory().unwrap());
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::new(MockPublisher::new()),
        Arc::new(MockMetricsProvider::new()),
    );

    let spec = weekly_spec(60);
    let start = spec.start_time;
    let campaign = orch.service().create_campaign(spec).unwrap();
    orch.service().activate_campaign(campaign.id).await.unwrap();

    let occurrences = db.occurrences_for_campaign(campaign.id).unwrap();
    assert_eq!(occurrences.len(), 5);

    // Exactly days 0, 7, 14, 21, 28 from the start time
    for (i, occurrence) in occurrences.iter().enumerate() {
        assert_eq!(
            occurrence.scheduled_time,
            start + Duration::days(7 * i as i64),
            "occurrence {i} at wrong offset"
        );
        assert_eq!(occurrence.status, OccurrenceStatus::Pending);
        assert!(occurrence.job_handle.is_some());
    }
}

#[tokio::test]
async fn test_frequency_change_replaces_entire_cadence() {
    let db = Arc::new(Database::in_memory().unwrap());
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::new(MockPublisher::new()),
        Arc::new(MockMetricsProvider::new()),
    );

    let campaign = orch.service().create_campaign(weekly_spec(3600)).unwrap();
    orch.service().activate_campaign(campaign.id).await.unwrap();

    let old_times: Vec<_> = db
        .open_occurrences(campaign.id)
        .unwrap()
        .iter()
        .map(|o| o.scheduled_time)
        .collect();

    let new_start = Utc::now() + Duration::hours(2);
    orch.service()
        .update_schedule(campaign.id, Frequency::Daily, new_start)
        .await
        .unwrap();

    let open = db.open_occurrences(campaign.id).unwrap();

    // No survivor from the weekly cadence
    for occurrence in &open {
        assert!(
            !old_times.contains(&occurrence.scheduled_time),
            "stale occurrence at {} survived the cadence change",
            occurrence.scheduled_time
        );
    }

    // Daily over a one-month horizon
    assert_eq!(open.len(), 31);
    assert_eq!(orch.job_store().len().await, 31);
}

#[tokio::test]
async fn test_monthly_campaign_from_jan_31_lands_on_feb_end() {
    use cadence::scheduler::ScheduleGenerator;
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
    let seq = ScheduleGenerator::new()
        .generate(start, Frequency::Monthly, 3)
        .unwrap();

    assert_eq!(seq[1], Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());
    assert_eq!(seq[2], Utc.with_ymd_and_hms(2026, 3, 28, 9, 0, 0).unwrap());
}

// ============================================================================
// Cancellation semantics
// ============================================================================

#[tokio::test]
async fn test_cancel_is_a_stable_noop() {
    let store = JobStore::new();
    store
        .schedule_once("exists", Utc::now() + Duration::hours(1), JobPayload::Rebalance)
        .await;

    assert!(store.cancel("exists").await);
    assert!(!store.cancel("exists").await);
    assert!(!store.cancel("exists").await);
    assert!(!store.cancel("never-was").await);
}

#[tokio::test]
async fn test_double_pause_is_harmless() {
    let db = Arc::new(Database::in_memory().unwrap());
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::new(MockPublisher::new()),
        Arc::new(MockMetricsProvider::new()),
    );

    let campaign = orch.service().create_campaign(weekly_spec(3600)).unwrap();
    orch.service().activate_campaign(campaign.id).await.unwrap();

    orch.service().pause_campaign(campaign.id).await.unwrap();
    orch.service().pause_campaign(campaign.id).await.unwrap();

    assert!(db.open_occurrences(campaign.id).unwrap().is_empty());
    assert!(orch.job_store().is_empty().await);
}

// ============================================================================
// Dispatch and execution
// ============================================================================

#[tokio::test]
async fn test_at_most_one_occurrence_executes_per_campaign() {
    let db = Arc::new(Database::in_memory().unwrap());
    let publisher = Arc::new(TrackingPublisher::new(std::time::Duration::from_millis(200)));
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        Arc::new(MockMetricsProvider::new()),
    );

    // Future-dated schedule so activation itself dispatches nothing
    let campaign = orch.service().create_campaign(weekly_spec(3600)).unwrap();
    orch.service().activate_campaign(campaign.id).await.unwrap();

    // Three overdue occurrences all fire on the first tick
    let mut overdue_ids = Vec::new();
    for i in 0..3 {
        let handle = format!("overdue-{i}");
        let occurrence = Occurrence::new(
            campaign.id,
            Utc::now() - Duration::minutes(10 - i as i64),
        )
        .with_job_handle(&handle);
        db.insert_occurrence(&occurrence).unwrap();
        orch.job_store()
            .schedule_once(
                handle,
                occurrence.scheduled_time,
                JobPayload::ExecuteOccurrence {
                    campaign_id: campaign.id,
                    occurrence_id: occurrence.id,
                },
            )
            .await;
        overdue_ids.push(occurrence.id);
    }

    orch.start().await.unwrap();
    // Two deferrals of one second each, plus execution time
    tokio::time::sleep(std::time::Duration::from_secs(4)).await;
    orch.shutdown().await;

    assert_eq!(
        publisher.max_seen(),
        1,
        "two occurrences of one campaign executed concurrently"
    );

    for id in overdue_ids {
        let occurrence = db.get_occurrence(id).unwrap().unwrap();
        assert_eq!(
            occurrence.status,
            OccurrenceStatus::Completed,
            "overdue occurrence was dropped instead of coalesced"
        );
    }
}

#[tokio::test]
async fn test_failed_attempt_retries_and_completes() {
    let db = Arc::new(Database::in_memory().unwrap());
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::new(MockPublisher::new().with_failures(1)),
        Arc::new(MockMetricsProvider::new()),
    );

    let campaign = orch.service().create_campaign(weekly_spec(1)).unwrap();
    orch.service().activate_campaign(campaign.id).await.unwrap();

    orch.start().await.unwrap();
    // First fire fails, retry lands one second later
    tokio::time::sleep(std::time::Duration::from_millis(3_500)).await;
    orch.shutdown().await;

    let occurrences = db.occurrences_for_campaign(campaign.id).unwrap();
    let first = &occurrences[0];
    assert_eq!(first.status, OccurrenceStatus::Completed);
    assert_eq!(first.attempt, 2, "expected one failure and one retry");
    assert_eq!(db.metric_count(campaign.id).unwrap(), 1);
}

#[tokio::test]
async fn test_restart_restores_and_coalesces_overdue_work() {
    let db = Arc::new(Database::in_memory().unwrap());

    // First runtime sets up the campaign, then goes away without running
    {
        let orch = Orchestrator::new(
            fast_config(),
            Arc::clone(&db),
            Arc::new(MockPublisher::new()),
            Arc::new(MockMetricsProvider::new()),
        );
        let campaign = orch.service().create_campaign(weekly_spec(3600)).unwrap();
        orch.service().activate_campaign(campaign.id).await.unwrap();

        // An occurrence that came due while the process was down,
        // well past the misfire grace period
        let missed = Occurrence::new(campaign.id, Utc::now() - Duration::hours(2))
            .with_job_handle("missed-while-down");
        db.insert_occurrence(&missed).unwrap();
    }

    // Second runtime starts from storage alone
    let orch = Orchestrator::new(
        fast_config(),
        Arc::clone(&db),
        Arc::new(MockPublisher::new()),
        Arc::new(MockMetricsProvider::new()),
    );
    orch.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    orch.shutdown().await;

    let campaigns = db.list_campaigns().unwrap();
    let occurrences = db.occurrences_for_campaign(campaigns[0].id).unwrap();
    let missed = occurrences
        .iter()
        .find(|o| o.job_handle.as_deref() == Some("missed-while-down"))
        .expect("missed occurrence should survive the restart");

    assert_eq!(
        missed.status,
        OccurrenceStatus::Completed,
        "overdue occurrence must run coalesced, not be skipped"
    );
}
