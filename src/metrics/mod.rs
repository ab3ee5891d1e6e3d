//! Campaign performance scoring
//!
//! Reduces a campaign's recent metric history to a single score in [0, 1]
//! so the budget optimizer can compare campaigns on one axis. A campaign
//! with no history scores exactly 0.5: cold starts are neither starved nor
//! favored.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::MetricsConfig;
use crate::models::MetricSample;
use crate::storage::Database;

/// Neutral score for campaigns without metric history
pub const COLD_START_SCORE: f64 = 0.5;

/// Computes performance scores from stored metric windows
pub struct PerformanceScorer {
    db: Arc<Database>,
    config: MetricsConfig,
}

impl PerformanceScorer {
    /// Create a scorer over the given store
    pub fn new(db: Arc<Database>, config: MetricsConfig) -> Self {
        Self { db, config }
    }

    /// Score a campaign over the trailing `window_days`
    pub fn score(&self, campaign_id: Uuid, window_days: i64) -> Result<f64> {
        let since = Utc::now() - Duration::days(window_days);
        let samples = self.db.metrics_since(campaign_id, since)?;
        Ok(score_samples(&samples, &self.config))
    }

    /// Score a campaign over the configured default window
    pub fn score_default_window(&self, campaign_id: Uuid) -> Result<f64> {
        self.score(campaign_id, self.config.window_days)
    }
}

/// Score a metric window with the configured weights.
///
/// Each rate is averaged over the window and clamped to [0, 1];
/// cost-per-acquisition is normalized through `1 / (1 + cpa / 100)` so
/// cheaper acquisition pushes the component toward 1. The weighted sum is
/// bounded as long as the weights sum to 1, which config validation
/// enforces.
pub fn score_samples(samples: &[MetricSample], config: &MetricsConfig) -> f64 {
    if samples.is_empty() {
        return COLD_START_SCORE;
    }

    let n = samples.len() as f64;
    let avg_ctr = samples.iter().map(MetricSample::ctr).sum::<f64>() / n;
    let avg_engagement = samples.iter().map(|s| s.engagement_rate).sum::<f64>() / n;
    let avg_conversion = samples.iter().map(|s| s.conversion_rate).sum::<f64>() / n;
    let avg_cpa = samples.iter().map(|s| s.cpa).sum::<f64>() / n;

    let cpa_norm = 1.0 / (1.0 + avg_cpa.max(0.0) / 100.0);

    config.weight_ctr * avg_ctr.clamp(0.0, 1.0)
        + config.weight_engagement * avg_engagement.clamp(0.0, 1.0)
        + config.weight_conversion * avg_conversion.clamp(0.0, 1.0)
        + config.weight_cpa * cpa_norm
}

// ============================================================================
// Tests
// ============================================================================
