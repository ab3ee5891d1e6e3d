//! Mock platform implementations
//!
//! Stand-ins for the real advertising platforms, suitable for demos and
//! tests. Metric synthesis is deterministic: the RNG is seeded from the
//! asset id and query time, so the same query always reports the same
//! numbers. Per-channel base rates follow the profiles observed on the
//! real platforms (facebook engagement ~3.5%, email open ~22%, search
//! CTR ~3.2%).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use super::{
    ChannelContent, MetricsProvider, MetricsUnavailableError, PublishError, PublishReceipt,
    Publisher, RawMetrics,
};
use crate::models::Channel;

// ============================================================================
// Mock Publisher
// ============================================================================

/// Mock publisher that validates content and fabricates receipts
pub struct MockPublisher {
    /// Number of upcoming publish calls that should fail (for tests)
    fail_remaining: AtomicUsize,

    /// Simulated platform latency
    latency: Option<std::time::Duration>,
}

impl MockPublisher {
    /// Create a publisher that always succeeds
    pub fn new() -> Self {
        Self {
            fail_remaining: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Fail the next `count` publish calls with a platform error
    pub fn with_failures(self, count: usize) -> Self {
        self.fail_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Simulate platform latency on every call
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn should_fail(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(
        &self,
        channel: Channel,
        content: &ChannelContent,
    ) -> Result<PublishReceipt, PublishError> {
        content.validate()?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.should_fail() {
            return Err(PublishError::Platform {
                channel,
                reason: "injected platform failure".to_string(),
            });
        }

        let external_id = format!("{}:{}", channel.as_str(), Uuid::new_v4());
        let published_at = Utc::now();

        tracing::debug!(channel = %channel, external_id = %external_id, "Mock publish accepted");

        Ok(PublishReceipt {
            external_id,
            published_at,
            platform_response: format!("{{\"status\":\"published\",\"channel\":\"{channel}\"}}"),
        })
    }
}

// ============================================================================
// Mock Metrics Provider
// ============================================================================

/// Per-channel metric synthesis profile
struct ChannelProfile {
    base_impressions: f64,
    impressions_spread: f64,
    ctr_mean: f64,
    ctr_sd: f64,
    engagement_mean: f64,
    engagement_sd: f64,
    conversion_mean: f64,
    conversion_sd: f64,
}

impl ChannelProfile {
    fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Facebook => Self {
                base_impressions: 8_000.0,
                impressions_spread: 2_000.0,
                ctr_mean: 0.025,
                ctr_sd: 0.006,
                engagement_mean: 0.035,
                engagement_sd: 0.008,
                conversion_mean: 0.012,
                conversion_sd: 0.003,
            },
            Channel::Email => Self {
                base_impressions: 3_000.0,
                impressions_spread: 800.0,
                ctr_mean: 0.028,
                ctr_sd: 0.007,
                engagement_mean: 0.22,
                engagement_sd: 0.04,
                conversion_mean: 0.018,
                conversion_sd: 0.004,
            },
            Channel::Search => Self {
                base_impressions: 5_000.0,
                impressions_spread: 1_200.0,
                ctr_mean: 0.032,
                ctr_sd: 0.009,
                engagement_mean: 0.032,
                engagement_sd: 0.009,
                conversion_mean: 0.015,
                conversion_sd: 0.0035,
            },
        }
    }
}

/// Mock metrics provider with deterministic stochastic synthesis
pub struct MockMetricsProvider {
    /// Assets younger than this are not yet queryable
    availability_delay: Duration,
}

impl MockMetricsProvider {
    /// Create a provider whose assets are immediately queryable
    pub fn new() -> Self {
        Self {
            availability_delay: Duration::zero(),
        }
    }

    /// Require assets to age before metrics become available
    pub fn with_availability_delay(mut self, delay: Duration) -> Self {
        self.availability_delay = delay;
        self
    }

    /// Derive the channel from the `<channel>:<id>` asset id format
    fn channel_of(external_id: &str) -> Channel {
        let prefix = external_id.split(':').next().unwrap_or("");
        prefix.parse().unwrap_or_else(|_| {
            tracing::debug!(external_id, "Unrecognized asset id prefix; assuming facebook");
            Channel::Facebook
        })
    }

    /// Deterministic seed from asset id and query anchor time
    fn seed(external_id: &str, anchor: DateTime<Utc>) -> u64 {
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in external_id.bytes() {
            seed ^= u64::from(byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        seed ^ anchor.timestamp() as u64
    }
}

impl Default for MockMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProvider for MockMetricsProvider {
    async fn fetch(
        &self,
        external_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<RawMetrics, MetricsUnavailableError> {
        if Utc::now() - published_at < self.availability_delay {
            return Err(MetricsUnavailableError {
                external_id: external_id.to_string(),
            });
        }

        let profile = ChannelProfile::for_channel(Self::channel_of(external_id));
        let mut rng = ChaCha8Rng::seed_from_u64(Self::seed(external_id, published_at));

        let impressions = (profile.base_impressions
            + sample_normal(&mut rng, 0.0, profile.impressions_spread))
        .max(100.0) as u64;

        let ctr = sample_rate(&mut rng, profile.ctr_mean, profile.ctr_sd);
        let engagement_rate = sample_rate(&mut rng, profile.engagement_mean, profile.engagement_sd);
        let conversion_rate = sample_rate(&mut rng, profile.conversion_mean, profile.conversion_sd);

        let clicks = (impressions as f64 * ctr).round() as u64;
        let cpa = sample_normal(&mut rng, 45.0, 15.0).max(1.0);

        Ok(RawMetrics {
            impressions,
            clicks,
            engagement_rate,
            conversion_rate,
            cpa,
        })
    }
}

/// Draw from a normal distribution, falling back to the mean on a
/// degenerate spread
fn sample_normal(rng: &mut ChaCha8Rng, mean: f64, sd: f64) -> f64 {
    match Normal::new(mean, sd) {
        Ok(dist) => rng.sample(dist),
        Err(_) => mean,
    }
}

/// Draw a rate, clamped to the (0.001, 1.0) band the platforms report
fn sample_rate(rng: &mut ChaCha8Rng, mean: f64, sd: f64) -> f64 {
    sample_normal(rng, mean, sd).clamp(0.001, 1.0)
}

// ============================================================================
// Tests
// ============================================================================
