//! Core data structures for campaigns, occurrences, and metric samples
//!
//! These types mirror the persisted rows the scheduler core reads and
//! writes. Statuses are stored as lowercase strings; the enum codecs here
//! are the single source of truth for that mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Channel
// ============================================================================

/// Publishing channel a campaign targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Facebook,
    Email,
    Search,
}

impl Channel {
    /// All supported channels
    pub const ALL: [Channel; 3] = [Channel::Facebook, Channel::Email, Channel::Search];

    /// Stable string identifier (used in storage and job handles)
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Facebook => "facebook",
            Channel::Email => "email",
            Channel::Search => "search",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facebook" => Ok(Channel::Facebook),
            "email" => Ok(Channel::Email),
            "search" => Ok(Channel::Search),
            other => Err(format!(
                "unknown channel '{other}' (expected facebook, email, or search)"
            )),
        }
    }
}

// ============================================================================
// Frequency
// ============================================================================

/// Repeat cadence for a campaign
///
/// `None` means the campaign executes exactly once at its start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    None,
}

impl Frequency {
    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::None => "none",
        }
    }

    /// Fixed interval used for recurring jobs.
    ///
    /// Monthly maps to 28 days as an operational approximation; persisted
    /// occurrences use calendar-accurate stepping instead (see
    /// [`crate::scheduler::ScheduleGenerator`]).
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Frequency::Daily => Some(chrono::Duration::hours(24)),
            Frequency::Weekly => Some(chrono::Duration::days(7)),
            Frequency::Monthly => Some(chrono::Duration::days(28)),
            Frequency::None => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "none" => Ok(Frequency::None),
            other => Err(format!(
                "unknown frequency '{other}' (expected daily, weekly, monthly, or none)"
            )),
        }
    }
}

// ============================================================================
// Campaign
// ============================================================================

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(format!("unknown campaign status '{other}'")),
        }
    }
}

/// Parameters for creating a new campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub name: String,
    pub product_id: Option<Uuid>,
    pub channel: Channel,
    pub frequency: Frequency,
    pub start_time: DateTime<Utc>,
    pub budget: f64,
}

/// A recurring marketing campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub name: String,
    pub channel: Channel,
    pub frequency: Frequency,
    pub start_time: DateTime<Utc>,
    pub budget: f64,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new draft campaign from a spec
    pub fn new(spec: CampaignSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id: spec.product_id,
            name: spec.name,
            channel: spec.channel,
            frequency: spec.frequency,
            start_time: spec.start_time,
            budget: spec.budget,
            status: CampaignStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the campaign is eligible for execution and rebalancing
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

// ============================================================================
// Occurrence
// ============================================================================

/// Lifecycle status of a single scheduled occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Rescheduled,
}

impl OccurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceStatus::Pending => "pending",
            OccurrenceStatus::Executing => "executing",
            OccurrenceStatus::Completed => "completed",
            OccurrenceStatus::Failed => "failed",
            OccurrenceStatus::Cancelled => "cancelled",
            OccurrenceStatus::Rescheduled => "rescheduled",
        }
    }

    /// Terminal statuses never transition again.
    ///
    /// `Failed` is only written after retry exhaustion; an attempt that
    /// still has retries left is marked `Rescheduled` instead.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OccurrenceStatus::Completed | OccurrenceStatus::Failed | OccurrenceStatus::Cancelled
        )
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OccurrenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OccurrenceStatus::Pending),
            "executing" => Ok(OccurrenceStatus::Executing),
            "completed" => Ok(OccurrenceStatus::Completed),
            "failed" => Ok(OccurrenceStatus::Failed),
            "cancelled" => Ok(OccurrenceStatus::Cancelled),
            "rescheduled" => Ok(OccurrenceStatus::Rescheduled),
            other => Err(format!("unknown occurrence status '{other}'")),
        }
    }
}

/// One scheduled execution slot of a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub status: OccurrenceStatus,
    /// Opaque handle of the job registered for this occurrence, if any
    pub job_handle: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Number of execution attempts consumed so far
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Occurrence {
    /// Create a new pending occurrence
    pub fn new(campaign_id: Uuid, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            scheduled_time,
            status: OccurrenceStatus::Pending,
            job_handle: None,
            executed_at: None,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    /// Attach a job handle
    pub fn with_job_handle(mut self, handle: impl Into<String>) -> Self {
        self.job_handle = Some(handle.into());
        self
    }
}

// ============================================================================
// Metric Sample
// ============================================================================

/// One observed metrics snapshot for a campaign. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub impressions: u64,
    pub clicks: u64,
    pub engagement_rate: f64,
    pub conversion_rate: f64,
    /// Cost per acquisition in currency units
    pub cpa: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Click-through rate, guarded against zero impressions
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
