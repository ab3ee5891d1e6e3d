//! Publishing and metrics collaborator boundary
//!
//! The scheduler core never talks to a real advertising platform; it sees
//! the [`Publisher`] and [`MetricsProvider`] traits and nothing else.
//! Content handed across the boundary is a tagged variant per channel,
//! validated before publishing, instead of a loose key/value map.
//!
//! # Modules
//!
//! - [`mock`] - Deterministic mock platform implementations

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Channel;

pub use mock::{MockMetricsProvider, MockPublisher};

// ============================================================================
// Errors
// ============================================================================

/// Failure publishing content to a platform
#[derive(Debug, Error)]
pub enum PublishError {
    /// Content failed boundary validation
    #[error("invalid content for {channel}: {reason}")]
    InvalidContent { channel: Channel, reason: String },

    /// The platform rejected or could not accept the publication
    #[error("platform failure on {channel}: {reason}")]
    Platform { channel: Channel, reason: String },
}

/// The published asset cannot be queried for metrics yet
#[derive(Debug, Error)]
#[error("metrics not yet available for asset '{external_id}'")]
pub struct MetricsUnavailableError {
    pub external_id: String,
}

// ============================================================================
// Channel content
// ============================================================================

/// Per-channel publish payload
///
/// Field limits follow the platform rules the mock enforces: search
/// headlines are capped at 30 characters and descriptions at 90.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ChannelContent {
    Facebook {
        message: String,
        link: String,
        call_to_action: String,
        image_url: String,
    },
    Email {
        subject: String,
        preview_text: String,
        html_body: String,
        plain_body: String,
    },
    Search {
        headlines: Vec<String>,
        descriptions: Vec<String>,
        final_url: String,
    },
}

impl ChannelContent {
    /// Channel this content targets
    pub fn channel(&self) -> Channel {
        match self {
            ChannelContent::Facebook { .. } => Channel::Facebook,
            ChannelContent::Email { .. } => Channel::Email,
            ChannelContent::Search { .. } => Channel::Search,
        }
    }

    /// Validate the payload at the publish boundary
    pub fn validate(&self) -> Result<(), PublishError> {
        let fail = |reason: String| PublishError::InvalidContent {
            channel: self.channel(),
            reason,
        };

        match self {
            ChannelContent::Facebook { message, link, .. } => {
                if message.trim().is_empty() {
                    return Err(fail("message is empty".into()));
                }
                if link.trim().is_empty() {
                    return Err(fail("link is empty".into()));
                }
            }
            ChannelContent::Email {
                subject,
                plain_body,
                ..
            } => {
                if subject.trim().is_empty() {
                    return Err(fail("subject is empty".into()));
                }
                if plain_body.trim().is_empty() {
                    return Err(fail("plain body is empty".into()));
                }
            }
            ChannelContent::Search {
                headlines,
                descriptions,
                final_url,
            } => {
                if headlines.is_empty() || headlines.len() > 3 {
                    return Err(fail(format!(
                        "expected 1-3 headlines, got {}",
                        headlines.len()
                    )));
                }
                if let Some(long) = headlines.iter().find(|h| h.chars().count() > 30) {
                    return Err(fail(format!("headline over 30 chars: '{long}'")));
                }
                if descriptions.is_empty() || descriptions.len() > 2 {
                    return Err(fail(format!(
                        "expected 1-2 descriptions, got {}",
                        descriptions.len()
                    )));
                }
                if let Some(long) = descriptions.iter().find(|d| d.chars().count() > 90) {
                    return Err(fail(format!("description over 90 chars: '{long}'")));
                }
                if final_url.trim().is_empty() {
                    return Err(fail("final url is empty".into()));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Result of a successful publication
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Platform-side asset identifier
    pub external_id: String,
    pub published_at: DateTime<Utc>,
    /// Raw platform response, for logging only
    pub platform_response: String,
}

/// Raw metrics reported by a platform for one asset
#[derive(Debug, Clone, Copy)]
pub struct RawMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub engagement_rate: f64,
    pub conversion_rate: f64,
    pub cpa: f64,
}

/// Publishes campaign content to a channel platform
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        channel: Channel,
        content: &ChannelContent,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Fetches observed metrics for a published asset
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch(
        &self,
        external_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<RawMetrics, MetricsUnavailableError>;
}

// ============================================================================
// Tests
// ============================================================================
