//! Rebalance triggering and application gate
//!
//! Decides when to run the optimizer (campaign activation, budget edits,
//! the periodic pass) and whether to apply its output. Proposed budgets
//! below the relative-change threshold are held back so noise-level score
//! differences cannot thrash allocations. Runs over the same pool are
//! serialized through a single-flight lock: two concurrent triggers can
//! never read stale budgets and overwrite each other.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BudgetOptimizer, CampaignInput};
use crate::config::BudgetConfig;
use crate::metrics::PerformanceScorer;
use crate::models::CampaignStatus;
use crate::storage::Database;

// ============================================================================
// Types
// ============================================================================

/// Why a rebalance run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceReason {
    CampaignActivated(Uuid),
    BudgetEdited(Uuid),
    Periodic,
    Manual,
}

impl fmt::Display for RebalanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CampaignActivated(id) => write!(f, "campaign {id} activated"),
            Self::BudgetEdited(id) => write!(f, "budget of campaign {id} edited"),
            Self::Periodic => write!(f, "periodic rebalance"),
            Self::Manual => write!(f, "manual rebalance"),
        }
    }
}

/// A budget update that was actually written back
#[derive(Debug, Clone)]
pub struct BudgetChange {
    pub campaign_id: Uuid,
    pub previous: f64,
    pub new: f64,
}

/// Outcome of one rebalance run
#[derive(Debug, Clone)]
pub enum RebalanceOutcome {
    /// The optimizer ran; gated changes were applied
    Applied {
        changes: Vec<BudgetChange>,
        /// Proposals held back by the change-magnitude gate
        held: usize,
    },

    /// The run was a no-op; previous budgets are retained
    Skipped { reason: String },
}

impl RebalanceOutcome {
    /// Number of campaigns whose budget was updated
    pub fn applied_count(&self) -> usize {
        match self {
            Self::Applied { changes, .. } => changes.len(),
            Self::Skipped { .. } => 0,
        }
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// Single-flight rebalance coordinator
pub struct RebalanceTrigger {
    db: Arc<Database>,
    scorer: PerformanceScorer,
    optimizer: BudgetOptimizer,
    config: BudgetConfig,
    flight: Mutex<()>,
}

impl RebalanceTrigger {
    /// Create a trigger over the given store and scorer
    pub fn new(db: Arc<Database>, scorer: PerformanceScorer, config: BudgetConfig) -> Self {
        let optimizer = BudgetOptimizer::from_config(&config);
        Self {
            db,
            scorer,
            optimizer,
            config,
            flight: Mutex::new(()),
        }
    }

    /// Run one read-score-solve-write rebalance pass.
    ///
    /// Optimizer failures (non-convergence, infeasible inputs) do not
    /// propagate: the pass becomes a logged no-op and previous budgets
    /// stay in place. Only storage failures surface as errors.
    pub async fn rebalance(&self, reason: RebalanceReason) -> Result<RebalanceOutcome> {
        let _flight = self.flight.lock().await;

        let campaigns = self.db.campaigns_by_status(CampaignStatus::Active)?;
        if campaigns.is_empty() {
            tracing::info!(%reason, "No active campaigns to rebalance");
            return Ok(RebalanceOutcome::Skipped {
                reason: "no active campaigns".to_string(),
            });
        }

        let mut inputs = Vec::with_capacity(campaigns.len());
        for campaign in &campaigns {
            let score = self.scorer.score_default_window(campaign.id)?;
            inputs.push(CampaignInput {
                id: campaign.id,
                current_budget: campaign.budget,
                score,
            });
        }

        let total = self.pool_total(&inputs);
        if total <= 0.0 {
            tracing::warn!(%reason, "Budget pool is empty; skipping rebalance");
            return Ok(RebalanceOutcome::Skipped {
                reason: "empty budget pool".to_string(),
            });
        }

        let proposal = match self.optimizer.rebalance(&inputs, total) {
            Ok(proposal) => proposal,
            Err(err) => {
                tracing::warn!(%reason, error = %err, "Rebalance is a no-op; keeping previous budgets");
                return Ok(RebalanceOutcome::Skipped {
                    reason: err.to_string(),
                });
            }
        };

        let mut changes = Vec::new();
        let mut held = 0usize;

        for allocation in &proposal.allocations {
            if allocation.relative_change() > self.config.rebalance_threshold {
                self.db
                    .update_campaign_budget(allocation.id, allocation.new_budget)?;
                tracing::info!(
                    campaign_id = %allocation.id,
                    previous = allocation.current_budget,
                    new = allocation.new_budget,
                    score = allocation.score,
                    "Applied budget change"
                );
                changes.push(BudgetChange {
                    campaign_id: allocation.id,
                    previous: allocation.current_budget,
                    new: allocation.new_budget,
                });
            } else {
                held += 1;
            }
        }

        tracing::info!(
            %reason,
            applied = changes.len(),
            held,
            iterations = proposal.iterations,
            "Rebalance complete"
        );

        Ok(RebalanceOutcome::Applied { changes, held })
    }

    /// Pool size: the configured total, or the sum of current budgets when
    /// no pool is configured
    fn pool_total(&self, inputs: &[CampaignInput]) -> f64 {
        if self.config.total_budget > 0.0 {
            self.config.total_budget
        } else {
            inputs.iter().map(|i| i.current_budget).sum()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
