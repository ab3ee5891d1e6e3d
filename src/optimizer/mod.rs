//! Constrained budget reallocation
//!
//! Solves the budget split across active campaigns: maximize
//! `Σ budgetᵢ · scoreᵢ − λ · stddev(budget)` subject to the pool equality
//! constraint and per-campaign box bounds. The evenness penalty keeps the
//! solver from chasing the single top performer with the whole pool.
//!
//! The solver is projected gradient ascent with a backtracking step: take
//! a gradient step, project exactly back onto the box-constrained simplex,
//! and halve the step whenever the objective stops improving. The
//! objective is concave, so the iteration either converges to the
//! constrained optimum or runs out of iterations — in which case the run
//! reports non-convergence and the caller keeps the previous allocation.
//!
//! # Modules
//!
//! - [`trigger`] - When to run the optimizer and whether to apply it

pub mod trigger;

use statrs::statistics::Statistics;
use thiserror::Error;
use uuid::Uuid;

pub use trigger::{BudgetChange, RebalanceOutcome, RebalanceReason, RebalanceTrigger};

/// Iteration cap before the run is declared non-convergent
const MAX_ITERATIONS: usize = 1_000;

// ============================================================================
// Types
// ============================================================================

/// One campaign's view into the optimizer
#[derive(Debug, Clone)]
pub struct CampaignInput {
    pub id: Uuid,
    pub current_budget: f64,
    pub score: f64,
}

/// Proposed budget for one campaign
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: Uuid,
    pub current_budget: f64,
    pub new_budget: f64,
    pub score: f64,
}

impl Allocation {
    /// Relative change of the proposal against the current budget.
    /// A zero current budget counts as an infinite relative change so the
    /// proposal always clears the application gate.
    pub fn relative_change(&self) -> f64 {
        if self.current_budget <= f64::EPSILON {
            f64::INFINITY
        } else {
            (self.new_budget - self.current_budget).abs() / self.current_budget
        }
    }
}

/// Result of one optimizer run
#[derive(Debug, Clone)]
pub struct BudgetProposal {
    pub allocations: Vec<Allocation>,
    /// Objective value at the returned point
    pub objective: f64,
    pub iterations: usize,
}

/// Optimizer failures. Every variant makes the rebalance a no-op.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("no campaigns to rebalance")]
    NoCampaigns,

    #[error("invalid total budget {total}")]
    InvalidTotal { total: f64 },

    #[error("invalid input for campaign {id}: {detail}")]
    InvalidInput { id: Uuid, detail: String },

    #[error("infeasible bounds: {detail}")]
    InfeasibleBounds { detail: String },

    #[error("solver did not converge after {iterations} iterations")]
    NonConvergence { iterations: usize },
}

// ============================================================================
// Optimizer
// ============================================================================

/// Solver parameters
#[derive(Debug, Clone)]
pub struct BudgetOptimizer {
    /// Floor for any single campaign's budget
    pub min_budget: f64,

    /// Ceiling for any single campaign, as a fraction of the pool
    pub max_fraction: f64,

    /// Weight λ of the evenness penalty
    pub evenness_penalty: f64,
}

impl BudgetOptimizer {
    /// Create an optimizer with the given constraint parameters
    pub fn new(min_budget: f64, max_fraction: f64, evenness_penalty: f64) -> Self {
        Self {
            min_budget,
            max_fraction,
            evenness_penalty,
        }
    }

    /// Build from budget configuration
    pub fn from_config(config: &crate::config::BudgetConfig) -> Self {
        Self::new(
            config.min_budget,
            config.max_allocation_fraction,
            config.evenness_penalty,
        )
    }

    /// Solve the reallocation for the given campaigns and pool size
    pub fn rebalance(
        &self,
        inputs: &[CampaignInput],
        total_budget: f64,
    ) -> Result<BudgetProposal, OptimizerError> {
        if inputs.is_empty() {
            return Err(OptimizerError::NoCampaigns);
        }
        if !total_budget.is_finite() || total_budget <= 0.0 {
            return Err(OptimizerError::InvalidTotal {
                total: total_budget,
            });
        }
        for input in inputs {
            if !input.score.is_finite() {
                return Err(OptimizerError::InvalidInput {
                    id: input.id,
                    detail: format!("score {} is not finite", input.score),
                });
            }
            if !input.current_budget.is_finite() || input.current_budget < 0.0 {
                return Err(OptimizerError::InvalidInput {
                    id: input.id,
                    detail: format!("budget {} is invalid", input.current_budget),
                });
            }
        }

        // A lone campaign simply receives the whole pool
        if inputs.len() == 1 {
            let input = &inputs[0];
            return Ok(BudgetProposal {
                allocations: vec![Allocation {
                    id: input.id,
                    current_budget: input.current_budget,
                    new_budget: total_budget,
                    score: input.score,
                }],
                objective: total_budget * input.score,
                iterations: 0,
            });
        }

        let n = inputs.len();
        let lo = self.min_budget;
        let hi = self.max_fraction * total_budget;

        if lo * n as f64 > total_budget {
            return Err(OptimizerError::InfeasibleBounds {
                detail: format!(
                    "min budget {lo} x {n} campaigns exceeds pool {total_budget}"
                ),
            });
        }
        if hi * (n as f64) < total_budget {
            return Err(OptimizerError::InfeasibleBounds {
                detail: format!(
                    "max allocation {hi} x {n} campaigns cannot absorb pool {total_budget}"
                ),
            });
        }

        let scores: Vec<f64> = inputs.iter().map(|i| i.score).collect();
        let currents: Vec<f64> = inputs.iter().map(|i| i.current_budget).collect();

        let (solution, objective, iterations) =
            self.solve(&currents, &scores, lo, hi, total_budget)?;

        let allocations = inputs
            .iter()
            .zip(solution)
            .map(|(input, new_budget)| Allocation {
                id: input.id,
                current_budget: input.current_budget,
                new_budget,
                score: input.score,
            })
            .collect();

        Ok(BudgetProposal {
            allocations,
            objective,
            iterations,
        })
    }

    /// Projected gradient ascent with backtracking
    fn solve(
        &self,
        currents: &[f64],
        scores: &[f64],
        lo: f64,
        hi: f64,
        total: f64,
    ) -> Result<(Vec<f64>, f64, usize), OptimizerError> {
        let lambda = self.evenness_penalty;
        let tolerance = total * 1e-7;

        // Warm start: the current allocation projected into the feasible set
        let mut x = project_onto_pool(currents, lo, hi, total);
        let mut best = self.objective(&x, scores);
        let mut step = total * 0.05;

        for iteration in 1..=MAX_ITERATIONS {
            let grad = self.gradient(&x, scores, lambda);
            let trial: Vec<f64> = x
                .iter()
                .zip(&grad)
                .map(|(xi, gi)| xi + step * gi)
                .collect();
            let candidate = project_onto_pool(&trial, lo, hi, total);
            let candidate_obj = self.objective(&candidate, scores);

            if candidate_obj > best + f64::EPSILON {
                let moved = x
                    .iter()
                    .zip(&candidate)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max);
                x = candidate;
                best = candidate_obj;

                if moved < tolerance {
                    return Ok((x, best, iteration));
                }
            } else {
                // No improvement along this step: shrink. A step that
                // collapses entirely means we are at the constrained optimum.
                step *= 0.5;
                if step < total * 1e-9 {
                    return Ok((x, best, iteration));
                }
            }
        }

        Err(OptimizerError::NonConvergence {
            iterations: MAX_ITERATIONS,
        })
    }

    /// Objective: Σ xᵢ·sᵢ − λ·stddev(x)
    fn objective(&self, x: &[f64], scores: &[f64]) -> f64 {
        let value: f64 = x.iter().zip(scores).map(|(xi, si)| xi * si).sum();
        value - self.evenness_penalty * spread(x)
    }

    /// Gradient of the objective
    fn gradient(&self, x: &[f64], scores: &[f64], lambda: f64) -> Vec<f64> {
        let n = x.len() as f64;
        let mean = x.iter().sum::<f64>() / n;
        let sd = spread(x);

        x.iter()
            .zip(scores)
            .map(|(xi, si)| {
                if sd > 1e-9 {
                    si - lambda * (xi - mean) / ((n - 1.0) * sd)
                } else {
                    *si
                }
            })
            .collect()
    }
}

/// Sample standard deviation of the allocation vector
fn spread(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return 0.0;
    }
    x.iter().std_dev()
}

/// Exact Euclidean projection onto `{ x : Σx = total, lo ≤ xᵢ ≤ hi }`.
///
/// Bisection on the uniform shift τ applied before clamping; the clamped
/// sum is monotone in τ, and feasibility of the bounds guarantees a root.
fn project_onto_pool(y: &[f64], lo: f64, hi: f64, total: f64) -> Vec<f64> {
    let y_max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let y_min = y.iter().cloned().fold(f64::INFINITY, f64::min);

    let mut tau_lo = lo - y_max;
    let mut tau_hi = hi - y_min;

    for _ in 0..100 {
        let mid = 0.5 * (tau_lo + tau_hi);
        let sum: f64 = y.iter().map(|v| (v + mid).clamp(lo, hi)).sum();
        if sum < total {
            tau_lo = mid;
        } else {
            tau_hi = mid;
        }
    }

    let tau = 0.5 * (tau_lo + tau_hi);
    y.iter().map(|v| (v + tau).clamp(lo, hi)).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn input(budget: f64, score: f64) -> CampaignInput {
        CampaignInput {
            id: Uuid::new_v4(),
            current_budget: budget,
            score,
        }
    }

    fn sum_of(proposal: &BudgetProposal) -> f64 {
        proposal.allocations.iter().map(|a| a.new_budget).sum()
    }

    #[test]
    fn test_high_scorer_gains_within_bounds() {
        let optimizer = BudgetOptimizer::new(100.0, 0.7, 0.2);
        let inputs = vec![input(500.0, 0.8), input(500.0, 0.2)];

        let proposal = optimizer.rebalance(&inputs, 1000.0).unwrap();

        let strong = &proposal.allocations[0];
        let weak = &proposal.allocations[1];

        assert!(strong.new_budget > weak.new_budget);
        assert!(strong.new_budget <= 700.0 + 1e-6);
        assert!(weak.new_budget >= 100.0 - 1e-6);
        assert!((sum_of(&proposal) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sum_and_bounds_always_hold() {
        let optimizer = BudgetOptimizer::new(50.0, 0.5, 0.2);
        let inputs = vec![
            input(100.0, 0.9),
            input(400.0, 0.55),
            input(250.0, 0.3),
            input(250.0, 0.71),
        ];

        let proposal = optimizer.rebalance(&inputs, 1000.0).unwrap();

        assert!((sum_of(&proposal) - 1000.0).abs() < 1e-6);
        for alloc in &proposal.allocations {
            assert!(alloc.new_budget >= 50.0 - 1e-6);
            assert!(alloc.new_budget <= 500.0 + 1e-6);
        }
    }

    #[test]
    fn test_single_campaign_takes_full_pool() {
        let optimizer = BudgetOptimizer::new(100.0, 0.5, 0.2);
        let inputs = vec![input(300.0, 0.4)];

        let proposal = optimizer.rebalance(&inputs, 1000.0).unwrap();
        assert_eq!(proposal.allocations.len(), 1);
        assert!((proposal.allocations[0].new_budget - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_equal_scores_split_near_evenly() {
        let optimizer = BudgetOptimizer::new(100.0, 0.7, 0.2);
        let inputs = vec![input(700.0, 0.5), input(200.0, 0.5), input(100.0, 0.5)];

        let proposal = optimizer.rebalance(&inputs, 1200.0).unwrap();

        // Evenness penalty pulls all-equal scores toward the mean split
        for alloc in &proposal.allocations {
            assert!(
                (alloc.new_budget - 400.0).abs() < 40.0,
                "allocation {} too far from even split",
                alloc.new_budget
            );
        }
        assert!((sum_of(&proposal) - 1200.0).abs() < 1e-6);
    }

    #[test]
    fn test_cold_start_scores_split_near_evenly() {
        let optimizer = BudgetOptimizer::new(100.0, 0.7, 0.2);
        // All cold-start campaigns carry the neutral 0.5 score
        let inputs = vec![input(0.0, 0.5), input(0.0, 0.5)];

        let proposal = optimizer.rebalance(&inputs, 1000.0).unwrap();
        for alloc in &proposal.allocations {
            assert!((alloc.new_budget - 500.0).abs() < 20.0);
        }
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let optimizer = BudgetOptimizer::new(100.0, 0.5, 0.2);
        assert!(matches!(
            optimizer.rebalance(&[], 1000.0),
            Err(OptimizerError::NoCampaigns)
        ));
    }

    #[test]
    fn test_infeasible_min_budget_rejected() {
        let optimizer = BudgetOptimizer::new(600.0, 0.9, 0.2);
        let inputs = vec![input(500.0, 0.5), input(500.0, 0.5)];

        assert!(matches!(
            optimizer.rebalance(&inputs, 1000.0),
            Err(OptimizerError::InfeasibleBounds { .. })
        ));
    }

    #[test]
    fn test_infeasible_max_fraction_rejected() {
        // Two campaigns capped at 40% each cannot absorb the pool
        let optimizer = BudgetOptimizer::new(10.0, 0.4, 0.2);
        let inputs = vec![input(500.0, 0.5), input(500.0, 0.5)];

        assert!(matches!(
            optimizer.rebalance(&inputs, 1000.0),
            Err(OptimizerError::InfeasibleBounds { .. })
        ));
    }

    #[test]
    fn test_non_finite_score_rejected() {
        let optimizer = BudgetOptimizer::new(100.0, 0.7, 0.2);
        let inputs = vec![input(500.0, f64::NAN), input(500.0, 0.5)];

        assert!(matches!(
            optimizer.rebalance(&inputs, 1000.0),
            Err(OptimizerError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_relative_change_gate_math() {
        let alloc = Allocation {
            id: Uuid::new_v4(),
            current_budget: 400.0,
            new_budget: 500.0,
            score: 0.5,
        };
        assert!((alloc.relative_change() - 0.25).abs() < 1e-9);

        let from_zero = Allocation {
            id: Uuid::new_v4(),
            current_budget: 0.0,
            new_budget: 100.0,
            score: 0.5,
        };
        assert!(from_zero.relative_change().is_infinite());
    }

    #[test]
    fn test_projection_preserves_sum_and_bounds() {
        let projected = project_onto_pool(&[900.0, 50.0, 50.0], 100.0, 500.0, 1000.0);
        let sum: f64 = projected.iter().sum();

        assert!((sum - 1000.0).abs() < 1e-6);
        for v in &projected {
            assert!(*v >= 100.0 - 1e-9 && *v <= 500.0 + 1e-9);
        }
    }
}
