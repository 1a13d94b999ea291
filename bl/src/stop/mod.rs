//! Stop condition evaluation
//!
//! `StopEvaluator` decides after each audit whether the loop should keep
//! going. It performs no I/O; its only state is the no-progress counter.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Thresholds for stopping a run; 0 disables a threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    #[serde(rename = "budget-limit")]
    pub budget_limit: f64,

    /// Consecutive rounds without a drop in gap count before giving up
    #[serde(rename = "no-progress-limit")]
    pub no_progress_limit: u32,
}

/// Why the loop stopped (or `None` to continue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    None,
    Complete,
    MaxIterations,
    BudgetExceeded,
    Converged,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Complete => write!(f, "complete"),
            Self::MaxIterations => write!(f, "max_iterations"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::Converged => write!(f, "converged"),
        }
    }
}

/// Stateful stop-condition decision function
#[derive(Debug, Clone)]
pub struct StopEvaluator {
    config: StopConfig,
    no_progress_count: u32,
}

impl StopEvaluator {
    pub fn new(config: StopConfig) -> Self {
        debug!(?config, "StopEvaluator::new: called");
        Self {
            config,
            no_progress_count: 0,
        }
    }

    pub fn config(&self) -> &StopConfig {
        &self.config
    }

    /// Consecutive checks that reported no progress
    pub fn no_progress_count(&self) -> u32 {
        self.no_progress_count
    }

    /// Evaluate the stop conditions for one round
    ///
    /// First match wins: complete, max iterations, budget, convergence.
    pub fn check(
        &mut self,
        iteration: u32,
        cumulative_cost: f64,
        completion_pct: f64,
        progress_made: bool,
    ) -> (StopReason, bool) {
        if progress_made {
            self.no_progress_count = 0;
        } else {
            self.no_progress_count += 1;
        }
        debug!(
            iteration,
            cumulative_cost,
            completion_pct,
            progress_made,
            no_progress_count = self.no_progress_count,
            "StopEvaluator::check: called"
        );

        if completion_pct >= 100.0 {
            return (StopReason::Complete, true);
        }

        if self.config.max_iterations > 0 && iteration >= self.config.max_iterations {
            return (StopReason::MaxIterations, true);
        }

        if self.config.budget_limit > 0.0 && cumulative_cost >= self.config.budget_limit {
            return (StopReason::BudgetExceeded, true);
        }

        if self.config.no_progress_limit > 0 && self.no_progress_count >= self.config.no_progress_limit {
            return (StopReason::Converged, true);
        }

        (StopReason::None, false)
    }

    /// Zero all internal counters for reuse in an independent run
    pub fn reset(&mut self) {
        debug!("StopEvaluator::reset: called");
        self.no_progress_count = 0;
    }
}
