//! Cost tracking

use std::sync::Mutex;

use tracing::debug;

use crate::config::LoopConfig;
use crate::domain::{Gap, GapStatus};

/// Source of the cumulative spend for a run
pub trait CostTracker: Send + Sync {
    /// Spend recorded so far by this tracker
    fn total_cost(&self) -> f64;

    /// Called once per planning pass with the gaps that were planned
    fn record_planned(&self, gaps: &[Gap]);

    /// Called with the per-step cost of each orchestrator event
    fn record_execution(&self, cost: f64);
}

/// Charges a flat rate per planned gap plus whatever workers report
#[derive(Debug)]
pub struct HeuristicCostEstimator {
    per_missing: f64,
    per_partial: f64,
    total: Mutex<f64>,
}

impl HeuristicCostEstimator {
    pub fn new(per_missing: f64, per_partial: f64) -> Self {
        Self {
            per_missing: per_missing.max(0.0),
            per_partial: per_partial.max(0.0),
            total: Mutex::new(0.0),
        }
    }

    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.cost_per_missing_gap, config.cost_per_partial_gap)
    }

    fn add(&self, amount: f64) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let mut total = self.total.lock().unwrap_or_else(|p| p.into_inner());
        *total += amount;
    }
}

impl Default for HeuristicCostEstimator {
    fn default() -> Self {
        Self::from_config(&LoopConfig::default())
    }
}

impl CostTracker for HeuristicCostEstimator {
    fn total_cost(&self) -> f64 {
        *self.total.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record_planned(&self, gaps: &[Gap]) {
        let estimate: f64 = gaps
            .iter()
            .map(|g| match g.status {
                GapStatus::Missing => self.per_missing,
                GapStatus::Partial => self.per_partial,
            })
            .sum();
        debug!(gap_count = %gaps.len(), %estimate, "record_planned: called");
        self.add(estimate);
    }

    fn record_execution(&self, cost: f64) {
        self.add(cost);
    }
}
