//! Progress events streamed to the registered callback

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loop phase a progress event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Parsing,
    Auditing,
    Planning,
    Executing,
    RoundComplete,
    Complete,
    Stopped,
    Warning,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parsing => write!(f, "parsing"),
            Self::Auditing => write!(f, "auditing"),
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::RoundComplete => write!(f, "round_complete"),
            Self::Complete => write!(f, "complete"),
            Self::Stopped => write!(f, "stopped"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// What one worker is doing right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub task_id: String,
    pub task_title: String,
    pub current_action: String,
}

/// Snapshot of loop state at a phase transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub iteration: u32,
    pub max_iterations: u32,
    pub features_complete: usize,
    pub features_total: usize,
    pub gaps_found: usize,
    pub tasks_created: usize,
    pub tasks_completed: usize,
    pub epic_id: String,
    /// Cumulative cost
    pub cost: f64,
    pub cost_budget: f64,
    pub workers_running: u32,
    pub workers_blocked: u32,
    /// Agent ID to current work
    pub active_workers: BTreeMap<String, WorkerInfo>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, iteration: u32) -> Self {
        Self {
            phase,
            iteration,
            max_iterations: 0,
            features_complete: 0,
            features_total: 0,
            gaps_found: 0,
            tasks_created: 0,
            tasks_completed: 0,
            epic_id: String::new(),
            cost: 0.0,
            cost_budget: 0.0,
            workers_running: 0,
            workers_blocked: 0,
            active_workers: BTreeMap::new(),
            message: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// The single outward progress surface
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
