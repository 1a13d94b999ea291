//! Gap planning
//!
//! Converts an unordered gap set into ordered phases and persists them as one
//! epic with child tasks and phase-entry dependency edges.

use async_trait::async_trait;
use taskgraph::{EpicOptions, TaskOptions};

mod gap_planner;
mod ordering;
mod ranker;

pub use gap_planner::{GapPlanner, PlanError, PlanResult};
pub use ordering::{milestone, order_gaps};
pub use ranker::{HeuristicRanker, LlmRanker, RankError, Ranker, RankerKind, Ranking, create_ranker};

use crate::state::StateResponse;

/// Destination for planned items
#[async_trait]
pub trait PlanSink: Send + Sync {
    async fn create_epic(&self, title: &str, options: EpicOptions) -> StateResponse<String>;

    async fn create_task(&self, title: &str, options: TaskOptions) -> StateResponse<String>;
}
