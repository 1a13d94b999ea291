//! GapPlanner - turns one audit's gaps into a persisted epic

use std::sync::Arc;

use taskgraph::{EpicOptions, PRIORITY_HIGH, PRIORITY_MEDIUM, TaskOptions};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{PlanSink, Ranker, Ranking, order_gaps};
use crate::domain::{Gap, GapStatus};
use crate::state::StateError;

const FOUNDATION: &str = "Foundation";
const REFINEMENT: &str = "Refinement";

/// IDs written by one planning pass, tasks in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanResult {
    pub epic_id: String,
    pub task_ids: Vec<String>,
}

impl PlanResult {
    pub fn is_empty(&self) -> bool {
        self.epic_id.is_empty() && self.task_ids.is_empty()
    }
}

/// Persistence failed part way; `partial` holds whatever was written
#[derive(Debug, Error)]
#[error("planning stopped after {} of {planned} tasks: {source}", .partial.task_ids.len())]
pub struct PlanError {
    pub partial: PlanResult,
    pub planned: usize,
    pub source: StateError,
}

/// Planner-internal grouping; never persisted
#[derive(Debug, Clone)]
struct Phase {
    name: &'static str,
    gaps: Vec<Gap>,
    /// Indices of earlier phases this one waits on
    depends_on: Vec<usize>,
}

pub struct GapPlanner {
    sink: Arc<dyn PlanSink>,
    ranker: Option<Arc<dyn Ranker>>,
}

impl GapPlanner {
    pub fn new(sink: Arc<dyn PlanSink>) -> Self {
        Self { sink, ranker: None }
    }

    /// Consult `ranker` when ordering within a phase
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn with_optional_ranker(mut self, ranker: Option<Arc<dyn Ranker>>) -> Self {
        self.ranker = ranker;
        self
    }

    /// Persist `gaps` as one epic with ordered child tasks
    ///
    /// Empty input writes nothing and returns an empty result. On a write
    /// failure the returned error carries the IDs created so far.
    pub async fn plan(&self, gaps: &[Gap]) -> Result<PlanResult, PlanError> {
        debug!(gap_count = %gaps.len(), "plan: called");
        if gaps.is_empty() {
            debug!("plan: no gaps, nothing to do");
            return Ok(PlanResult::default());
        }

        let ranking = self.ranking(gaps).await;
        let phases = build_phases(gaps, &ranking);

        let mut result = PlanResult::default();
        let fail = |result: &PlanResult, source: StateError| PlanError {
            partial: result.clone(),
            planned: gaps.len(),
            source,
        };

        let missing = count(gaps, GapStatus::Missing);
        let partial = count(gaps, GapStatus::Partial);
        let epic_priority = if missing > 0 { PRIORITY_HIGH } else { PRIORITY_MEDIUM };
        let epic_options = EpicOptions::default()
            .with_description(epic_description(&phases))
            .with_priority(epic_priority);

        let epic_id = self
            .sink
            .create_epic(&epic_title(missing, partial), epic_options)
            .await
            .map_err(|e| fail(&result, e))?;
        result.epic_id = epic_id;

        let mut last_task: Vec<Option<String>> = vec![None; phases.len()];
        for (phase_idx, phase) in phases.iter().enumerate() {
            for (gap_idx, gap) in phase.gaps.iter().enumerate() {
                let mut options = TaskOptions::default()
                    .with_parent(&result.epic_id)
                    .with_priority(gap.status.priority())
                    .with_description(task_description(gap));

                if gap_idx == 0 {
                    for dep in &phase.depends_on {
                        if let Some(Some(id)) = last_task.get(*dep) {
                            options = options.depends_on(id);
                        }
                    }
                }

                let task_id = self
                    .sink
                    .create_task(&task_title(gap), options)
                    .await
                    .map_err(|e| fail(&result, e))?;
                debug!(%task_id, phase = %phase.name, feature_id = %gap.feature_id, "plan: task created");
                last_task[phase_idx] = Some(task_id.clone());
                result.task_ids.push(task_id);
            }
        }

        info!(epic_id = %result.epic_id, tasks = %result.task_ids.len(), "Planned epic");
        Ok(result)
    }

    async fn ranking(&self, gaps: &[Gap]) -> Ranking {
        let Some(ranker) = &self.ranker else {
            return Ranking::new();
        };
        match ranker.rank(gaps).await {
            Ok(ranking) => ranking,
            Err(e) => {
                warn!(error = %e, "ranking: oracle failed, ordering without it");
                Ranking::new()
            }
        }
    }
}

fn count(gaps: &[Gap], status: GapStatus) -> usize {
    gaps.iter().filter(|g| g.status == status).count()
}

fn build_phases(gaps: &[Gap], ranking: &Ranking) -> Vec<Phase> {
    let (mut missing, mut partial): (Vec<Gap>, Vec<Gap>) =
        gaps.iter().cloned().partition(|g| g.status == GapStatus::Missing);
    order_gaps(&mut missing, ranking);
    order_gaps(&mut partial, ranking);

    let mut phases = Vec::new();
    if !missing.is_empty() {
        phases.push(Phase {
            name: FOUNDATION,
            gaps: missing,
            depends_on: Vec::new(),
        });
    }
    if !partial.is_empty() {
        let depends_on = if phases.is_empty() { Vec::new() } else { vec![0] };
        phases.push(Phase {
            name: REFINEMENT,
            gaps: partial,
            depends_on,
        });
    }
    phases
}

fn epic_title(missing: usize, partial: usize) -> String {
    match (missing, partial) {
        (m, 0) => format!("Implement {} missing features", m),
        (0, p) => format!("Refine {} partial features", p),
        (m, p) => format!("Implement {} missing and refine {} partial features", m, p),
    }
}

fn epic_description(phases: &[Phase]) -> String {
    let mut out = String::new();
    for (idx, phase) in phases.iter().enumerate() {
        out.push_str(&format!("Phase {}: {} ({} gaps)", idx + 1, phase.name, phase.gaps.len()));
        let deps: Vec<&str> = phase.depends_on.iter().map(|d| phases[*d].name).collect();
        if !deps.is_empty() {
            out.push_str(&format!(", after {}", deps.join(", ")));
        }
        out.push('\n');
        for gap in &phase.gaps {
            out.push_str(&format!("  - {} [{}]: {}\n", gap.feature_id, gap.status, gap.description));
        }
    }
    out.trim_end().to_string()
}

fn task_title(gap: &Gap) -> String {
    let verb = match gap.status {
        GapStatus::Missing => "Implement",
        GapStatus::Partial => "Refine",
    };
    format!("{} {}", verb, gap.feature_id)
}

fn task_description(gap: &Gap) -> String {
    if gap.suggested_action.is_empty() {
        gap.description.clone()
    } else {
        format!("{}\n\nSuggested action: {}", gap.description, gap.suggested_action)
    }
}
