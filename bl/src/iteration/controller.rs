//! IterationController - the assess, plan, execute loop
//!
//! Rounds run strictly in sequence. Execution is delegated to an external
//! orchestrator whose event stream is drained by a single listener task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskgraph::{ItemStatus, SessionStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cost::{CostTracker, HeuristicCostEstimator};
use super::error::ControllerError;
use super::progress::{ProgressCallback, ProgressEvent, ProgressPhase};
use super::workers::{WorkerTracker, spawn_listener};
use crate::checkpoint::{self, Checkpoint};
use crate::domain::Gap;
use crate::external::{CodeAuditor, DocumentParser, Orchestrator};
use crate::planner::GapPlanner;
use crate::state::{ResumePoint, StateManager};
use crate::stop::{StopConfig, StopEvaluator, StopReason};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub reason: StopReason,
    /// Last round executed
    pub iterations: u32,
    pub total_cost: f64,
    pub completion_pct: f64,
    pub session_id: String,
    /// Epics planned during this run
    pub epics: Vec<String>,
}

/// Counters carried into each progress event
#[derive(Debug, Clone, Default)]
struct RoundStats {
    iteration: u32,
    features_complete: usize,
    features_total: usize,
    gaps_found: usize,
    tasks_created: usize,
    tasks_completed: usize,
    epic_id: String,
    cost: f64,
}

pub struct IterationController {
    stop: StopEvaluator,
    parser: Arc<dyn DocumentParser>,
    auditor: Arc<dyn CodeAuditor>,
    planner: GapPlanner,
    orchestrator: Arc<dyn Orchestrator>,
    state: StateManager,
    cost: Arc<dyn CostTracker>,
    checkpoint_path: Option<PathBuf>,
    on_progress: Option<ProgressCallback>,
    resume: ResumePoint,
}

impl IterationController {
    /// All required collaborators are taken here; the builders below add extras
    pub fn new(
        config: StopConfig,
        parser: Arc<dyn DocumentParser>,
        auditor: Arc<dyn CodeAuditor>,
        planner: GapPlanner,
        orchestrator: Arc<dyn Orchestrator>,
        state: StateManager,
    ) -> Self {
        debug!(?config, "IterationController::new: called");
        Self {
            stop: StopEvaluator::new(config),
            parser,
            auditor,
            planner,
            orchestrator,
            state,
            cost: Arc::new(HeuristicCostEstimator::default()),
            checkpoint_path: None,
            on_progress: None,
            resume: ResumePoint::default(),
        }
    }

    pub fn with_cost_tracker(mut self, cost: Arc<dyn CostTracker>) -> Self {
        self.cost = cost;
        self
    }

    /// Export a checkpoint to `path` at every round boundary
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Continue numbering and cost from an earlier run
    pub fn resume_from(mut self, point: ResumePoint) -> Self {
        self.resume = point;
        self
    }

    fn emit(&self, phase: ProgressPhase, stats: &RoundStats, message: impl Into<String>) {
        let Some(callback) = &self.on_progress else {
            return;
        };
        callback(self.event(phase, stats, message.into()));
    }

    fn event(&self, phase: ProgressPhase, stats: &RoundStats, message: String) -> ProgressEvent {
        let config = self.stop.config();
        let mut event = ProgressEvent::new(phase, stats.iteration);
        event.max_iterations = config.max_iterations;
        event.cost_budget = config.budget_limit;
        event.features_complete = stats.features_complete;
        event.features_total = stats.features_total;
        event.gaps_found = stats.gaps_found;
        event.tasks_created = stats.tasks_created;
        event.tasks_completed = stats.tasks_completed;
        event.epic_id = stats.epic_id.clone();
        event.cost = stats.cost;
        event.message = message;
        event
    }

    /// Drive rounds until completion, a stop condition or a fatal error
    pub async fn run(
        &mut self,
        doc_path: &Path,
        repo_path: &Path,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ControllerError> {
        debug!(doc_path = %doc_path.display(), repo_path = %repo_path.display(), "run: called");
        self.stop.reset();

        let start_iteration = self.resume.iteration;
        let arch_doc = doc_path.to_string_lossy().into_owned();
        let session_id = self
            .open_session(&arch_doc)
            .await
            .map_err(|source| ControllerError::State {
                iteration: start_iteration + 1,
                source,
            })?;

        let result = self.run_rounds(doc_path, repo_path, &cancel, &session_id).await;

        let final_status = match &result {
            Ok(outcome) if outcome.reason == StopReason::Complete => SessionStatus::Complete,
            Ok(_) => SessionStatus::Stopped,
            Err(e) if e.is_cancelled() => SessionStatus::Stopped,
            Err(_) => SessionStatus::Failed,
        };
        if let Err(e) = self.state.set_session_status(&session_id, final_status).await {
            warn!(%session_id, error = %e, "run: failed to record final session status");
        }

        match &result {
            Ok(outcome) => info!(
                reason = %outcome.reason,
                iterations = %outcome.iterations,
                total_cost = %outcome.total_cost,
                "Run finished"
            ),
            Err(e) => warn!(error = %e, "Run aborted"),
        }
        result
    }

    async fn open_session(&self, arch_doc: &str) -> Result<String, crate::state::StateError> {
        if let Some(id) = &self.resume.session_id {
            info!(session_id = %id, iteration = %self.resume.iteration, "Resuming session");
            self.state.set_session_status(id, SessionStatus::Running).await?;
            return Ok(id.clone());
        }
        let checkpoint_path = self.checkpoint_path.as_ref().map(|p| p.to_string_lossy().into_owned());
        let session = self.state.create_session(arch_doc, checkpoint_path.as_deref()).await?;
        Ok(session.id)
    }

    async fn run_rounds(
        &mut self,
        doc_path: &Path,
        repo_path: &Path,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<RunOutcome, ControllerError> {
        let base_cost = self.resume.total_cost.max(0.0);
        // The tracker may carry spend from an earlier run on this controller
        let cost_offset = base_cost - self.cost.total_cost();
        let mut cumulative_cost = base_cost;
        let mut completed_tasks = self.resume.completed_tasks.clone();
        let answers = self.resume.answers.clone();
        let pending = &self.resume.pending_gaps;
        let mut previous_gaps = (!pending.is_empty()).then_some(pending.len());
        let mut open_epics: Vec<String> = self.resume.active_epics.iter().map(|e| e.id.clone()).collect();
        let mut epics = Vec::new();
        let mut iteration = self.resume.iteration;

        loop {
            iteration += 1;
            let round_start_cost = cumulative_cost;
            let mut stats = RoundStats {
                iteration,
                cost: cumulative_cost,
                ..Default::default()
            };

            if cancel.is_cancelled() {
                return Err(ControllerError::Cancelled { iteration });
            }

            // Parse
            self.emit(ProgressPhase::Parsing, &stats, format!("Parsing {}", doc_path.display()));
            let document = tokio::fs::read_to_string(doc_path)
                .await
                .map_err(|e| ControllerError::Parse {
                    iteration,
                    error: eyre::Report::new(e).wrap_err(format!("Failed to read {}", doc_path.display())),
                })?;
            let spec = self
                .parser
                .parse(&document)
                .await
                .map_err(|error| ControllerError::Parse { iteration, error })?;

            // Audit
            stats.features_total = spec.features.len();
            self.emit(
                ProgressPhase::Auditing,
                &stats,
                format!("Auditing {} features", stats.features_total),
            );
            let report = self
                .auditor
                .audit(&spec, repo_path)
                .await
                .map_err(|error| ControllerError::Audit { iteration, error })?;

            stats.gaps_found = report.gaps.len();
            stats.features_complete = report.completed_features();
            let completion_pct = report.completion_pct(stats.features_total);
            let progress_made = previous_gaps.is_none_or(|prev| stats.gaps_found < prev);
            previous_gaps = Some(stats.gaps_found);

            cumulative_cost = cumulative_cost.max(cost_offset + self.cost.total_cost());
            stats.cost = cumulative_cost;

            let (reason, should_stop) = self.stop.check(iteration, cumulative_cost, completion_pct, progress_made);
            debug!(%iteration, gaps = %stats.gaps_found, %completion_pct, %progress_made, %reason, "run_rounds: stop check");
            if should_stop {
                return self
                    .finish(
                        reason,
                        &stats,
                        completion_pct,
                        session_id,
                        epics,
                        &open_epics,
                        Checkpoint {
                            iteration,
                            completed_tasks,
                            pending_gaps: report.gaps,
                            answers,
                        },
                    )
                    .await;
            }

            if stats.gaps_found > 0 {
                let epic_id = self
                    .plan_and_execute(&report.gaps, &mut stats, &mut completed_tasks, &mut open_epics, cost_offset)
                    .await?;
                epics.push(epic_id);
                cumulative_cost = cumulative_cost.max(cost_offset + self.cost.total_cost());
                stats.cost = cumulative_cost;
            }

            // Round boundary
            let round_cost = (cumulative_cost - round_start_cost).max(0.0);
            let cp = Checkpoint {
                iteration,
                completed_tasks: completed_tasks.clone(),
                pending_gaps: report.gaps.clone(),
                answers: answers.clone(),
            };
            self.save_checkpoint(&cp)?;
            self.state
                .update_session_progress(session_id, iteration, cumulative_cost)
                .await
                .map_err(|source| ControllerError::State { iteration, source })?;
            self.emit(
                ProgressPhase::RoundComplete,
                &stats,
                format!(
                    "Round {} complete: {} gaps, round cost {:.2}",
                    iteration, stats.gaps_found, round_cost
                ),
            );

            if stats.gaps_found == 0 {
                return self
                    .finish(StopReason::Complete, &stats, completion_pct, session_id, epics, &open_epics, cp)
                    .await;
            }
        }
    }

    /// Plan the gaps into an epic and run it; returns the epic ID
    ///
    /// The new epic covers every current gap, so epics still open from
    /// earlier rounds or runs are canceled before it executes.
    async fn plan_and_execute(
        &self,
        gaps: &[Gap],
        stats: &mut RoundStats,
        completed_tasks: &mut Vec<String>,
        open_epics: &mut Vec<String>,
        cost_offset: f64,
    ) -> Result<String, ControllerError> {
        let iteration = stats.iteration;
        let state_err = |source| ControllerError::State { iteration, source };

        self.emit(ProgressPhase::Planning, stats, format!("Planning {} gaps", gaps.len()));
        let plan = self
            .planner
            .plan(gaps)
            .await
            .map_err(|source| ControllerError::Plan { iteration, source })?;
        self.cost.record_planned(gaps);
        stats.tasks_created = plan.task_ids.len();
        stats.epic_id = plan.epic_id.clone();
        stats.cost = stats.cost.max(cost_offset + self.cost.total_cost());

        self.cancel_epics(open_epics, iteration).await?;
        open_epics.clear();

        self.state
            .update_status(&plan.epic_id, ItemStatus::InProgress)
            .await
            .map_err(state_err)?;

        self.emit(ProgressPhase::Executing, stats, format!("Executing epic {}", plan.epic_id));
        let tracker = self.execute(&plan.epic_id, stats, cost_offset).await;
        if !tracker.failed_tasks.is_empty() || !tracker.escalations.is_empty() {
            warn!(
                epic_id = %plan.epic_id,
                failed = ?tracker.failed_tasks,
                escalations = ?tracker.escalations,
                "Epic execution left failed or escalated tasks"
            );
        }

        for task in &tracker.completed_tasks {
            if !completed_tasks.contains(task) {
                completed_tasks.push(task.clone());
            }
        }

        let (done, _total) = self
            .state
            .compute_epic_progress(&plan.epic_id)
            .await
            .map_err(state_err)?;
        stats.tasks_completed = done as usize;
        if self
            .state
            .update_epic_status_if_complete(&plan.epic_id)
            .await
            .map_err(state_err)?
        {
            info!(epic_id = %plan.epic_id, "Epic completed");
        } else {
            open_epics.push(plan.epic_id.clone());
        }

        Ok(plan.epic_id)
    }

    async fn cancel_epics(&self, epic_ids: &[String], iteration: u32) -> Result<(), ControllerError> {
        for epic_id in epic_ids {
            let canceled = self
                .state
                .cancel_epic(epic_id)
                .await
                .map_err(|source| ControllerError::State { iteration, source })?;
            if canceled {
                info!(%epic_id, "Superseded epic canceled");
            }
        }
        Ok(())
    }

    /// Run the orchestrator and drain its events; failures only warn
    async fn execute(&self, epic_id: &str, stats: &RoundStats, cost_offset: f64) -> WorkerTracker {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let template = self.event(ProgressPhase::Executing, stats, String::new());
        let callback = self.on_progress.clone();
        let cost = self.cost.clone();
        let floor = stats.cost;
        let listener = spawn_listener(rx, move |event, snapshot| {
            cost.record_execution(event.cost);
            let Some(callback) = &callback else {
                return;
            };
            let mut progress = template.clone();
            progress.timestamp = chrono::Utc::now();
            progress.cost = floor.max(cost_offset + cost.total_cost());
            progress.workers_running = snapshot.workers_running;
            progress.workers_blocked = snapshot.workers_blocked;
            progress.tasks_completed = snapshot.completed_tasks.len();
            progress.active_workers = snapshot.active;
            progress.message = if event.message.is_empty() {
                format!("{} {}", event.event_type, event.task_id)
            } else {
                event.message.clone()
            };
            callback(progress);
        });

        let run_result = self.orchestrator.run(epic_id, tx).await;

        // The stream must be fully drained before execution counts as finished
        let tracker = match listener.await {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(error = %e, "execute: event listener failed");
                WorkerTracker::default()
            }
        };

        if let Err(e) = run_result {
            warn!(%epic_id, error = %e, "execute: orchestrator failed, continuing");
            let mut warn_stats = stats.clone();
            warn_stats.tasks_completed = tracker.completed_tasks.len();
            warn_stats.cost = floor.max(cost_offset + self.cost.total_cost());
            self.emit(ProgressPhase::Warning, &warn_stats, format!("Execution of {} failed: {}", epic_id, e));
        }

        tracker
    }

    fn save_checkpoint(&self, cp: &Checkpoint) -> Result<(), ControllerError> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };
        checkpoint::save(cp, path).map_err(|source| ControllerError::Checkpoint {
            iteration: cp.iteration,
            source,
        })
    }

    async fn finish(
        &self,
        reason: StopReason,
        stats: &RoundStats,
        completion_pct: f64,
        session_id: &str,
        epics: Vec<String>,
        open_epics: &[String],
        cp: Checkpoint,
    ) -> Result<RunOutcome, ControllerError> {
        let iteration = stats.iteration;
        self.state
            .update_session_progress(session_id, iteration, stats.cost)
            .await
            .map_err(|source| ControllerError::State { iteration, source })?;

        if reason == StopReason::Complete {
            // Nothing left for unfinished epics to do
            self.cancel_epics(open_epics, iteration).await?;
            if let Some(path) = &self.checkpoint_path {
                checkpoint::delete(path).map_err(|source| ControllerError::Checkpoint { iteration, source })?;
            }
            self.emit(ProgressPhase::Complete, stats, "All features complete");
        } else {
            self.save_checkpoint(&cp)?;
            self.emit(ProgressPhase::Stopped, stats, format!("Stopped: {}", reason));
        }

        Ok(RunOutcome {
            reason,
            iterations: iteration,
            total_cost: stats.cost,
            completion_pct,
            session_id: session_id.to_string(),
            epics,
        })
    }
}
