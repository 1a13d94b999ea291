//! Integration tests for IterationController
//!
//! The parser, auditor and orchestrator are scripted mocks; the task graph is
//! a real in-memory store behind the StateManager.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use buildloop::checkpoint;
use buildloop::domain::{Feature, FeatureAudit, FeatureStatus, Gap, GapReport, Spec};
use buildloop::external::{CodeAuditor, DocumentParser, Orchestrator, OrchestratorEvent, OrchestratorEventType};
use buildloop::iteration::{
    ControllerError, HeuristicCostEstimator, IterationController, ProgressCallback, ProgressEvent, ProgressPhase,
};
use buildloop::planner::GapPlanner;
use buildloop::state::{StateManager, resume_point};
use buildloop::stop::{StopConfig, StopReason};
use taskgraph::{GraphStore, ItemStatus, SessionStatus};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Mocks
// =============================================================================

struct StaticParser {
    fail: bool,
}

#[async_trait]
impl DocumentParser for StaticParser {
    async fn parse(&self, _document: &str) -> eyre::Result<Spec> {
        if self.fail {
            return Err(eyre::eyre!("unparseable heading"));
        }
        Ok(Spec {
            name: "demo".to_string(),
            features: vec![Feature::new("F1", "Login"), Feature::new("F2", "API"), Feature::new("F3", "Storage")],
        })
    }
}

/// Returns scripted reports in order, repeating the last one
struct ScriptedAuditor {
    reports: Mutex<VecDeque<eyre::Result<GapReport>>>,
    last: Mutex<Option<GapReport>>,
}

impl ScriptedAuditor {
    fn new(reports: Vec<eyre::Result<GapReport>>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CodeAuditor for ScriptedAuditor {
    async fn audit(&self, _spec: &Spec, _repo_path: &Path) -> eyre::Result<GapReport> {
        let next = self.reports.lock().unwrap().pop_front();
        match next {
            Some(Ok(report)) => {
                *self.last.lock().unwrap() = Some(report.clone());
                Ok(report)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| eyre::eyre!("no report scripted")),
        }
    }
}

/// Works through every task of the epic and reports events
struct CompletingOrchestrator {
    state: StateManager,
}

#[async_trait]
impl Orchestrator for CompletingOrchestrator {
    async fn run(&self, epic_id: &str, events: mpsc::Sender<OrchestratorEvent>) -> eyre::Result<()> {
        let tasks = self.state.list_tasks(epic_id).await?;
        for (i, task) in tasks.iter().enumerate() {
            let agent = format!("agent-{}", i);
            self.state.update_status(&task.id, ItemStatus::InProgress).await?;
            events
                .send(
                    OrchestratorEvent::new(OrchestratorEventType::TaskStarted, &agent)
                        .with_task(&task.id, &task.title)
                        .with_workers(1, 0),
                )
                .await?;
            self.state.update_status(&task.id, ItemStatus::Done).await?;
            events
                .send(
                    OrchestratorEvent::new(OrchestratorEventType::TaskCompleted, &agent)
                        .with_task(&task.id, &task.title)
                        .with_cost(0.1),
                )
                .await?;
        }
        Ok(())
    }
}

/// Starts one task and then gives up
struct FailingOrchestrator;

#[async_trait]
impl Orchestrator for FailingOrchestrator {
    async fn run(&self, _epic_id: &str, events: mpsc::Sender<OrchestratorEvent>) -> eyre::Result<()> {
        events
            .send(OrchestratorEvent::new(OrchestratorEventType::TaskStarted, "agent-0").with_workers(1, 0))
            .await?;
        Err(eyre::eyre!("worker pool crashed"))
    }
}

/// Does nothing
struct IdleOrchestrator;

#[async_trait]
impl Orchestrator for IdleOrchestrator {
    async fn run(&self, _epic_id: &str, _events: mpsc::Sender<OrchestratorEvent>) -> eyre::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn report(statuses: &[(&str, FeatureStatus)]) -> GapReport {
    let features = statuses
        .iter()
        .map(|(id, status)| FeatureAudit {
            feature: id.to_string(),
            status: *status,
            evidence: vec![],
            reasoning: String::new(),
        })
        .collect();
    let gaps = statuses
        .iter()
        .filter_map(|(id, status)| {
            status
                .gap_status()
                .map(|gs| Gap::new(*id, gs, format!("{} needs work", id)))
        })
        .collect();
    GapReport {
        features,
        gaps,
        summary: String::new(),
    }
}

fn unfinished() -> GapReport {
    report(&[
        ("F1", FeatureStatus::Missing),
        ("F2", FeatureStatus::Partial),
        ("F3", FeatureStatus::Complete),
    ])
}

fn finished() -> GapReport {
    report(&[
        ("F1", FeatureStatus::Complete),
        ("F2", FeatureStatus::Complete),
        ("F3", FeatureStatus::Complete),
    ])
}

struct Harness {
    _dir: TempDir,
    doc: PathBuf,
    repo: PathBuf,
    checkpoint: PathBuf,
    state: StateManager,
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let doc = dir.path().join("ARCH.md");
        std::fs::write(&doc, "# Demo\n").unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        Self {
            doc,
            repo,
            checkpoint: dir.path().join("state").join("checkpoint.json"),
            state: StateManager::spawn(GraphStore::open_in_memory("demo").unwrap()),
            events: Arc::new(Mutex::new(Vec::new())),
            _dir: dir,
        }
    }

    fn callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |event: ProgressEvent| events.lock().unwrap().push(event))
    }

    fn controller(
        &self,
        config: StopConfig,
        parser: StaticParser,
        auditor: ScriptedAuditor,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> IterationController {
        IterationController::new(
            config,
            Arc::new(parser),
            Arc::new(auditor),
            GapPlanner::new(Arc::new(self.state.clone())),
            orchestrator,
            self.state.clone(),
        )
        .with_cost_tracker(Arc::new(HeuristicCostEstimator::new(1.0, 0.5)))
        .with_checkpoint_path(&self.checkpoint)
        .on_progress(self.callback())
    }

    fn phases(&self) -> Vec<ProgressPhase> {
        self.events.lock().unwrap().iter().map(|e| e.phase).collect()
    }
}

fn limits(max_iterations: u32, budget_limit: f64, no_progress_limit: u32) -> StopConfig {
    StopConfig {
        max_iterations,
        budget_limit,
        no_progress_limit,
    }
}

// =============================================================================
// Runs that end normally
// =============================================================================

#[tokio::test]
async fn test_run_completes_after_work_is_executed() {
    let h = Harness::new();
    let orchestrator = Arc::new(CompletingOrchestrator { state: h.state.clone() });
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished()), Ok(finished())]),
        orchestrator,
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Complete);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.completion_pct, 100.0);
    assert_eq!(outcome.epics.len(), 1);
    // 1.0 (missing) + 0.5 (partial) estimated, 2 x 0.1 reported by workers
    assert!((outcome.total_cost - 1.7).abs() < 1e-9, "cost {}", outcome.total_cost);

    let epic = h.state.get_item(&outcome.epics[0]).await.unwrap().unwrap();
    assert_eq!(epic.status, ItemStatus::Done);

    let session = h.state.get_session(&outcome.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.iteration, 2);
    assert!(!h.checkpoint.exists());

    let phases = h.phases();
    for phase in [
        ProgressPhase::Parsing,
        ProgressPhase::Auditing,
        ProgressPhase::Planning,
        ProgressPhase::Executing,
        ProgressPhase::RoundComplete,
        ProgressPhase::Complete,
    ] {
        assert!(phases.contains(&phase), "missing {:?} in {:?}", phase, phases);
    }
    assert_eq!(phases.last(), Some(&ProgressPhase::Complete));
}

#[tokio::test]
async fn test_execution_events_carry_worker_counts_and_monotone_cost() {
    let h = Harness::new();
    let orchestrator = Arc::new(CompletingOrchestrator { state: h.state.clone() });
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished()), Ok(finished())]),
        orchestrator,
    );
    controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();

    let events = h.events.lock().unwrap();
    let executing: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| e.phase == ProgressPhase::Executing && e.workers_running > 0)
        .collect();
    assert!(!executing.is_empty());
    assert!(executing.iter().any(|e| !e.active_workers.is_empty()));

    let mut last = 0.0;
    for event in events.iter() {
        assert!(event.cost >= last, "cost went from {} to {}", last, event.cost);
        last = event.cost;
        assert_eq!(event.max_iterations, 10);
    }
}

#[tokio::test]
async fn test_max_iterations_stops_and_keeps_checkpoint() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(2, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::MaxIterations);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.epics.len(), 1);

    let session = h.state.get_session(&outcome.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);

    let cp = checkpoint::load(&h.checkpoint).unwrap();
    assert_eq!(cp.iteration, 2);
    assert_eq!(cp.pending_gaps.len(), 2);
    assert_eq!(h.phases().last(), Some(&ProgressPhase::Stopped));
}

#[tokio::test]
async fn test_no_progress_converges() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(0, 0.0, 2),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::Converged);
    // Round 1 sets the baseline; rounds 2 and 3 make no progress
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.epics.len(), 2);
}

#[tokio::test]
async fn test_budget_exceeded() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(0, 1.5, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::BudgetExceeded);
    assert_eq!(outcome.iterations, 2);
    assert!(outcome.total_cost >= 1.5);
}

#[tokio::test]
async fn test_orchestrator_failure_is_a_warning() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished()), Ok(finished())]),
        Arc::new(FailingOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::Complete);

    let events = h.events.lock().unwrap();
    let warning = events
        .iter()
        .find(|e| e.phase == ProgressPhase::Warning)
        .expect("warning event");
    assert!(warning.message.contains("worker pool crashed"));
    assert_eq!(warning.iteration, 1);
}

/// Gaps cleared while one feature is still only partially done
fn gaps_cleared_below_full_completion() -> GapReport {
    let mut report = report(&[
        ("F1", FeatureStatus::Partial),
        ("F2", FeatureStatus::Complete),
        ("F3", FeatureStatus::Complete),
    ]);
    report.gaps.clear();
    report
}

#[tokio::test]
async fn test_zero_gaps_complete_below_full_completion() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(gaps_cleared_below_full_completion())]),
        Arc::new(IdleOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::Complete);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.completion_pct < 100.0);
    assert!(outcome.epics.is_empty());
    assert!(!h.checkpoint.exists());
    assert!(!h.phases().contains(&ProgressPhase::Planning));
}

#[tokio::test]
async fn test_stop_check_runs_before_zero_gap_completion() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(1, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(gaps_cleared_below_full_completion())]),
        Arc::new(IdleOrchestrator),
    );

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::MaxIterations);
    assert_eq!(outcome.iterations, 1);

    let cp = checkpoint::load(&h.checkpoint).unwrap();
    assert_eq!(cp.iteration, 1);
    assert!(cp.pending_gaps.is_empty());
    assert_eq!(h.phases().last(), Some(&ProgressPhase::Stopped));
}

#[tokio::test]
async fn test_second_run_reports_only_its_own_cost() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(2, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let first = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    let second = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();

    assert!((first.total_cost - 1.5).abs() < 1e-9, "cost {}", first.total_cost);
    assert!((second.total_cost - 1.5).abs() < 1e-9, "cost {}", second.total_cost);
    assert_ne!(first.session_id, second.session_id);

    let session = h.state.get_session(&second.session_id).await.unwrap().unwrap();
    assert!((session.total_cost - 1.5).abs() < 1e-9);
}

// =============================================================================
// Fatal errors
// =============================================================================

#[tokio::test]
async fn test_parse_error_is_fatal_with_iteration() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: true },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let err = controller
        .run(&h.doc, &h.repo, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Parse { iteration: 1, .. }));
    assert!(err.to_string().ends_with("(iteration 1)"));

    let session = h.state.latest_active_session(&h.doc.to_string_lossy()).await.unwrap();
    assert!(session.is_none(), "failed session must not be resumable");
}

#[tokio::test]
async fn test_audit_error_in_second_round() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished()), Err(eyre::eyre!("auditor offline"))]),
        Arc::new(IdleOrchestrator),
    );

    let err = controller
        .run(&h.doc, &h.repo, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.iteration(), 2);
    assert_eq!(err.to_string(), "audit failed: auditor offline (iteration 2)");
}

#[tokio::test]
async fn test_missing_document_is_a_parse_error() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let missing = h.repo.join("NOPE.md");
    let err = controller
        .run(&missing, &h.repo, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Parse { iteration: 1, .. }));
}

#[tokio::test]
async fn test_cancellation_before_round() {
    let h = Harness::new();
    let mut controller = h.controller(
        limits(10, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = controller.run(&h.doc, &h.repo, cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.iteration(), 1);

    // A cancelled run stays resumable
    let session = h.state.latest_active_session(&h.doc.to_string_lossy()).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
}

// =============================================================================
// Resumption
// =============================================================================

#[tokio::test]
async fn test_resume_continues_numbering_and_cost() {
    let h = Harness::new();
    let arch_doc = h.doc.to_string_lossy().into_owned();
    let earlier = h.state.create_session(&arch_doc, None).await.unwrap();
    h.state.update_session_progress(&earlier.id, 3, 2.0).await.unwrap();
    h.state
        .set_session_status(&earlier.id, SessionStatus::Stopped)
        .await
        .unwrap();

    let point = resume_point(&h.state, &arch_doc, Some(&h.checkpoint)).await.unwrap();
    assert_eq!(point.iteration, 3);

    let mut controller = h
        .controller(
            limits(10, 0.0, 0),
            StaticParser { fail: false },
            ScriptedAuditor::new(vec![Ok(finished())]),
            Arc::new(IdleOrchestrator),
        )
        .resume_from(point);

    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::Complete);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.session_id, earlier.id);
    assert!(outcome.total_cost >= 2.0);

    let first = h.events.lock().unwrap()[0].clone();
    assert_eq!(first.iteration, 4);
    assert_eq!(first.cost, 2.0);
}

/// Runs two idle rounds and stops, leaving an in-progress epic and a checkpoint
async fn interrupted_run(h: &Harness) -> String {
    let mut controller = h.controller(
        limits(2, 0.0, 0),
        StaticParser { fail: false },
        ScriptedAuditor::new(vec![Ok(unfinished())]),
        Arc::new(IdleOrchestrator),
    );
    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::MaxIterations);
    assert_eq!(outcome.epics.len(), 1);
    outcome.epics[0].clone()
}

#[tokio::test]
async fn test_resume_replaces_earlier_epic() {
    let h = Harness::new();
    let earlier_epic = interrupted_run(&h).await;
    let arch_doc = h.doc.to_string_lossy().into_owned();

    let point = resume_point(&h.state, &arch_doc, Some(&h.checkpoint)).await.unwrap();
    assert_eq!(point.iteration, 2);
    assert_eq!(point.active_epics.len(), 1);

    let mut controller = h
        .controller(
            limits(4, 0.0, 0),
            StaticParser { fail: false },
            ScriptedAuditor::new(vec![Ok(unfinished())]),
            Arc::new(IdleOrchestrator),
        )
        .resume_from(point);
    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::MaxIterations);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.epics.len(), 1);

    let active: Vec<String> = h.state.active_epics().await.unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(active, outcome.epics);

    let earlier = h.state.get_item(&earlier_epic).await.unwrap().unwrap();
    assert_eq!(earlier.status, ItemStatus::Canceled);
    let tasks = h.state.list_tasks(&earlier_epic).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == ItemStatus::Canceled));
}

#[tokio::test]
async fn test_resumed_completion_cancels_leftover_epic() {
    let h = Harness::new();
    let earlier_epic = interrupted_run(&h).await;
    let arch_doc = h.doc.to_string_lossy().into_owned();
    let point = resume_point(&h.state, &arch_doc, Some(&h.checkpoint)).await.unwrap();

    let mut controller = h
        .controller(
            limits(10, 0.0, 0),
            StaticParser { fail: false },
            ScriptedAuditor::new(vec![Ok(finished())]),
            Arc::new(IdleOrchestrator),
        )
        .resume_from(point);
    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.reason, StopReason::Complete);
    assert_eq!(outcome.iterations, 3);

    assert!(h.state.active_epics().await.unwrap().is_empty());
    let earlier = h.state.get_item(&earlier_epic).await.unwrap().unwrap();
    assert_eq!(earlier.status, ItemStatus::Canceled);
}

#[tokio::test]
async fn test_resume_measures_progress_against_pending_gaps() {
    let h = Harness::new();
    interrupted_run(&h).await;
    let arch_doc = h.doc.to_string_lossy().into_owned();
    let point = resume_point(&h.state, &arch_doc, Some(&h.checkpoint)).await.unwrap();
    assert_eq!(point.pending_gaps.len(), 2);

    let mut controller = h
        .controller(
            limits(0, 0.0, 1),
            StaticParser { fail: false },
            ScriptedAuditor::new(vec![Ok(unfinished())]),
            Arc::new(IdleOrchestrator),
        )
        .resume_from(point);
    let outcome = controller.run(&h.doc, &h.repo, CancellationToken::new()).await.unwrap();

    // The same two gaps as before the interruption count as no progress
    assert_eq!(outcome.reason, StopReason::Converged);
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.epics.is_empty());
}
