//! BuildLoop - iterative build-to-spec orchestration core
//!
//! Each round parses a specification document, audits a codebase against it,
//! turns the unmet features into an epic of dependency-linked tasks, hands the
//! epic to an external orchestrator and decides whether to go again.
//!
//! # Modules
//!
//! - [`iteration`] - The round loop, cost tracking and worker bookkeeping
//! - [`stop`] - Stop conditions (completion, iterations, budget, convergence)
//! - [`planner`] - Gap ordering, ranking oracles and epic/task creation
//! - [`state`] - Actor owning the task graph store, plus resumption
//! - [`checkpoint`] - File export of in-flight loop state
//! - [`cache`] - Bounded parse-result cache
//! - [`external`] - Parser, auditor and orchestrator contracts
//! - [`llm`] - LLM client used by the ranking oracle
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cache;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod domain;
pub mod external;
pub mod iteration;
pub mod llm;
pub mod planner;
pub mod state;
pub mod stop;

// Re-export commonly used types
pub use config::{Config, LlmConfig};
pub use domain::{Feature, FeatureAudit, FeatureStatus, Gap, GapReport, GapStatus, Spec};
pub use external::{CodeAuditor, DocumentParser, Orchestrator, OrchestratorEvent, OrchestratorEventType};
pub use iteration::{ControllerError, IterationController, ProgressEvent, ProgressPhase, RunOutcome};
pub use planner::{GapPlanner, PlanError, PlanResult};
pub use state::{StateError, StateManager};
pub use stop::{StopConfig, StopEvaluator, StopReason};
