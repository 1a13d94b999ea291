//! Contracts for the external collaborators the loop drives
//!
//! The core never parses documents, audits code or edits files itself. It
//! calls out through these traits and consumes what comes back.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{GapReport, Spec};

/// Turns a specification document into structured features
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse the raw document content
    async fn parse(&self, document: &str) -> eyre::Result<Spec>;
}

/// Compares a parsed spec against the code under `repo_path`
#[async_trait]
pub trait CodeAuditor: Send + Sync {
    async fn audit(&self, spec: &Spec, repo_path: &Path) -> eyre::Result<GapReport>;
}

/// Executes the tasks of an epic with its own pool of workers
///
/// Implementations stream events into `events` while running. The sender is
/// dropped when `run` returns, which closes the stream for the listener.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, epic_id: &str, events: mpsc::Sender<OrchestratorEvent>) -> eyre::Result<()>;
}

/// Kind of worker pool event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorEventType {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    AgentProgress,
    TaskEscalation,
}

impl std::fmt::Display for OrchestratorEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskStarted => write!(f, "task_started"),
            Self::TaskCompleted => write!(f, "task_completed"),
            Self::TaskFailed => write!(f, "task_failed"),
            Self::AgentProgress => write!(f, "agent_progress"),
            Self::TaskEscalation => write!(f, "task_escalation"),
        }
    }
}

/// Event emitted by the external worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    #[serde(rename = "type")]
    pub event_type: OrchestratorEventType,
    pub agent_id: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub task_title: String,
    /// Cost incurred by this step (not cumulative)
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub workers_running: u32,
    #[serde(default)]
    pub workers_blocked: u32,
    #[serde(default)]
    pub current_action: String,
    #[serde(default)]
    pub message: String,
}

impl OrchestratorEvent {
    pub fn new(event_type: OrchestratorEventType, agent_id: impl Into<String>) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            task_id: String::new(),
            task_title: String::new(),
            cost: 0.0,
            workers_running: 0,
            workers_blocked: 0,
            current_action: String::new(),
            message: String::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>, task_title: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self.task_title = task_title.into();
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_workers(mut self, running: u32, blocked: u32) -> Self {
        self.workers_running = running;
        self.workers_blocked = blocked;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.current_action = action.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
