//! Worker bookkeeping for one epic execution
//!
//! A single listener task owns the [`WorkerTracker`] and is the only code
//! that mutates it. Observers get cloned snapshots.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::progress::WorkerInfo;
use crate::external::{OrchestratorEvent, OrchestratorEventType};

/// Aggregated view of the orchestrator's event stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerTracker {
    pub active: BTreeMap<String, WorkerInfo>,
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub escalations: Vec<String>,
    pub workers_running: u32,
    pub workers_blocked: u32,
    pub events_seen: usize,
}

impl WorkerTracker {
    pub fn apply(&mut self, event: &OrchestratorEvent) {
        self.events_seen += 1;
        self.workers_running = event.workers_running;
        self.workers_blocked = event.workers_blocked;

        match event.event_type {
            OrchestratorEventType::TaskStarted => {
                self.active.insert(
                    event.agent_id.clone(),
                    WorkerInfo {
                        task_id: event.task_id.clone(),
                        task_title: event.task_title.clone(),
                        current_action: event.current_action.clone(),
                    },
                );
            }
            OrchestratorEventType::AgentProgress => {
                let info = self.active.entry(event.agent_id.clone()).or_default();
                if !event.task_id.is_empty() {
                    info.task_id = event.task_id.clone();
                }
                if !event.task_title.is_empty() {
                    info.task_title = event.task_title.clone();
                }
                info.current_action = event.current_action.clone();
            }
            OrchestratorEventType::TaskCompleted => {
                self.active.remove(&event.agent_id);
                push_unique(&mut self.completed_tasks, &event.task_id);
            }
            OrchestratorEventType::TaskFailed => {
                self.active.remove(&event.agent_id);
                push_unique(&mut self.failed_tasks, &event.task_id);
            }
            OrchestratorEventType::TaskEscalation => {
                let note = if event.task_id.is_empty() {
                    event.message.clone()
                } else {
                    format!("{}: {}", event.task_id, event.message)
                };
                self.escalations.push(note);
            }
        }
    }
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !id.is_empty() && !list.iter().any(|t| t == id) {
        list.push(id.to_string());
    }
}

/// Drain `rx` to closure on a dedicated task
///
/// `on_event` sees a snapshot after each event is applied. The handle yields
/// the final tracker once every sender has been dropped.
pub fn spawn_listener<F>(mut rx: mpsc::Receiver<OrchestratorEvent>, on_event: F) -> JoinHandle<WorkerTracker>
where
    F: Fn(&OrchestratorEvent, WorkerTracker) + Send + 'static,
{
    tokio::spawn(async move {
        let mut tracker = WorkerTracker::default();
        while let Some(event) = rx.recv().await {
            debug!(event_type = %event.event_type, agent_id = %event.agent_id, task_id = %event.task_id, "listener: event");
            if event.event_type == OrchestratorEventType::TaskEscalation {
                warn!(task_id = %event.task_id, message = %event.message, "Task escalated");
            }
            tracker.apply(&event);
            on_event(&event, tracker.clone());
        }
        debug!(events = %tracker.events_seen, "listener: stream closed");
        tracker
    })
}
