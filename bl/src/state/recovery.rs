//! Resumption after a restart
//!
//! The session ledger decides where a run continues. The checkpoint file, if
//! readable, contributes the pending gaps and operator answers.

use std::collections::BTreeMap;
use std::path::Path;

use taskgraph::Item;
use tracing::{debug, info, warn};

use super::{StateError, StateManager};
use crate::checkpoint::{self, CheckpointError};
use crate::domain::Gap;

/// Where a run for a document should continue from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumePoint {
    /// Resumable session to keep writing to
    pub session_id: Option<String>,
    /// Last completed iteration; the next round is `iteration + 1`
    pub iteration: u32,
    pub total_cost: f64,
    pub completed_tasks: Vec<String>,
    pub pending_gaps: Vec<Gap>,
    pub answers: BTreeMap<String, String>,
    /// Open or in-progress epics left by earlier runs
    pub active_epics: Vec<Item>,
}

impl ResumePoint {
    /// Nothing to resume
    pub fn is_fresh(&self) -> bool {
        self.session_id.is_none() && self.iteration == 0
    }
}

/// Compute the resume point for `arch_doc`
pub async fn resume_point(
    state: &StateManager,
    arch_doc: &str,
    checkpoint_path: Option<&Path>,
) -> Result<ResumePoint, StateError> {
    debug!(%arch_doc, ?checkpoint_path, "resume_point: called");

    let session = state.latest_active_session(arch_doc).await?;
    let active_epics = state.active_epics().await?;

    let checkpoint = match checkpoint_path.map(checkpoint::load) {
        Some(Ok(cp)) => Some(cp),
        Some(Err(CheckpointError::NotFound(_))) | None => None,
        Some(Err(e)) => {
            warn!(error = %e, "resume_point: ignoring unreadable checkpoint");
            None
        }
    };

    let mut point = ResumePoint {
        active_epics,
        ..Default::default()
    };

    if let Some(session) = &session {
        point.session_id = Some(session.id.clone());
        point.iteration = session.iteration;
        point.total_cost = session.total_cost;
    }

    if let Some(cp) = checkpoint {
        match &session {
            Some(s) if s.iteration != cp.iteration => {
                warn!(
                    session_iteration = %s.iteration,
                    checkpoint_iteration = %cp.iteration,
                    "resume_point: checkpoint disagrees with session ledger, using ledger"
                );
            }
            None => point.iteration = cp.iteration,
            _ => {}
        }
        point.completed_tasks = cp.completed_tasks;
        point.pending_gaps = cp.pending_gaps;
        point.answers = cp.answers;
    }

    info!(
        session_id = ?point.session_id,
        iteration = %point.iteration,
        active_epics = %point.active_epics.len(),
        "Computed resume point"
    );
    Ok(point)
}
