//! Controller errors

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::planner::PlanError;
use crate::state::StateError;

/// Fatal run errors; each names the round it happened in
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("parse failed: {error} (iteration {iteration})")]
    Parse { iteration: u32, error: eyre::Report },

    #[error("audit failed: {error} (iteration {iteration})")]
    Audit { iteration: u32, error: eyre::Report },

    #[error("plan failed: {source} (iteration {iteration})")]
    Plan {
        iteration: u32,
        #[source]
        source: PlanError,
    },

    #[error("cancelled (iteration {iteration})")]
    Cancelled { iteration: u32 },

    #[error("state update failed: {source} (iteration {iteration})")]
    State {
        iteration: u32,
        #[source]
        source: StateError,
    },

    #[error("checkpoint failed: {source} (iteration {iteration})")]
    Checkpoint {
        iteration: u32,
        #[source]
        source: CheckpointError,
    },
}

impl ControllerError {
    /// Round the error happened in
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Parse { iteration, .. }
            | Self::Audit { iteration, .. }
            | Self::Plan { iteration, .. }
            | Self::Cancelled { iteration }
            | Self::State { iteration, .. }
            | Self::Checkpoint { iteration, .. } => *iteration,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_iteration() {
        let err = ControllerError::Parse {
            iteration: 3,
            error: eyre::eyre!("bad heading"),
        };
        assert_eq!(err.to_string(), "parse failed: bad heading (iteration 3)");
        assert_eq!(err.iteration(), 3);

        let err = ControllerError::Cancelled { iteration: 7 };
        assert_eq!(err.to_string(), "cancelled (iteration 7)");
        assert!(err.is_cancelled());
    }
}
