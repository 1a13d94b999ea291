//! Run session ledger rows
//!
//! A session is the canonical crash-recovery record for one autonomous run
//! against one architecture document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Complete,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether a run in this state can be picked up again
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A session ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// Path of the architecture document driving the run
    pub arch_doc: String,

    /// Last fully completed iteration (0 before the first round ends)
    pub iteration: u32,

    /// Cumulative cost at the last round boundary
    pub total_cost: f64,

    pub status: SessionStatus,

    /// Optional checkpoint export location
    pub checkpoint_path: Option<String>,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
