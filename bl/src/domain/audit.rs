//! Audit outcomes and gaps

use serde::{Deserialize, Serialize};
use taskgraph::{PRIORITY_HIGH, PRIORITY_MEDIUM};

/// Audit verdict for a single feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureStatus {
    Complete,
    Partial,
    Missing,
}

impl FeatureStatus {
    /// The gap status this verdict produces, if any
    pub fn gap_status(&self) -> Option<GapStatus> {
        match self {
            Self::Complete => None,
            Self::Partial => Some(GapStatus::Partial),
            Self::Missing => Some(GapStatus::Missing),
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Missing => write!(f, "MISSING"),
        }
    }
}

/// Status of an unmet requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapStatus {
    Missing,
    Partial,
}

impl GapStatus {
    /// Task priority derived from this gap status
    pub fn priority(&self) -> i32 {
        match self {
            Self::Missing => PRIORITY_HIGH,
            Self::Partial => PRIORITY_MEDIUM,
        }
    }
}

impl std::fmt::Display for GapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "MISSING"),
            Self::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// A feature found missing or partially implemented during one audit pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub feature_id: String,
    pub status: GapStatus,
    pub description: String,
    #[serde(default)]
    pub suggested_action: String,
}

impl Gap {
    pub fn new(feature_id: impl Into<String>, status: GapStatus, description: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            status,
            description: description.into(),
            suggested_action: String::new(),
        }
    }

    pub fn missing(feature_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(feature_id, GapStatus::Missing, description)
    }

    pub fn partial(feature_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(feature_id, GapStatus::Partial, description)
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = action.into();
        self
    }
}

/// Per-feature audit result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAudit {
    pub feature: String,
    pub status: FeatureStatus,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Full output of one audit pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub features: Vec<FeatureAudit>,
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub summary: String,
}

impl GapReport {
    /// Number of features the auditor judged complete
    pub fn completed_features(&self) -> usize {
        self.features
            .iter()
            .filter(|f| f.status == FeatureStatus::Complete)
            .count()
    }

    /// Percentage of complete features out of `total_features`
    ///
    /// A document with no features has nothing left to do and reports 100.
    pub fn completion_pct(&self, total_features: usize) -> f64 {
        if total_features == 0 {
            return 100.0;
        }
        self.completed_features() as f64 * 100.0 / total_features as f64
    }
}
