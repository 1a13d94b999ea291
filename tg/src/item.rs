//! Item domain types: epics, tasks and their status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Priority for items derived from a MISSING gap
pub const PRIORITY_HIGH: i32 = 1;

/// Priority for items derived from a PARTIAL gap
pub const PRIORITY_MEDIUM: i32 = 2;

/// Generate a type-prefixed item ID
///
/// Format: `{type}-{uuid-v7-hex}`. The v7 UUID keeps IDs time-ordered and unique
/// across processes sharing one database.
pub fn generate_id(item_type: ItemType) -> String {
    let uuid = uuid::Uuid::now_v7();
    format!("{}-{}", item_type, uuid.simple())
}

/// Kind of item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Epic,
    Task,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => write!(f, "epic"),
            Self::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epic" => Ok(Self::Epic),
            "task" => Ok(Self::Task),
            other => Err(StoreError::Corrupt(format!("unknown item type '{}'", other))),
        }
    }
}

/// Item status
///
/// Closed state machine: `open -> in_progress -> {done, blocked, canceled}`.
/// `open` is reachable again from any state through an explicit reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Open,
    InProgress,
    Done,
    Blocked,
    Canceled,
}

impl ItemStatus {
    /// All status values, in state machine order
    pub const ALL: [ItemStatus; 5] = [
        ItemStatus::Open,
        ItemStatus::InProgress,
        ItemStatus::Done,
        ItemStatus::Blocked,
        ItemStatus::Canceled,
    ];

    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Canceled => "canceled",
        }
    }

    /// Whether a plain status update may move an item from `self` to `next`
    ///
    /// Writing the current status again is always allowed. Moving back to
    /// `open` is not a plain update; it goes through reopen.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        debug!(from = %self, to = %next, "ItemStatus::can_transition_to: called");
        if *self == next {
            return true;
        }
        match (self, next) {
            (Self::Open, Self::InProgress) => true,
            (Self::InProgress, Self::Done | Self::Blocked | Self::Canceled) => true,
            _ => false,
        }
    }

    /// Terminal for the purpose of incomplete-work queries
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            "canceled" => Ok(Self::Canceled),
            other => {
                debug!(status = %other, "ItemStatus::from_str: rejected");
                Err(StoreError::InvalidStatus(other.to_string()))
            }
        }
    }
}

/// A persisted epic or task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Type-prefixed unique identifier
    pub id: String,

    /// Project scope
    pub project: String,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    pub title: String,

    pub description: String,

    pub status: ItemStatus,

    /// 1 = high, 2 = medium
    pub priority: i32,

    /// Parent epic (tasks only)
    pub parent_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn is_epic(&self) -> bool {
        self.item_type == ItemType::Epic
    }

    pub fn is_task(&self) -> bool {
        self.item_type == ItemType::Task
    }
}

/// Options for creating an epic
#[derive(Debug, Clone, Default)]
pub struct EpicOptions {
    pub description: String,
    pub priority: Option<i32>,
}

impl EpicOptions {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Options for creating a task
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub description: String,
    pub priority: Option<i32>,
    /// Parent epic ID
    pub parent_id: Option<String>,
    /// Items this task depends on; all must already exist
    pub depends_on: Vec<String>,
}

impl TaskOptions {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn depends_on(mut self, item_id: impl Into<String>) -> Self {
        self.depends_on.push(item_id.into());
        self
    }
}
