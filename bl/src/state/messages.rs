//! State manager messages
//!
//! Commands and responses for the actor pattern.

use taskgraph::{EpicOptions, Item, ItemStatus, Session, SessionStatus, StoreError, TaskOptions};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::Store(e) if e.is_not_found())
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

type Reply<T> = oneshot::Sender<StateResponse<T>>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Item writes
    CreateEpic {
        title: String,
        options: EpicOptions,
        reply: Reply<String>,
    },
    CreateTask {
        title: String,
        options: TaskOptions,
        reply: Reply<String>,
    },
    AddDependency {
        item_id: String,
        depends_on_id: String,
        reply: Reply<()>,
    },
    UpdateStatus {
        id: String,
        status: ItemStatus,
        reply: Reply<()>,
    },
    Reopen {
        id: String,
        reply: Reply<()>,
    },
    DeleteItem {
        id: String,
        reply: Reply<()>,
    },
    UpdateEpicStatusIfComplete {
        epic_id: String,
        reply: Reply<bool>,
    },
    CancelEpic {
        epic_id: String,
        reply: Reply<bool>,
    },

    // Item reads
    GetItem {
        id: String,
        reply: Reply<Option<Item>>,
    },
    Dependencies {
        item_id: String,
        reply: Reply<Vec<String>>,
    },
    ListTasks {
        epic_id: String,
        reply: Reply<Vec<Item>>,
    },
    ReadyTasks {
        epic_id: Option<String>,
        reply: Reply<Vec<Item>>,
    },
    IncompleteTasks {
        epic_id: Option<String>,
        reply: Reply<Vec<Item>>,
    },
    ActiveEpics {
        reply: Reply<Vec<Item>>,
    },
    ComputeEpicProgress {
        epic_id: String,
        reply: Reply<(u32, u32)>,
    },

    // Session ledger
    CreateSession {
        arch_doc: String,
        checkpoint_path: Option<String>,
        reply: Reply<Session>,
    },
    UpdateSessionProgress {
        id: String,
        iteration: u32,
        total_cost: f64,
        reply: Reply<()>,
    },
    SetSessionStatus {
        id: String,
        status: SessionStatus,
        reply: Reply<()>,
    },
    GetSession {
        id: String,
        reply: Reply<Option<Session>>,
    },
    LatestActiveSession {
        arch_doc: String,
        reply: Reply<Option<Session>>,
    },

    // Shutdown
    Shutdown,
}
