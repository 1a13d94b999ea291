//! TaskGraph - durable epic/task dependency graph
//!
//! A project-scoped SQLite store holding the work produced by each planning
//! pass: epics, their child tasks, dependency edges between items, and the
//! session ledger used to resume an interrupted run.
//!
//! Completion is derived, not stored redundantly: an epic's progress is always
//! computed from the statuses of its child tasks, and a task's readiness from
//! the statuses of the items it depends on.

mod error;
mod item;
mod schema;
mod session;
mod store;

pub use error::{StoreError, StoreResult};
pub use item::{
    EpicOptions, Item, ItemStatus, ItemType, PRIORITY_HIGH, PRIORITY_MEDIUM, TaskOptions, generate_id,
};
pub use session::{Session, SessionStatus};
pub use store::GraphStore;
