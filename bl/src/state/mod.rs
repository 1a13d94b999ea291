//! State management with actor pattern
//!
//! StateManager owns the GraphStore and processes commands via channels, so
//! the controller, planner and CLI share one serialized writer.

mod manager;
mod messages;
mod recovery;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use recovery::{ResumePoint, resume_point};
