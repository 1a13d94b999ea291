//! Store error types

use thiserror::Error;

/// Errors from task graph store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required field was empty or otherwise unusable
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced row does not exist in this project
    #[error("Not found: {0}")]
    NotFound(String),

    /// A status string outside the closed status set
    #[error("Invalid status: '{0}'. Expected one of: open, in_progress, done, blocked, canceled")]
    InvalidStatus(String),

    /// A status change the item state machine does not allow
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// A task's parent is not an epic
    #[error("Invalid parent {0}: only epics may parent tasks")]
    InvalidParent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Check if this error is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Check if this error was raised at the call boundary before any write
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_)
                | StoreError::InvalidStatus(_)
                | StoreError::InvalidTransition { .. }
                | StoreError::InvalidParent(_)
        )
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
