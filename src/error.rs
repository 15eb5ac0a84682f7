//! Error types shared by the store, the command engine and the project
//! coordinator.
//!
//! Every failure is scoped to the command or project that produced it;
//! nothing in here is fatal to the process.

use thiserror::Error;

use crate::command::ActionKind;

/// Archive error type.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// SQLite error (rolls back the surrounding transaction)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The project's store connection was already closed
    #[error("store is closed")]
    StoreClosed,

    /// The project owning this command is closing or closed
    #[error("project is closed")]
    ProjectClosed,

    /// A row the operation depends on does not exist (anymore)
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The operation would break an Item/Photo/History invariant
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The action's payload does not fit the command it selects
    #[error("invalid payload for {kind:?}: {reason}")]
    InvalidPayload { kind: ActionKind, reason: String },

    /// Two commands were registered for the same action kind
    #[error("duplicate command registration for {0:?}")]
    DuplicateRegistration(ActionKind),

    /// No command is registered for the action kind
    #[error("no command registered for {0:?}")]
    Unregistered(ActionKind),

    /// A command or blocking store task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(String),

    /// An external collaborator (clipboard, plugin host, ...) failed
    #[error("{0}")]
    Collaborator(String),
}

impl ArchiveError {
    /// Helper for `NotFound` on items.
    pub fn item_not_found(id: i64) -> Self {
        ArchiveError::NotFound { entity: "item", id }
    }

    /// Whether this error reports a violated invariant (missing rows,
    /// stale history targets) rather than a failed write.
    pub fn is_invariant(&self) -> bool {
        matches!(self, ArchiveError::Invariant(_) | ArchiveError::NotFound { .. })
    }
}

impl From<tokio::task::JoinError> for ArchiveError {
    fn from(e: tokio::task::JoinError) -> Self {
        ArchiveError::Join(e.to_string())
    }
}

/// Result type alias using ArchiveError.
pub type Result<T> = std::result::Result<T, ArchiveError>;
