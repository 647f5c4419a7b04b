use thiserror::Error;

use crate::id::Id;

/// Error type for userland task code.
pub use anyhow::Error as TaskError;

/// Result returned by a single executed task.
pub type TaskResult<T> = anyhow::Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum SmelterError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Error at the serialization boundary:\n{0}")]
    Serial(#[from] SerialError),
}

/// Structural violations in the virtual filesystem graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("file '{0}' is not present in the filesystem")]
    UnknownFile(Id),

    #[error("directory '{0}' is not present in the filesystem")]
    UnknownDirectory(Id),
}

/// Errors raised by task-facing context queries.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("parent file '{0}' is not part of this step's input snapshot")]
    ParentNotVisible(Id),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors surfaced while encoding or decoding at the wire boundary.
///
/// A decode error means the run never starts.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("task '{0}' has no registered implementation")]
    UnknownTask(String),

    #[error("identifier '{0}' appears more than once on the wire")]
    DuplicateId(Id),

    #[error("directory '{0}' references file '{1}' which is not part of any derivation tree")]
    DanglingFile(Id, Id),
}
