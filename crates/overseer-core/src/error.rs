//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the overseer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Duplicate task name in a collection.
    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    /// Task selection expression could not be parsed.
    #[error("Invalid task selection '{expr}': {reason}")]
    InvalidSelection { expr: String, reason: String },

    /// Action name is not one of the supported actions.
    #[error("Unknown action = \"{0}\"")]
    UnknownAction(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors raised by a task while talking to the remote service or its own
/// persisted state.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The remote submission service rejected or failed a request.
    #[error("{task}: remote request '{operation}' failed: {reason}")]
    Remote {
        task: String,
        operation: String,
        reason: String,
    },

    /// Task configuration is incomplete or inconsistent.
    #[error("{task}: invalid configuration: {reason}")]
    InvalidConfig { task: String, reason: String },

    /// Persisted task state could not be read or written.
    #[error("{task}: I/O error: {source}")]
    Io {
        task: String,
        #[source]
        source: std::io::Error,
    },

    /// Persisted task state could not be (de)serialized.
    #[error("{task}: serialization error: {reason}")]
    Serialization { task: String, reason: String },
}
