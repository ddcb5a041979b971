//! Overseer errors.

use std::path::PathBuf;

use thiserror::Error;

use overseer_core::{CoreError, TaskError};

/// Errors raised by the overseer engine.
#[derive(Debug, Error)]
pub enum OverseerError {
    /// A precondition for running the overseer is not met.
    #[error("{0}")]
    Precondition(String),

    /// Overseer configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command could not be run or failed.
    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    /// Copying to the remote publication destination failed.
    #[error("Failed to publish '{file}' to '{dest}': {reason}")]
    Publication {
        file: PathBuf,
        dest: String,
        reason: String,
    },

    /// Task error.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Core domain error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias for the engine.
pub type Result<T> = std::result::Result<T, OverseerError>;
