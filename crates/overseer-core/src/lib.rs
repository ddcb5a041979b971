//! Grid Task Overseer Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Subprocesses
//! - The work-area layout on disk
//! - Runtime specifics
//!
//! The [`GridTask`] trait is the contract between the overseer and a single
//! remote task.

pub mod action;
pub mod error;
pub mod ids;
pub mod selection;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use action::{Action, TaskOperation};
pub use error::{CoreError, TaskError};
pub use ids::{JobId, TaskName};
pub use selection::{Comparison, TaskSelection};
pub use status::{JobStatus, TaskStatus};
pub use task::{
    DetailKind, FileStats, GridTask, JobStat, StepOutcome, TaskDefinition, TaskOutput,
};
