//! One-shot actions applied to a selection of tasks.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Single task operation that an operator may run through `run_cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOperation {
    Submit,
    UpdateStatus,
    Recover,
    Kill,
    CheckCompleteness,
    ReloadStatus,
}

impl TaskOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::UpdateStatus => "update_status",
            Self::Recover => "recover",
            Self::Kill => "kill",
            Self::CheckCompleteness => "check_completeness",
            Self::ReloadStatus => "reload_status",
        }
    }
}

impl FromStr for TaskOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "submit" => Ok(Self::Submit),
            "update_status" => Ok(Self::UpdateStatus),
            "recover" => Ok(Self::Recover),
            "kill" => Ok(Self::Kill),
            "check_completeness" => Ok(Self::CheckCompleteness),
            "reload_status" => Ok(Self::ReloadStatus),
            other => Err(CoreError::UnknownAction(format!("run_cmd:{other}"))),
        }
    }
}

/// Action applied by the dispatcher to every selected task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Print task names.
    Print,
    /// Print the files each task still has to process.
    ListFilesToProcess,
    /// Check input file availability of failed tasks.
    CheckFailed,
    /// Send a kill request for every remote job.
    Kill,
    /// Delete the task work area and forget the task.
    Remove,
    /// Delete the final outputs of the task.
    RemoveFinalOutput,
    /// Run one task operation and persist the task afterwards.
    RunCommand(TaskOperation),
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(op) = s.strip_prefix("run_cmd") {
            let op = op.strip_prefix([':', ' ', '=']).unwrap_or(op);
            return op.parse().map(Self::RunCommand);
        }
        match s {
            "print" => Ok(Self::Print),
            "list_files_to_process" => Ok(Self::ListFilesToProcess),
            "check_failed" => Ok(Self::CheckFailed),
            "kill" => Ok(Self::Kill),
            "remove" => Ok(Self::Remove),
            "remove_final_output" => Ok(Self::RemoveFinalOutput),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Print => write!(f, "print"),
            Self::ListFilesToProcess => write!(f, "list_files_to_process"),
            Self::CheckFailed => write!(f, "check_failed"),
            Self::Kill => write!(f, "kill"),
            Self::Remove => write!(f, "remove"),
            Self::RemoveFinalOutput => write!(f, "remove_final_output"),
            Self::RunCommand(op) => write!(f, "run_cmd:{}", op.name()),
        }
    }
}
