//! Status enums for tasks and their remote jobs.
//!
//! Both enums are ordered by their lifecycle ordinal, not alphabetically.
//! The ordinal is significant: the lifecycle driver compares statuses
//! numerically to decide which operations apply to a task.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of a task in the overseer lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Remote status could not be parsed. Never corrected automatically.
    Unknown,
    /// Task created but not yet submitted.
    #[default]
    Defined,
    /// Input data is being recalled from tape before jobs can start.
    TapeRecall,
    /// Jobs are running on the remote service.
    InProgress,
    /// Remote task needs a recovery submission.
    WaitingForRecovery,
    /// All remote work has finished.
    CrabFinished,
    /// Local post-processing has completed.
    PostProcessingFinished,
    /// Task failed and requires manual intervention.
    Failed,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Unknown,
        TaskStatus::Defined,
        TaskStatus::TapeRecall,
        TaskStatus::InProgress,
        TaskStatus::WaitingForRecovery,
        TaskStatus::CrabFinished,
        TaskStatus::PostProcessingFinished,
        TaskStatus::Failed,
    ];

    /// Lifecycle ordinal.
    pub fn value(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Defined => 0,
            Self::TapeRecall => 1,
            Self::InProgress => 2,
            Self::WaitingForRecovery => 3,
            Self::CrabFinished => 4,
            Self::PostProcessingFinished => 5,
            Self::Failed => 6,
        }
    }

    /// Returns true while the remote part of the task is still in flight.
    pub fn is_in_flight(&self) -> bool {
        self.value() < Self::CrabFinished.value()
    }

    /// Returns true if the overseer has nothing left to do for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PostProcessingFinished | Self::Failed)
    }

    /// Status name as used in reports and the published snapshot.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Defined => "Defined",
            Self::TapeRecall => "TapeRecall",
            Self::InProgress => "InProgress",
            Self::WaitingForRecovery => "WaitingForRecovery",
            Self::CrabFinished => "CrabFinished",
            Self::PostProcessingFinished => "PostProcessingFinished",
            Self::Failed => "Failed",
        }
    }
}

impl PartialOrd for TaskStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown task status '{s}'")))
    }
}

/// State of a single remote job (execution unit) inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Unsubmitted,
    Idle,
    Running,
    Finished,
    Failed,
    Transferring,
    ToRetry,
    Cooloff,
    Held,
    Killed,
    Unknown,
}

impl JobStatus {
    /// Lifecycle ordinal.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Job state name as used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unsubmitted => "unsubmitted",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Transferring => "transferring",
            Self::ToRetry => "toRetry",
            Self::Cooloff => "cooloff",
            Self::Held => "held",
            Self::Killed => "killed",
            Self::Unknown => "unknown",
        }
    }
}

impl PartialOrd for JobStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_are_not_in_flight() {
        assert!(!TaskStatus::Failed.is_in_flight());
        assert!(!TaskStatus::PostProcessingFinished.is_in_flight());
        assert!(!TaskStatus::CrabFinished.is_in_flight());
        assert!(TaskStatus::Unknown.is_in_flight());
        assert!(TaskStatus::WaitingForRecovery.is_in_flight());
    }

    #[test]
    fn test_status_ordering_follows_lifecycle() {
        let mut statuses = vec![
            TaskStatus::Failed,
            TaskStatus::Defined,
            TaskStatus::CrabFinished,
            TaskStatus::Unknown,
            TaskStatus::InProgress,
        ];
        statuses.sort();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Unknown,
                TaskStatus::Defined,
                TaskStatus::InProgress,
                TaskStatus::CrabFinished,
                TaskStatus::Failed,
            ]
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("inprogress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!("Bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_job_status_serde_names() {
        let json = serde_json::to_string(&JobStatus::ToRetry).unwrap();
        assert_eq!(json, "\"toRetry\"");
        assert!(JobStatus::Running < JobStatus::Finished);
        assert!(JobStatus::Finished < JobStatus::Failed);
    }
}
