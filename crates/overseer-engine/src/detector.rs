//! Stuck-work detection.
//!
//! A task in progress is declared stuck when its job-state histogram has not
//! changed for longer than the threshold, or when it only has running,
//! finished and failed jobs and even the most recently started running job
//! has been running for longer than the threshold. Stuck tasks are killed so
//! that the recovery machinery resubmits them.

use chrono::{DateTime, Utc};
use tracing::warn;

use overseer_core::{DetailKind, GridTask, JobStatus, TaskError, TaskStatus};

/// Job states a healthy task may show while only waiting on running jobs,
/// in lifecycle order.
const EXPECTED_JOB_STATES: [JobStatus; 3] =
    [JobStatus::Running, JobStatus::Finished, JobStatus::Failed];

/// Default inactivity threshold, in hours.
pub const DEFAULT_STUCK_THRESHOLD_HOURS: f64 = 24.0;

/// Why a task was declared stuck.
#[derive(Debug, Clone, PartialEq)]
pub enum StuckReason {
    /// The job-state histogram did not change for this many hours.
    NoJobStatusChange { hours: f64 },
    /// Every running job has been running for at least this many hours.
    AllRunningJobsStale { hours: f64 },
}

/// Detects tasks whose remote progress is indistinguishable from a hang.
#[derive(Debug, Clone)]
pub struct StuckWorkDetector {
    threshold_hours: f64,
}

impl Default for StuckWorkDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STUCK_THRESHOLD_HOURS)
    }
}

impl StuckWorkDetector {
    /// Create a detector with the given inactivity threshold in hours.
    pub fn new(threshold_hours: f64) -> Self {
        Self { threshold_hours }
    }

    /// Decide whether the task is stuck, without side effects.
    pub fn diagnose(&self, task: &dyn GridTask, now: DateTime<Utc>) -> Option<StuckReason> {
        if task.status() != TaskStatus::InProgress {
            return None;
        }

        let idle_hours = task.hours_since_last_job_status_change(now);
        if idle_hours > self.threshold_hours {
            return Some(StuckReason::NoJobStatusChange { hours: idle_hours });
        }

        // job_stat is a BTreeMap, so its keys are already in lifecycle order.
        let states: Vec<JobStatus> = task.job_stat().keys().copied().collect();
        if states.len() > EXPECTED_JOB_STATES.len()
            || states[..] != EXPECTED_JOB_STATES[..states.len()]
        {
            return None;
        }

        let youngest_run = task
            .detailed_job_stat(DetailKind::StartTimes, JobStatus::Running)
            .values()
            .filter_map(|starts| starts.iter().max())
            .map(|started| (now - *started).num_seconds() as f64 / 3600.0)
            .min_by(|a, b| a.total_cmp(b))?;

        if youngest_run > self.threshold_hours {
            return Some(StuckReason::AllRunningJobsStale {
                hours: youngest_run,
            });
        }
        None
    }

    /// Check one task and kill it if it is stuck.
    ///
    /// Returns `Ok(true)` for a healthy task and `Ok(false)` if the task was
    /// just killed. Kill failures are returned to the caller.
    pub async fn check_task(
        &self,
        task: &mut dyn GridTask,
        now: DateTime<Utc>,
    ) -> Result<bool, TaskError> {
        let Some(reason) = self.diagnose(task, now) else {
            return Ok(true);
        };

        match reason {
            StuckReason::NoJobStatusChange { hours } => {
                warn!(
                    task = %task.name(),
                    hours,
                    "Status of all jobs is not changed for at least {hours:.1} hours. \
                     It is very likely that this task is stuck. \
                     The task will be killed following by recovery attempts."
                );
            }
            StuckReason::AllRunningJobsStale { hours } => {
                warn!(
                    task = %task.name(),
                    hours,
                    "All running jobs are running for at least {hours:.1} hours. \
                     It is very likely that these jobs are stuck. \
                     The task will be killed following by recovery attempts."
                );
            }
        }
        task.kill().await?;
        Ok(false)
    }
}
