//! The task contract consumed by the overseer.
//!
//! A task owns its remote job states and the way it talks to the remote
//! submission service. The overseer only drives it through [`GridTask`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::{JobId, JobStatus, TaskName, TaskStatus};

/// Count of remote jobs per job state.
pub type JobStat = BTreeMap<JobStatus, u32>;

/// Outcome of a single lifecycle step (submit, poll, recover).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step was applied; nothing needs to run locally.
    Advanced,
    /// The step was applied and some of the task's work must run locally.
    NeedsLocalWork,
    /// The step could not be applied this round.
    Failed(String),
}

impl StepOutcome {
    /// Returns true if the task must be included in the next local batch.
    pub fn needs_local_work(&self) -> bool {
        matches!(self, Self::NeedsLocalWork)
    }
}

/// Kind of per-job detail a task can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailKind {
    /// Start times of every attempt of a job.
    StartTimes,
}

/// Input file bookkeeping of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub total: usize,
    pub processed: usize,
    pub to_process: usize,
    pub ignored: usize,
}

/// One output produced by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Directory holding the final merged output.
    pub final_output: PathBuf,
}

/// Definition of a task as found in a task list file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task name.
    pub name: TaskName,

    /// Task parameters, with list-wide defaults already merged in.
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TaskDefinition {
    /// Create a definition from task-specific parameters and list-wide defaults.
    ///
    /// Task-specific values take precedence over the defaults.
    pub fn merged(
        name: TaskName,
        defaults: &serde_json::Map<String, serde_json::Value>,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut merged = defaults.clone();
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
        Self {
            name,
            params: merged,
        }
    }

    /// Get a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Contract between the overseer and a single remote task.
///
/// Read accessors work on the task's cached state; the async operations may
/// talk to the remote submission service or touch the task's work area.
#[async_trait]
pub trait GridTask: Send + Sync {
    /// Unique task name.
    fn name(&self) -> &TaskName;

    /// Current lifecycle status.
    fn status(&self) -> TaskStatus;

    /// Per-job-state counts. Only meaningful while `InProgress`.
    fn job_stat(&self) -> &JobStat;

    /// Number of recovery attempts made so far.
    fn recovery_index(&self) -> u32;

    /// Monitoring dashboard of the remote task, if any.
    fn dashboard_url(&self) -> Option<&str>;

    /// Why the remote status could not be parsed. Only set when `Unknown`.
    fn parse_error(&self) -> Option<&str>;

    /// Last raw status log line of the remote service, if kept.
    fn last_status_log(&self) -> Option<&str>;

    /// Directory holding the task's persisted state.
    fn work_area(&self) -> &Path;

    /// Input file bookkeeping.
    fn file_stats(&self) -> FileStats;

    /// Hours since the job-state histogram last changed.
    fn hours_since_last_job_status_change(&self, now: DateTime<Utc>) -> f64;

    /// Per-job details for all jobs currently in `state`.
    fn detailed_job_stat(
        &self,
        kind: DetailKind,
        state: JobStatus,
    ) -> BTreeMap<JobId, Vec<DateTime<Utc>>>;

    /// Input files that still need processing.
    fn files_to_process(&self) -> BTreeSet<String>;

    /// Mapping of remote job to the input files it processes.
    fn grid_jobs(&self) -> BTreeMap<JobId, Vec<String>>;

    /// Flag file marking the task's post-processing as done.
    fn post_processing_done_flag(&self) -> PathBuf;

    /// Flag file marking the local re-execution of a grid job as done.
    fn grid_job_done_flag(&self, job: &JobId) -> PathBuf;

    /// Final outputs of the task.
    fn outputs(&self) -> Vec<TaskOutput>;

    /// Submit the task to the remote service.
    async fn submit(&mut self) -> Result<StepOutcome, TaskError>;

    /// Poll the remote service and refresh the cached state.
    async fn update_status(&mut self) -> Result<StepOutcome, TaskError>;

    /// Start a recovery attempt.
    async fn recover(&mut self) -> Result<StepOutcome, TaskError>;

    /// Kill all remote jobs of the task.
    async fn kill(&mut self) -> Result<(), TaskError>;

    /// Check that all remote outputs are present.
    async fn check_completeness(&mut self) -> Result<bool, TaskError>;

    /// Check availability of the files that still need processing.
    async fn check_files_to_process(&mut self) -> Result<(), TaskError>;

    /// Validate the task configuration before the loop starts.
    fn check_configuration_validity(&self) -> Result<(), TaskError>;

    /// Replace the task configuration with a new definition.
    fn update_config(&mut self, definition: &TaskDefinition) -> Result<(), TaskError>;

    /// Reload the status written by the local executor.
    async fn update_status_from_file(&mut self) -> Result<(), TaskError>;

    /// Persist the task configuration.
    async fn save_cfg(&self) -> Result<(), TaskError>;

    /// Persist the task status.
    async fn save_status(&self) -> Result<(), TaskError>;
}
