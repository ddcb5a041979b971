//! In-memory task used by the engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use overseer_core::{
    DetailKind, FileStats, GridTask, JobId, JobStat, JobStatus, StepOutcome, TaskDefinition,
    TaskError, TaskName, TaskOutput, TaskStatus,
};

/// Shared log of `task:operation` entries.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct FakeTask {
    pub name: TaskName,
    pub status: TaskStatus,
    pub job_stat: JobStat,
    pub recovery_index: u32,
    pub dashboard_url: Option<String>,
    pub parse_error: Option<String>,
    pub work_area: PathBuf,
    pub files: FileStats,
    pub last_change: DateTime<Utc>,
    pub start_times: BTreeMap<JobId, Vec<DateTime<Utc>>>,
    pub to_process: BTreeSet<String>,
    pub grid_jobs: BTreeMap<JobId, Vec<String>>,
    pub outputs: Vec<TaskOutput>,

    pub submit_result: (StepOutcome, Option<TaskStatus>),
    pub update_result: (StepOutcome, Option<TaskStatus>),
    pub recover_result: (StepOutcome, Option<TaskStatus>),
    pub complete: bool,
    pub kill_error: Option<String>,
    pub status_from_file: Option<TaskStatus>,

    pub calls: CallLog,
}

impl FakeTask {
    pub fn new(name: &str, status: TaskStatus) -> Self {
        Self {
            name: TaskName::from(name),
            status,
            job_stat: JobStat::new(),
            recovery_index: 0,
            dashboard_url: None,
            parse_error: None,
            work_area: PathBuf::from("/nonexistent").join(name),
            files: FileStats::default(),
            last_change: Utc::now(),
            start_times: BTreeMap::new(),
            to_process: BTreeSet::new(),
            grid_jobs: BTreeMap::new(),
            outputs: Vec::new(),
            submit_result: (StepOutcome::Advanced, Some(TaskStatus::InProgress)),
            update_result: (StepOutcome::Advanced, None),
            recover_result: (StepOutcome::Advanced, Some(TaskStatus::InProgress)),
            complete: true,
            kill_error: None,
            status_from_file: None,
            calls: CallLog::default(),
        }
    }

    pub fn with_calls(mut self, calls: &CallLog) -> Self {
        self.calls = Arc::clone(calls);
        self
    }

    pub fn with_work_area(mut self, dir: &Path) -> Self {
        self.work_area = dir.to_path_buf();
        self
    }

    pub fn with_jobs(mut self, jobs: &[(JobStatus, u32)]) -> Self {
        self.job_stat = jobs.iter().copied().collect();
        self
    }

    /// Set the time of the last job-state change `hours` before `now`.
    pub fn idle_for(mut self, now: DateTime<Utc>, hours: i64) -> Self {
        self.last_change = now - Duration::hours(hours);
        self
    }

    /// Add a running job whose latest attempt started `hours` before `now`.
    pub fn with_running_job(mut self, id: &str, now: DateTime<Utc>, hours: i64) -> Self {
        self.start_times
            .entry(JobId::from(id))
            .or_default()
            .push(now - Duration::hours(hours));
        self
    }

    fn record(&self, op: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, op));
    }

    fn apply(&mut self, result: (StepOutcome, Option<TaskStatus>)) -> StepOutcome {
        if let Some(status) = result.1 {
            self.status = status;
        }
        result.0
    }
}

pub fn calls_of(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[async_trait]
impl GridTask for FakeTask {
    fn name(&self) -> &TaskName {
        &self.name
    }

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn job_stat(&self) -> &JobStat {
        &self.job_stat
    }

    fn recovery_index(&self) -> u32 {
        self.recovery_index
    }

    fn dashboard_url(&self) -> Option<&str> {
        self.dashboard_url.as_deref()
    }

    fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    fn last_status_log(&self) -> Option<&str> {
        None
    }

    fn work_area(&self) -> &Path {
        &self.work_area
    }

    fn file_stats(&self) -> FileStats {
        self.files
    }

    fn hours_since_last_job_status_change(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_change).num_seconds() as f64 / 3600.0
    }

    fn detailed_job_stat(
        &self,
        _kind: DetailKind,
        state: JobStatus,
    ) -> BTreeMap<JobId, Vec<DateTime<Utc>>> {
        if state == JobStatus::Running {
            self.start_times.clone()
        } else {
            BTreeMap::new()
        }
    }

    fn files_to_process(&self) -> BTreeSet<String> {
        self.to_process.clone()
    }

    fn grid_jobs(&self) -> BTreeMap<JobId, Vec<String>> {
        self.grid_jobs.clone()
    }

    fn post_processing_done_flag(&self) -> PathBuf {
        self.work_area.join("post_processing.done")
    }

    fn grid_job_done_flag(&self, job: &JobId) -> PathBuf {
        self.work_area.join(format!("job_{job}.done"))
    }

    fn outputs(&self) -> Vec<TaskOutput> {
        self.outputs.clone()
    }

    async fn submit(&mut self) -> Result<StepOutcome, TaskError> {
        self.record("submit");
        Ok(self.apply(self.submit_result.clone()))
    }

    async fn update_status(&mut self) -> Result<StepOutcome, TaskError> {
        self.record("update_status");
        Ok(self.apply(self.update_result.clone()))
    }

    async fn recover(&mut self) -> Result<StepOutcome, TaskError> {
        self.record("recover");
        Ok(self.apply(self.recover_result.clone()))
    }

    async fn kill(&mut self) -> Result<(), TaskError> {
        self.record("kill");
        if let Some(reason) = &self.kill_error {
            return Err(TaskError::Remote {
                task: self.name.to_string(),
                operation: "kill".to_string(),
                reason: reason.clone(),
            });
        }
        self.status = TaskStatus::WaitingForRecovery;
        Ok(())
    }

    async fn check_completeness(&mut self) -> Result<bool, TaskError> {
        self.record("check_completeness");
        Ok(self.complete)
    }

    async fn check_files_to_process(&mut self) -> Result<(), TaskError> {
        self.record("check_files_to_process");
        Ok(())
    }

    fn check_configuration_validity(&self) -> Result<(), TaskError> {
        Ok(())
    }

    fn update_config(&mut self, _definition: &TaskDefinition) -> Result<(), TaskError> {
        self.record("update_config");
        Ok(())
    }

    async fn update_status_from_file(&mut self) -> Result<(), TaskError> {
        self.record("update_status_from_file");
        if let Some(status) = self.status_from_file {
            self.status = status;
        }
        Ok(())
    }

    async fn save_cfg(&self) -> Result<(), TaskError> {
        self.record("save_cfg");
        Ok(())
    }

    async fn save_status(&self) -> Result<(), TaskError> {
        self.record("save_status");
        Ok(())
    }
}
