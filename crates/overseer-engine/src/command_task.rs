//! Task backed by an external submission backend.
//!
//! Each task keeps `cfg.json` (its definition) and `status.json` (its cached
//! remote state) under `tasks/<name>/` in the work area. Remote operations run
//! the backend executable as
//!
//! ```text
//! <backend> <operation> --task <name> --task-dir <dir>
//! ```
//!
//! with `operation` one of `submit`, `status`, `recover`, `kill`,
//! `check_completeness` and `check_files`. The backend answers on stdout with
//! a JSON object; every field is optional:
//!
//! ```json
//! {
//!   "status": "InProgress",
//!   "dashboardUrl": "https://...",
//!   "jobs": { "1": { "status": "running", "startTimes": ["..."], "files": ["a.root"] } },
//!   "processedFiles": ["b.root"],
//!   "ignoredFiles": [],
//!   "needsLocalWork": false,
//!   "complete": true
//! }
//! ```
//!
//! The local executor updates `status.json` directly; the overseer reloads it
//! with [`GridTask::update_status_from_file`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use overseer_core::{
    DetailKind, FileStats, GridTask, JobId, JobStat, JobStatus, StepOutcome, TaskDefinition,
    TaskError, TaskName, TaskOutput, TaskStatus,
};

use crate::collection::TaskFactory;
use crate::config::BackendConfig;
use crate::error::OverseerError;
use crate::process::run_captured;
use crate::store::{write_json_atomic, WorkArea};

/// One remote job as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub status: JobStatus,
    #[serde(default)]
    pub start_times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Persisted remote state of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandTaskState {
    pub status: TaskStatus,
    pub recovery_index: u32,
    pub dashboard_url: Option<String>,
    pub parse_error: Option<String>,
    pub last_status_log: Option<String>,
    pub last_job_stat_change: Option<DateTime<Utc>>,
    pub jobs: BTreeMap<JobId, JobRecord>,
    pub processed_files: BTreeSet<String>,
    pub ignored_files: BTreeSet<String>,
}

impl CommandTaskState {
    fn job_stat(&self) -> JobStat {
        let mut stat = JobStat::new();
        for job in self.jobs.values() {
            *stat.entry(job.status).or_insert(0) += 1;
        }
        stat
    }
}

/// Task parameters understood by the command backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandTaskConfig {
    #[serde(default)]
    input_files: Vec<String>,
    #[serde(default)]
    final_output: Option<PathBuf>,
    #[serde(default)]
    max_recovery_count: Option<u32>,
}

impl CommandTaskConfig {
    fn from_definition(definition: &TaskDefinition) -> Result<Self, TaskError> {
        serde_json::from_value(serde_json::Value::Object(definition.params.clone())).map_err(|e| {
            TaskError::InvalidConfig {
                task: definition.name.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Reply of the backend executable.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BackendReply {
    status: Option<TaskStatus>,
    dashboard_url: Option<String>,
    jobs: Option<BTreeMap<JobId, JobRecord>>,
    processed_files: Option<BTreeSet<String>>,
    ignored_files: Option<BTreeSet<String>>,
    needs_local_work: bool,
    complete: Option<bool>,
}

fn parse_reply(output: &str) -> Result<BackendReply, serde_json::Error> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(BackendReply::default());
    }
    serde_json::from_str(trimmed)
}

/// A [`GridTask`] driven through an external backend executable.
pub struct CommandTask {
    definition: TaskDefinition,
    config: CommandTaskConfig,
    state: CommandTaskState,
    job_stat: JobStat,
    dir: PathBuf,
    backend: BackendConfig,
}

impl CommandTask {
    fn new(
        definition: TaskDefinition,
        state: CommandTaskState,
        dir: PathBuf,
        backend: BackendConfig,
    ) -> Result<Self, TaskError> {
        let config = CommandTaskConfig::from_definition(&definition)?;
        let job_stat = state.job_stat();
        Ok(Self {
            definition,
            config,
            state,
            job_stat,
            dir,
            backend,
        })
    }

    fn cfg_path(&self) -> PathBuf {
        self.dir.join("cfg.json")
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join("status.json")
    }

    /// Persisted remote state.
    pub fn state(&self) -> &CommandTaskState {
        &self.state
    }

    fn max_recovery_count(&self) -> u32 {
        self.config
            .max_recovery_count
            .unwrap_or(self.backend.max_recovery_count)
    }

    fn input_files(&self) -> BTreeSet<&str> {
        self.config.input_files.iter().map(String::as_str).collect()
    }

    fn io_error(&self, source: std::io::Error) -> TaskError {
        TaskError::Io {
            task: self.definition.name.to_string(),
            source,
        }
    }

    fn remote_error(&self, operation: &str, err: OverseerError) -> TaskError {
        TaskError::Remote {
            task: self.definition.name.to_string(),
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    async fn call(&self, operation: &str) -> Result<String, OverseerError> {
        let dir = self.dir.display().to_string();
        let args = [
            operation,
            "--task",
            self.definition.name.as_str(),
            "--task-dir",
            dir.as_str(),
        ];
        run_captured(&self.backend.command, &args).await
    }

    /// Run a backend operation whose failure is fatal for the caller.
    async fn call_strict(&self, operation: &str) -> Result<BackendReply, TaskError> {
        let output = self
            .call(operation)
            .await
            .map_err(|e| self.remote_error(operation, e))?;
        parse_reply(&output).map_err(|e| TaskError::Serialization {
            task: self.definition.name.to_string(),
            reason: format!("invalid reply to '{operation}': {e}"),
        })
    }

    fn apply_reply(&mut self, reply: &BackendReply, now: DateTime<Utc>) {
        if let Some(status) = reply.status {
            self.state.status = status;
        }
        if let Some(url) = &reply.dashboard_url {
            self.state.dashboard_url = Some(url.clone());
        }
        if let Some(jobs) = &reply.jobs {
            self.state.jobs = jobs.clone();
            let job_stat = self.state.job_stat();
            if job_stat != self.job_stat || self.state.last_job_stat_change.is_none() {
                self.state.last_job_stat_change = Some(now);
            }
            self.job_stat = job_stat;
        }
        if let Some(processed) = &reply.processed_files {
            self.state.processed_files = processed.clone();
        }
        if let Some(ignored) = &reply.ignored_files {
            self.state.ignored_files = ignored.clone();
        }
    }

    fn outcome(reply: &BackendReply) -> StepOutcome {
        if reply.needs_local_work {
            StepOutcome::NeedsLocalWork
        } else {
            StepOutcome::Advanced
        }
    }

    fn write_status(&self) -> Result<(), TaskError> {
        write_json_atomic(&self.status_path(), &self.state).map_err(|e| match e {
            OverseerError::Io(source) => self.io_error(source),
            other => TaskError::Serialization {
                task: self.definition.name.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn write_cfg(&self) -> Result<(), TaskError> {
        write_json_atomic(&self.cfg_path(), &self.definition).map_err(|e| match e {
            OverseerError::Io(source) => self.io_error(source),
            other => TaskError::Serialization {
                task: self.definition.name.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

fn read_json<T: DeserializeOwned>(name: &TaskName, path: &Path) -> Result<T, TaskError> {
    let content = fs::read_to_string(path).map_err(|source| TaskError::Io {
        task: name.to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| TaskError::Serialization {
        task: name.to_string(),
        reason: format!("{}: {e}", path.display()),
    })
}

#[async_trait]
impl GridTask for CommandTask {
    fn name(&self) -> &TaskName {
        &self.definition.name
    }

    fn status(&self) -> TaskStatus {
        self.state.status
    }

    fn job_stat(&self) -> &JobStat {
        &self.job_stat
    }

    fn recovery_index(&self) -> u32 {
        self.state.recovery_index
    }

    fn dashboard_url(&self) -> Option<&str> {
        self.state.dashboard_url.as_deref()
    }

    fn parse_error(&self) -> Option<&str> {
        self.state.parse_error.as_deref()
    }

    fn last_status_log(&self) -> Option<&str> {
        self.state.last_status_log.as_deref()
    }

    fn work_area(&self) -> &Path {
        &self.dir
    }

    fn file_stats(&self) -> FileStats {
        let inputs = self.input_files();
        let processed = inputs
            .iter()
            .filter(|f| self.state.processed_files.contains(**f))
            .count();
        let ignored = inputs
            .iter()
            .filter(|f| {
                !self.state.processed_files.contains(**f) && self.state.ignored_files.contains(**f)
            })
            .count();
        FileStats {
            total: inputs.len(),
            processed,
            to_process: inputs.len() - processed - ignored,
            ignored,
        }
    }

    fn hours_since_last_job_status_change(&self, now: DateTime<Utc>) -> f64 {
        self.state
            .last_job_stat_change
            .map(|t| (now - t).num_seconds() as f64 / 3600.0)
            .unwrap_or(0.0)
    }

    fn detailed_job_stat(
        &self,
        kind: DetailKind,
        state: JobStatus,
    ) -> BTreeMap<JobId, Vec<DateTime<Utc>>> {
        match kind {
            DetailKind::StartTimes => self
                .state
                .jobs
                .iter()
                .filter(|(_, job)| job.status == state)
                .map(|(id, job)| (id.clone(), job.start_times.clone()))
                .collect(),
        }
    }

    fn files_to_process(&self) -> BTreeSet<String> {
        self.input_files()
            .into_iter()
            .filter(|f| {
                !self.state.processed_files.contains(*f) && !self.state.ignored_files.contains(*f)
            })
            .map(str::to_string)
            .collect()
    }

    fn grid_jobs(&self) -> BTreeMap<JobId, Vec<String>> {
        self.state
            .jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.files.clone()))
            .collect()
    }

    fn post_processing_done_flag(&self) -> PathBuf {
        self.dir.join("post_processing.done")
    }

    fn grid_job_done_flag(&self, job: &JobId) -> PathBuf {
        self.dir.join("grid_jobs").join(format!("{job}.done"))
    }

    fn outputs(&self) -> Vec<TaskOutput> {
        self.config
            .final_output
            .iter()
            .map(|path| TaskOutput {
                final_output: path.clone(),
            })
            .collect()
    }

    async fn submit(&mut self) -> Result<StepOutcome, TaskError> {
        let output = match self.call("submit").await {
            Ok(output) => output,
            Err(e) => return Ok(StepOutcome::Failed(e.to_string())),
        };
        let reply = match parse_reply(&output) {
            Ok(reply) => reply,
            Err(e) => return Ok(StepOutcome::Failed(format!("invalid submit reply: {e}"))),
        };
        self.state.status = TaskStatus::InProgress;
        self.apply_reply(&reply, Utc::now());
        self.write_status()?;
        info!(task = %self.name(), status = ?self.state.status, "Task submitted");
        Ok(Self::outcome(&reply))
    }

    async fn update_status(&mut self) -> Result<StepOutcome, TaskError> {
        let output = match self.call("status").await {
            Ok(output) => output,
            Err(e) => return Ok(StepOutcome::Failed(e.to_string())),
        };
        let outcome = match parse_reply(&output) {
            Ok(reply) => {
                self.state.parse_error = None;
                self.state.last_status_log = None;
                self.apply_reply(&reply, Utc::now());
                Self::outcome(&reply)
            }
            Err(e) => {
                warn!(task = %self.name(), error = %e, "Unable to parse task status");
                self.state.status = TaskStatus::Unknown;
                self.state.parse_error = Some(e.to_string());
                self.state.last_status_log = output
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .map(str::to_string);
                StepOutcome::Advanced
            }
        };
        self.write_status()?;
        Ok(outcome)
    }

    async fn recover(&mut self) -> Result<StepOutcome, TaskError> {
        let attempt = self.state.recovery_index + 1;
        if attempt > self.max_recovery_count() {
            warn!(
                task = %self.name(),
                recovery_index = self.state.recovery_index,
                "Maximal number of recoveries reached, marking task as failed"
            );
            self.state.status = TaskStatus::Failed;
            self.write_status()?;
            return Ok(StepOutcome::Advanced);
        }

        let output = match self.call("recover").await {
            Ok(output) => output,
            Err(e) => return Ok(StepOutcome::Failed(e.to_string())),
        };
        let reply = match parse_reply(&output) {
            Ok(reply) => reply,
            Err(e) => return Ok(StepOutcome::Failed(format!("invalid recover reply: {e}"))),
        };
        self.state.recovery_index = attempt;
        self.state.status = TaskStatus::InProgress;
        self.apply_reply(&reply, Utc::now());
        self.write_status()?;
        Ok(Self::outcome(&reply))
    }

    async fn kill(&mut self) -> Result<(), TaskError> {
        self.call_strict("kill").await?;
        self.state.status = TaskStatus::WaitingForRecovery;
        self.write_status()
    }

    async fn check_completeness(&mut self) -> Result<bool, TaskError> {
        let reply = self.call_strict("check_completeness").await?;
        self.apply_reply(&reply, Utc::now());
        self.write_status()?;
        Ok(reply.complete.unwrap_or(false))
    }

    async fn check_files_to_process(&mut self) -> Result<(), TaskError> {
        let reply = self.call_strict("check_files").await?;
        self.apply_reply(&reply, Utc::now());
        self.write_status()?;
        let to_process = self.files_to_process();
        info!(task = %self.name(), to_process = to_process.len(), "Checked files to process");
        Ok(())
    }

    fn check_configuration_validity(&self) -> Result<(), TaskError> {
        let invalid = |reason: &str| TaskError::InvalidConfig {
            task: self.definition.name.to_string(),
            reason: reason.to_string(),
        };
        if self.config.final_output.is_none() {
            return Err(invalid("finalOutput is not specified"));
        }
        if self.config.input_files.is_empty() {
            return Err(invalid("no input files"));
        }
        if self.input_files().len() != self.config.input_files.len() {
            return Err(invalid("duplicated input files"));
        }
        Ok(())
    }

    fn update_config(&mut self, definition: &TaskDefinition) -> Result<(), TaskError> {
        let config = CommandTaskConfig::from_definition(definition)?;
        self.definition.params = definition.params.clone();
        self.config = config;
        debug!(task = %self.name(), "Updated task configuration");
        Ok(())
    }

    async fn update_status_from_file(&mut self) -> Result<(), TaskError> {
        let state: CommandTaskState = read_json(&self.definition.name, &self.status_path())?;
        self.job_stat = state.job_stat();
        self.state = state;
        Ok(())
    }

    async fn save_cfg(&self) -> Result<(), TaskError> {
        self.write_cfg()
    }

    async fn save_status(&self) -> Result<(), TaskError> {
        self.write_status()
    }
}

/// Creates and loads [`CommandTask`]s in a work area.
#[derive(Debug, Clone)]
pub struct CommandTaskFactory {
    area: WorkArea,
    backend: BackendConfig,
}

impl CommandTaskFactory {
    pub fn new(area: WorkArea, backend: BackendConfig) -> Self {
        Self { area, backend }
    }
}

#[async_trait]
impl TaskFactory for CommandTaskFactory {
    async fn load(&self, name: &TaskName) -> Result<Box<dyn GridTask>, TaskError> {
        let dir = self.area.task_dir(name);
        let mut definition: TaskDefinition = read_json(name, &dir.join("cfg.json"))?;
        definition.name = name.clone();

        let status_path = dir.join("status.json");
        let state = if status_path.is_file() {
            read_json(name, &status_path)?
        } else {
            CommandTaskState::default()
        };
        Ok(Box::new(CommandTask::new(
            definition,
            state,
            dir,
            self.backend.clone(),
        )?))
    }

    async fn create(&self, definition: &TaskDefinition) -> Result<Box<dyn GridTask>, TaskError> {
        let dir = self.area.task_dir(&definition.name);
        fs::create_dir_all(&dir).map_err(|source| TaskError::Io {
            task: definition.name.to_string(),
            source,
        })?;
        let task = CommandTask::new(
            definition.clone(),
            CommandTaskState::default(),
            dir,
            self.backend.clone(),
        )?;
        task.write_cfg()?;
        task.write_status()?;
        info!(task = %definition.name, "Created task");
        Ok(Box::new(task))
    }
}
