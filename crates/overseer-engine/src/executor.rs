//! Local batch executor.
//!
//! Tasks whose work cannot finish remotely, and tasks ready for
//! post-processing, are handled by one blocking batch invocation per round.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::config::LocalProcessingConfig;
use crate::error::Result;
use crate::process::run_attached;
use crate::store::WorkArea;

/// Everything the local executor needs for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBatch {
    pub law_task: String,
    pub workflow: String,
    pub bootstrap: String,
    pub work_area: PathBuf,
    pub log_path: PathBuf,
    pub sub_dir: PathBuf,
    pub n_cpus: u32,
    pub max_runtime: f64,
    pub requirements: Option<String>,
}

impl LocalBatch {
    /// Build the batch descriptor for a work area.
    pub fn new(config: &LocalProcessingConfig, area: &WorkArea) -> Self {
        Self {
            law_task: config.law_task.clone(),
            workflow: config.workflow.clone(),
            bootstrap: config.bootstrap.clone(),
            work_area: area.root().to_path_buf(),
            log_path: area.law_logs_dir(),
            sub_dir: area.law_jobs_dir(),
            n_cpus: config.n_cpu,
            max_runtime: config.max_runtime,
            requirements: config.requirements.clone(),
        }
    }

    /// Job directory of the batch task, cleared before every invocation.
    pub fn task_dir(&self) -> PathBuf {
        self.sub_dir.join(&self.law_task)
    }

    /// Arguments of `law run`.
    pub fn args(&self) -> Vec<String> {
        let path = |p: &Path| p.display().to_string();
        let mut args = vec![
            "run".to_string(),
            self.law_task.clone(),
            "--workflow".to_string(),
            self.workflow.clone(),
            "--bootstrap-path".to_string(),
            self.bootstrap.clone(),
            "--work-area".to_string(),
            path(&self.work_area),
            "--log-path".to_string(),
            path(&self.log_path),
            "--sub-dir".to_string(),
            path(&self.sub_dir),
            "--n-cpus".to_string(),
            self.n_cpus.to_string(),
            "--max-runtime".to_string(),
            // Keep the decimal point, e.g. "24.0".
            format!("{:?}", self.max_runtime),
            "--transfer-logs".to_string(),
        ];
        if let Some(requirements) = &self.requirements {
            args.push("--requirements".to_string());
            args.push(requirements.clone());
        }
        args
    }
}

/// Runs a local batch to completion.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    async fn run(&self, batch: &LocalBatch) -> Result<()>;
}

/// Executor backed by the `law` workflow tool.
#[derive(Debug, Clone)]
pub struct LawExecutor {
    program: String,
}

impl LawExecutor {
    /// Create an executor calling the given `law` executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl LocalExecutor for LawExecutor {
    async fn run(&self, batch: &LocalBatch) -> Result<()> {
        let task_dir = batch.task_dir();
        if tokio::fs::try_exists(&task_dir).await? {
            tokio::fs::remove_dir_all(&task_dir).await?;
        }

        info!(law_task = %batch.law_task, workflow = %batch.workflow, "Starting local batch");
        run_attached(&self.program, &batch.args()).await?;
        info!(law_task = %batch.law_task, "Local batch finished");
        Ok(())
    }
}
