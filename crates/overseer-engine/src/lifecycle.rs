//! Lifecycle driver: advances every task by one step per round.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use overseer_core::{GridTask, StepOutcome, TaskName, TaskStatus};

use crate::collection::TaskCollection;
use crate::detector::StuckWorkDetector;
use crate::error::Result;
use crate::stats::{AggregatedStatus, StatusAggregator, DEFAULT_SUMMARY_ONLY_THRESHOLD};
use crate::store::remove_if_exists;

/// Result of one round over the task collection.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Tasks whose remote work is complete and ready for post-processing.
    pub to_post_process: Vec<TaskName>,
    /// Tasks with work that must run in the local batch.
    pub to_run_locally: Vec<TaskName>,
    /// Snapshot of the round.
    pub status: AggregatedStatus,
    /// Human-readable report of the round.
    pub report: String,
}

impl RoundOutcome {
    /// Returns true if the local executor has to run this round.
    pub fn has_local_work(&self) -> bool {
        !self.to_post_process.is_empty() || !self.to_run_locally.is_empty()
    }

    /// Tasks covered by the local batch, post-processing first, without
    /// duplicates.
    pub fn local_batch(&self) -> Vec<TaskName> {
        let mut batch = self.to_post_process.clone();
        for name in &self.to_run_locally {
            push_unique(&mut batch, name);
        }
        batch
    }
}

/// Advances each task exactly one step along its lifecycle per round.
#[derive(Debug, Clone)]
pub struct LifecycleDriver {
    detector: StuckWorkDetector,
    summary_only_threshold: usize,
    no_status_update: bool,
}

impl Default for LifecycleDriver {
    fn default() -> Self {
        Self::new(StuckWorkDetector::default(), DEFAULT_SUMMARY_ONLY_THRESHOLD)
    }
}

impl LifecycleDriver {
    /// Create a driver.
    pub fn new(detector: StuckWorkDetector, summary_only_threshold: usize) -> Self {
        Self {
            detector,
            summary_only_threshold,
            no_status_update: false,
        }
    }

    /// Do not poll the remote service for status updates.
    pub fn with_no_status_update(mut self, no_status_update: bool) -> Self {
        self.no_status_update = no_status_update;
        self
    }

    /// Run one round over all tasks.
    pub async fn advance(
        &self,
        tasks: &mut TaskCollection,
        now: DateTime<Utc>,
    ) -> Result<RoundOutcome> {
        let mut aggregator = StatusAggregator::new(self.summary_only_threshold);
        let mut to_post_process = Vec::new();
        let mut to_run_locally = Vec::new();

        for task in tasks.iter_mut() {
            let task = task.as_mut();
            self.step(task, now, &mut to_post_process, &mut to_run_locally)
                .await?;
            aggregator.add(task, now);
        }

        for name in &to_run_locally {
            if let Some(task) = tasks.get(name) {
                reset_grid_job_flags(task)?;
            }
        }

        Ok(RoundOutcome {
            to_post_process,
            to_run_locally,
            status: aggregator.snapshot(now),
            report: aggregator.report(),
        })
    }

    async fn step(
        &self,
        task: &mut dyn GridTask,
        now: DateTime<Utc>,
        to_post_process: &mut Vec<TaskName>,
        to_run_locally: &mut Vec<TaskName>,
    ) -> Result<()> {
        let status = task.status();
        if status == TaskStatus::Defined {
            info!(task = %task.name(), "Submitting task");
            let outcome = task.submit().await?;
            note_outcome(task.name(), "submit", outcome, to_run_locally);
        } else if status.is_in_flight() {
            if task.status() < TaskStatus::WaitingForRecovery && !self.no_status_update {
                let outcome = task.update_status().await?;
                note_outcome(task.name(), "update_status", outcome, to_run_locally);
            }
            if task.status() == TaskStatus::WaitingForRecovery {
                info!(task = %task.name(), recovery_index = task.recovery_index(), "Recovering task");
                let outcome = task.recover().await?;
                note_outcome(task.name(), "recover", outcome, to_run_locally);
            }
        }

        self.detector.check_task(task, now).await?;

        if task.status() == TaskStatus::CrabFinished {
            if task.check_completeness().await? {
                let flag = task.post_processing_done_flag();
                if remove_if_exists(&flag)? {
                    debug!(task = %task.name(), flag = %flag.display(), "Removed post-processing flag");
                }
                push_unique(to_post_process, task.name());
            } else {
                info!(task = %task.name(), "Remote output is incomplete, recovering task");
                let outcome = task.recover().await?;
                note_outcome(task.name(), "recover", outcome, to_run_locally);
            }
        }
        Ok(())
    }
}

/// Remove the done flag of every grid job that processes a file still to be
/// processed, so the local batch re-runs it.
fn reset_grid_job_flags(task: &dyn GridTask) -> Result<()> {
    let files_to_process: BTreeSet<String> = task.files_to_process();
    for (job_id, job_files) in task.grid_jobs() {
        if job_files.iter().any(|f| files_to_process.contains(f)) {
            let flag = task.grid_job_done_flag(&job_id);
            if remove_if_exists(&flag)? {
                debug!(task = %task.name(), job = %job_id, "Removed grid job done flag");
            }
        }
    }
    Ok(())
}

fn note_outcome(
    name: &TaskName,
    step: &str,
    outcome: StepOutcome,
    to_run_locally: &mut Vec<TaskName>,
) {
    match outcome {
        StepOutcome::Advanced => {}
        StepOutcome::NeedsLocalWork => push_unique(to_run_locally, name),
        StepOutcome::Failed(reason) => {
            warn!(task = %name, step, reason = %reason, "Task step failed, no progress this round");
        }
    }
}

fn push_unique(names: &mut Vec<TaskName>, name: &TaskName) {
    if !names.contains(name) {
        names.push(name.clone());
    }
}
