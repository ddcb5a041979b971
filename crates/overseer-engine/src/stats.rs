//! Per-round status aggregation and reporting.
//!
//! [`StatusAggregator`] is fed every task once per round, after the task's
//! lifecycle step. It produces the human-readable round report and the
//! [`AggregatedStatus`] snapshot that is published as `status.json`.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use overseer_core::{FileStats, GridTask, JobStat, JobStatus, TaskName, TaskStatus};

/// Default number of in-progress tasks above which the report only shows
/// summaries.
pub const DEFAULT_SUMMARY_ONLY_THRESHOLD: usize = 10;

/// Task holding the largest count of jobs in some state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offender {
    pub task: TaskName,
    pub count: u32,
    pub dashboard_url: Option<String>,
}

/// Task with the longest time since its last job-state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inactivity {
    pub task: TaskName,
    /// Whole hours since the last job-state change.
    pub hours: i64,
    pub dashboard_url: Option<String>,
}

/// Input file counters summed over all tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTotals {
    pub n_files: usize,
    pub n_processed: usize,
    pub n_to_process: usize,
    pub n_ignored: usize,
}

/// Per-task line of the published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: TaskName,
    pub status: TaskStatus,
    #[serde(rename = "recoveryIndex")]
    pub recovery_index: u32,
    pub n_files: usize,
    pub n_processed: usize,
    pub n_to_process: usize,
    pub n_ignored: usize,
    pub grafana: Option<String>,
}

/// Snapshot of one round, published after every round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStatus {
    pub last_update: String,
    pub tasks_summary: String,
    pub jobs_summary: String,
    pub n_tasks: usize,
    pub tasks_by_status: BTreeMap<TaskStatus, usize>,
    pub n_jobs: u64,
    pub job_stat: BTreeMap<JobStatus, u64>,
    pub max_job_stat: BTreeMap<JobStatus, Offender>,
    pub max_inactivity: Option<Inactivity>,
    pub files: FileTotals,
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Clone)]
struct ActiveTask {
    name: TaskName,
    job_stat: JobStat,
    idle_hours: i64,
    dashboard_url: Option<String>,
}

#[derive(Debug, Clone)]
struct UnknownTask {
    name: TaskName,
    parse_error: Option<String>,
    last_log: Option<String>,
}

/// Rolls up task and job counts of one round.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    summary_only_threshold: usize,
    tasks_by_status: BTreeMap<TaskStatus, usize>,
    n_jobs: u64,
    total_job_stat: BTreeMap<JobStatus, u64>,
    max_job_stat: BTreeMap<JobStatus, Offender>,
    max_inactivity: Option<Inactivity>,
    files: FileTotals,
    summaries: Vec<TaskSummary>,
    in_progress: Vec<ActiveTask>,
    unknown: Vec<UnknownTask>,
    waiting_for_recovery: Vec<TaskName>,
    tape_recall: Vec<TaskName>,
    failed: Vec<TaskName>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_ONLY_THRESHOLD)
    }
}

impl StatusAggregator {
    /// Create an aggregator. With more than `summary_only_threshold` tasks in
    /// progress the report lists only the worst offenders.
    pub fn new(summary_only_threshold: usize) -> Self {
        Self {
            summary_only_threshold,
            tasks_by_status: BTreeMap::new(),
            n_jobs: 0,
            total_job_stat: BTreeMap::new(),
            max_job_stat: BTreeMap::new(),
            max_inactivity: None,
            files: FileTotals::default(),
            summaries: Vec::new(),
            in_progress: Vec::new(),
            unknown: Vec::new(),
            waiting_for_recovery: Vec::new(),
            tape_recall: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Number of tasks added so far.
    pub fn n_tasks(&self) -> usize {
        self.summaries.len()
    }

    /// Accumulate one task.
    pub fn add(&mut self, task: &dyn GridTask, now: DateTime<Utc>) {
        let status = task.status();
        let name = task.name().clone();
        let dashboard_url = task.dashboard_url().map(str::to_string);
        let FileStats {
            total,
            processed,
            to_process,
            ignored,
        } = task.file_stats();

        self.files.n_files += total;
        self.files.n_processed += processed;
        self.files.n_to_process += to_process;
        self.files.n_ignored += ignored;
        self.summaries.push(TaskSummary {
            name: name.clone(),
            status,
            recovery_index: task.recovery_index(),
            n_files: total,
            n_processed: processed,
            n_to_process: to_process,
            n_ignored: ignored,
            grafana: dashboard_url.clone(),
        });
        *self.tasks_by_status.entry(status).or_insert(0) += 1;

        match status {
            TaskStatus::InProgress => {
                for (&job_status, &count) in task.job_stat() {
                    *self.total_job_stat.entry(job_status).or_insert(0) += u64::from(count);
                    self.n_jobs += u64::from(count);

                    let replace = match self.max_job_stat.get(&job_status) {
                        None => true,
                        Some(best) => {
                            count > best.count || (count == best.count && name < best.task)
                        }
                    };
                    if replace {
                        self.max_job_stat.insert(
                            job_status,
                            Offender {
                                task: name.clone(),
                                count,
                                dashboard_url: dashboard_url.clone(),
                            },
                        );
                    }
                }

                let idle_hours = task.hours_since_last_job_status_change(now).trunc() as i64;
                if idle_hours > 0 {
                    let replace = match &self.max_inactivity {
                        None => true,
                        Some(worst) => {
                            idle_hours > worst.hours
                                || (idle_hours == worst.hours && name < worst.task)
                        }
                    };
                    if replace {
                        self.max_inactivity = Some(Inactivity {
                            task: name.clone(),
                            hours: idle_hours,
                            dashboard_url: dashboard_url.clone(),
                        });
                    }
                }

                self.in_progress.push(ActiveTask {
                    name,
                    job_stat: task.job_stat().clone(),
                    idle_hours,
                    dashboard_url,
                });
            }
            TaskStatus::Unknown => self.unknown.push(UnknownTask {
                name,
                parse_error: task.parse_error().map(str::to_string),
                last_log: task.last_status_log().map(str::to_string),
            }),
            TaskStatus::WaitingForRecovery => self.waiting_for_recovery.push(name),
            TaskStatus::TapeRecall => self.tape_recall.push(name),
            TaskStatus::Failed => self.failed.push(name),
            _ => {}
        }
    }

    /// One-line task count summary.
    pub fn tasks_summary(&self) -> String {
        let counts = std::iter::once(format!("{} Total", self.n_tasks())).chain(
            self.tasks_by_status
                .iter()
                .map(|(status, count)| format!("{count} {status}")),
        );
        format!("Tasks: {}", counts.collect::<Vec<_>>().join(", "))
    }

    /// One-line job count summary over in-progress tasks.
    pub fn jobs_summary(&self) -> String {
        let counts = std::iter::once(format!("{} total", self.n_jobs)).chain(
            self.total_job_stat
                .iter()
                .map(|(status, count)| format!("{count} {status}")),
        );
        format!(
            "Jobs in active tasks: {}",
            counts.collect::<Vec<_>>().join(", ")
        )
    }

    /// Build the snapshot to publish.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> AggregatedStatus {
        AggregatedStatus {
            last_update: timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            tasks_summary: self.tasks_summary(),
            jobs_summary: self.jobs_summary(),
            n_tasks: self.n_tasks(),
            tasks_by_status: self.tasks_by_status.clone(),
            n_jobs: self.n_jobs,
            job_stat: self.total_job_stat.clone(),
            max_job_stat: self.max_job_stat.clone(),
            max_inactivity: self.max_inactivity.clone(),
            files: self.files,
            tasks: self.summaries.clone(),
        }
    }

    /// Human-readable report of the round.
    pub fn report(&self) -> String {
        let mut out = String::new();

        writeln!(out, "{}", self.tasks_summary()).ok();
        if self.n_jobs > 0 {
            writeln!(out, "{}", self.jobs_summary()).ok();
        }
        writeln!(
            out,
            "Input files: {} total, {} processed, {} to_process, {} ignored",
            self.files.n_files, self.files.n_processed, self.files.n_to_process, self.files.n_ignored
        )
        .ok();

        if self.in_progress.len() > self.summary_only_threshold {
            if !self.max_job_stat.is_empty() {
                writeln!(out, "Task with ...").ok();
                for (job_status, offender) in &self.max_job_stat {
                    writeln!(
                        out,
                        "\tmax {} jobs = {}: {}{}",
                        job_status,
                        offender.count,
                        offender.task,
                        url_suffix(offender.dashboard_url.as_deref())
                    )
                    .ok();
                }
                if let Some(worst) = &self.max_inactivity {
                    writeln!(
                        out,
                        "\tmax since_last_job_status_change = {}h: {}{}",
                        worst.hours,
                        worst.task,
                        url_suffix(worst.dashboard_url.as_deref())
                    )
                    .ok();
                }
            }
        } else {
            for task in &self.in_progress {
                let mut line = format!("{}: status={}.", task.name, TaskStatus::InProgress);
                if task.idle_hours > 0 {
                    write!(line, " since_last_job_status_change={}h.", task.idle_hours).ok();
                }
                let jobs: Vec<String> = task
                    .job_stat
                    .iter()
                    .map(|(status, count)| format!("{count} {status}"))
                    .collect();
                if !jobs.is_empty() {
                    write!(line, " {}.", jobs.join(", ")).ok();
                }
                line.push_str(&url_suffix(task.dashboard_url.as_deref()));
                writeln!(out, "{line}").ok();
            }
        }

        if !self.unknown.is_empty() {
            writeln!(out, "Tasks with unknown status:").ok();
            for task in &self.unknown {
                writeln!(
                    out,
                    "{}: {}. {}",
                    task.name,
                    task.parse_error.as_deref().unwrap_or("status could not be parsed"),
                    task.last_log.as_deref().unwrap_or("")
                )
                .ok();
            }
        }
        if !self.waiting_for_recovery.is_empty() {
            writeln!(
                out,
                "Tasks waiting for recovery: {}",
                join_names(&self.waiting_for_recovery)
            )
            .ok();
        }
        if !self.tape_recall.is_empty() {
            writeln!(
                out,
                "Tasks waiting for a tape recall to complete: {}",
                join_names(&self.tape_recall)
            )
            .ok();
        }
        if !self.failed.is_empty() {
            writeln!(
                out,
                "Failed tasks that require manual intervention: {}",
                join_names(&self.failed)
            )
            .ok();
        }

        out
    }
}

fn url_suffix(url: Option<&str>) -> String {
    url.map(|u| format!(" {u}")).unwrap_or_default()
}

fn join_names(names: &[TaskName]) -> String {
    names
        .iter()
        .map(TaskName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
