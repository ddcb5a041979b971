//! Scheduling loop: runs rounds until every task is done or the user stops it.

use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use tracing::{info, warn};

use crate::collection::TaskCollection;
use crate::error::Result;
use crate::executor::{LocalBatch, LocalExecutor};
use crate::interrupt::{ConsoleInterrupt, SleepOutcome};
use crate::lifecycle::{LifecycleDriver, RoundOutcome};
use crate::process::run_captured;
use crate::publisher::StatusPublisher;

/// State of the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    WaitingInterval,
    Terminated,
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    /// Number of rounds run.
    pub rounds: u32,
    /// True if every task reached a terminal status.
    pub all_done: bool,
}

/// Print a timestamped progress line.
pub fn print_ts(message: &str) {
    println!("[{}] {message}", Local::now().format("%Y-%m-%d %H:%M:%S"));
}

/// Whole minutes left until the next round, if at least one.
pub fn minutes_to_sleep(update_interval_minutes: u64, elapsed: Duration) -> Option<u64> {
    let left = update_interval_minutes as f64 - elapsed.as_secs_f64() / 60.0;
    // Truncates toward zero.
    let left = left as i64;
    (left >= 1).then_some(left as u64)
}

/// Runs rounds of the lifecycle driver.
pub struct SchedulingLoop {
    driver: LifecycleDriver,
    publisher: StatusPublisher,
    executor: Box<dyn LocalExecutor>,
    batch: LocalBatch,
    update_interval_minutes: u64,
    no_loop: bool,
    kinit: Option<String>,
    state: LoopState,
}

impl SchedulingLoop {
    /// Create a loop.
    pub fn new(
        driver: LifecycleDriver,
        publisher: StatusPublisher,
        executor: Box<dyn LocalExecutor>,
        batch: LocalBatch,
        update_interval_minutes: u64,
    ) -> Self {
        Self {
            driver,
            publisher,
            executor,
            batch,
            update_interval_minutes,
            no_loop: false,
            kinit: None,
            state: LoopState::Running,
        }
    }

    /// Stop after the first round.
    pub fn with_no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = no_loop;
        self
    }

    /// Renew the Kerberos ticket with the given `kinit` after each wait.
    pub fn with_kerberos_renewal(mut self, kinit: Option<String>) -> Self {
        self.kinit = kinit;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run rounds until termination.
    pub async fn run(
        &mut self,
        tasks: &mut TaskCollection,
        interrupt: &mut ConsoleInterrupt,
    ) -> Result<LoopSummary> {
        self.state = LoopState::Running;
        let mut rounds = 0;
        loop {
            let started = Instant::now();
            self.run_round(tasks).await?;
            rounds += 1;

            if self.no_loop || !tasks.has_unfinished() {
                break;
            }
            if interrupt.interrupted() {
                print_ts("Exiting...");
                break;
            }

            if let Some(minutes) = minutes_to_sleep(self.update_interval_minutes, started.elapsed())
            {
                self.state = LoopState::WaitingInterval;
                println!();
                print_ts(&format!(
                    "Waiting for {minutes} minutes until the next update. Press return to exit."
                ));
                let outcome = interrupt.sleep(Duration::from_secs(minutes * 60)).await;
                if outcome == SleepOutcome::Interrupted {
                    print_ts("Exiting...");
                    break;
                }
            }
            self.renew_kerberos_ticket().await?;
            self.state = LoopState::Running;
        }
        self.state = LoopState::Terminated;

        let all_done = !tasks.has_unfinished();
        if all_done {
            println!("All tasks are done.");
        }
        info!(rounds, all_done, "Scheduling loop terminated");
        Ok(LoopSummary { rounds, all_done })
    }

    /// Run one round: advance, report, publish and process locally.
    pub async fn run_round(&mut self, tasks: &mut TaskCollection) -> Result<RoundOutcome> {
        print_ts("Updating...");
        let outcome = self.driver.advance(tasks, Utc::now()).await?;
        print!("{}", outcome.report);

        self.publisher.publish(&outcome.status).await?;

        if outcome.has_local_work() {
            if !outcome.to_run_locally.is_empty() {
                print_ts(&format!(
                    "To run on local grid: {}",
                    join(&outcome.to_run_locally)
                ));
            }
            if !outcome.to_post_process.is_empty() {
                print_ts(&format!("Post-processing: {}", join(&outcome.to_post_process)));
            }

            self.executor.run(&self.batch).await?;

            for name in outcome.local_batch() {
                match tasks.get_mut(&name) {
                    Some(task) => task.update_status_from_file().await?,
                    None => warn!(task = %name, "Task of the local batch is gone"),
                }
            }
            print_ts("Local grid processing iteration finished.");
        }
        Ok(outcome)
    }

    async fn renew_kerberos_ticket(&self) -> Result<()> {
        if let Some(kinit) = &self.kinit {
            run_captured(kinit, &["-R"]).await?;
            info!("Renewed Kerberos ticket");
        }
        Ok(())
    }
}

fn join(names: &[overseer_core::TaskName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalProcessingConfig;
    use crate::error::OverseerError;
    use crate::publisher::RemoteCopy;
    use crate::store::WorkArea;
    use crate::testing::{calls_of, CallLog, FakeTask};
    use async_trait::async_trait;
    use overseer_core::{StepOutcome, TaskStatus};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Default, Clone)]
    struct RecordingExecutor {
        runs: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl LocalExecutor for RecordingExecutor {
        async fn run(&self, _batch: &LocalBatch) -> Result<()> {
            *self.runs.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct NoCopy;

    #[async_trait]
    impl RemoteCopy for NoCopy {
        async fn copy(&self, _file: &Path, _dest: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl LocalExecutor for FailingExecutor {
        async fn run(&self, _batch: &LocalBatch) -> Result<()> {
            Err(OverseerError::Command {
                command: "law run".to_string(),
                reason: "exit status: 1".to_string(),
            })
        }
    }

    fn loop_with_executor(
        area: &WorkArea,
        executor: Box<dyn LocalExecutor>,
        interval: u64,
    ) -> SchedulingLoop {
        let local: LocalProcessingConfig =
            serde_yaml::from_str("lawTask: T\nworkflow: local\nbootstrap: b.sh\n").unwrap();
        let publisher =
            StatusPublisher::new(area.clone(), None, PathBuf::from("html"), Box::new(NoCopy));
        SchedulingLoop::new(
            LifecycleDriver::default(),
            publisher,
            executor,
            LocalBatch::new(&local, area),
            interval,
        )
    }

    fn scheduling_loop(area: &WorkArea, executor: &RecordingExecutor, interval: u64) -> SchedulingLoop {
        loop_with_executor(area, Box::new(executor.clone()), interval)
    }

    fn finishing_in_two_rounds() -> TaskCollection {
        let mut task = FakeTask::new("a", TaskStatus::Defined);
        task.submit_result = (StepOutcome::Advanced, Some(TaskStatus::InProgress));
        task.update_result = (StepOutcome::Advanced, Some(TaskStatus::PostProcessingFinished));
        collection(vec![task])
    }

    fn collection(tasks: Vec<FakeTask>) -> TaskCollection {
        let mut collection = TaskCollection::new();
        for task in tasks {
            collection.insert(Box::new(task)).unwrap();
        }
        collection
    }

    #[test]
    fn test_minutes_to_sleep() {
        assert_eq!(minutes_to_sleep(60, Duration::from_secs(90)), Some(58));
        assert_eq!(minutes_to_sleep(60, Duration::from_secs(0)), Some(60));
        assert_eq!(minutes_to_sleep(1, Duration::from_secs(1)), None);
        assert_eq!(minutes_to_sleep(10, Duration::from_secs(3600)), None);
    }

    #[tokio::test]
    async fn test_round_without_local_work_skips_executor() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = collection(vec![FakeTask::new("a", TaskStatus::InProgress)]);
        let (_tx, rx) = mpsc::unbounded_channel();

        let summary = scheduling_loop(&area, &executor, 60)
            .with_no_loop(true)
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 1, all_done: false });
        assert_eq!(*executor.runs.lock().unwrap(), 0);
        assert!(area.status_path().is_file());
    }

    #[tokio::test]
    async fn test_local_batch_then_reload_from_file() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let calls = CallLog::default();

        let mut recovering = FakeTask::new("r", TaskStatus::WaitingForRecovery).with_calls(&calls);
        recovering.recover_result = (StepOutcome::NeedsLocalWork, Some(TaskStatus::InProgress));
        recovering.status_from_file = Some(TaskStatus::PostProcessingFinished);
        let mut finished = FakeTask::new("f", TaskStatus::CrabFinished)
            .with_work_area(temp.path())
            .with_calls(&calls);
        finished.status_from_file = Some(TaskStatus::PostProcessingFinished);

        let mut tasks = collection(vec![recovering, finished]);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut scheduler = scheduling_loop(&area, &executor, 60);

        let summary = scheduler
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 1, all_done: true });
        assert_eq!(scheduler.state(), LoopState::Terminated);
        assert_eq!(*executor.runs.lock().unwrap(), 1);
        let calls = calls_of(&calls);
        let reloads: Vec<&String> = calls
            .iter()
            .filter(|c| c.ends_with("update_status_from_file"))
            .collect();
        assert_eq!(reloads, vec!["f:update_status_from_file", "r:update_status_from_file"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_terminates_loop() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = collection(vec![FakeTask::new("a", TaskStatus::InProgress)]);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let summary = scheduling_loop(&area, &executor, 60)
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 1, all_done: false });
    }

    #[tokio::test]
    async fn test_pending_interrupt_stops_loop_without_wait() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = collection(vec![FakeTask::new("a", TaskStatus::InProgress)]);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        // A zero interval never sleeps, so only the check after the round can stop it.
        let mut scheduler = scheduling_loop(&area, &executor, 0);
        let summary = scheduler
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 1, all_done: false });
        assert_eq!(scheduler.state(), LoopState::Terminated);
    }

    #[tokio::test]
    async fn test_executor_failure_stops_round() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let calls = CallLog::default();
        let mut recovering = FakeTask::new("r", TaskStatus::WaitingForRecovery).with_calls(&calls);
        recovering.recover_result = (StepOutcome::NeedsLocalWork, Some(TaskStatus::InProgress));
        recovering.status_from_file = Some(TaskStatus::PostProcessingFinished);
        let mut tasks = collection(vec![recovering]);
        let (_tx, rx) = mpsc::unbounded_channel();

        let err = loop_with_executor(&area, Box::new(FailingExecutor), 60)
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap_err();

        assert!(matches!(err, OverseerError::Command { .. }));
        assert!(calls_of(&calls).iter().any(|c| c == "r:recover"));
        assert!(!calls_of(&calls)
            .iter()
            .any(|c| c.ends_with("update_status_from_file")));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_kerberos_ticket_renewed_between_rounds() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = finishing_in_two_rounds();
        let (_tx, rx) = mpsc::unbounded_channel();

        let summary = scheduling_loop(&area, &executor, 5)
            .with_kerberos_renewal(Some("true".to_string()))
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 2, all_done: true });
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_kerberos_renewal_failure_stops_loop() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = finishing_in_two_rounds();
        let (_tx, rx) = mpsc::unbounded_channel();

        let err = scheduling_loop(&area, &executor, 5)
            .with_kerberos_renewal(Some("false".to_string()))
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap_err();

        assert!(matches!(err, OverseerError::Command { .. }));
        // The second round never ran.
        assert!(tasks.has_unfinished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_tasks_finish() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let executor = RecordingExecutor::default();
        let mut tasks = finishing_in_two_rounds();
        let (_tx, rx) = mpsc::unbounded_channel();

        let summary = scheduling_loop(&area, &executor, 5)
            .run(&mut tasks, &mut ConsoleInterrupt::from_channel(rx))
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { rounds: 2, all_done: true });
    }
}
