//! One-shot actions applied to a selection of tasks.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use overseer_core::{Action, GridTask, StepOutcome, TaskName, TaskOperation, TaskSelection, TaskStatus};

use crate::collection::TaskCollection;
use crate::error::Result;
use crate::store::WorkArea;

/// Applies an [`Action`] to the tasks matching a selection.
pub struct ActionDispatcher<'a> {
    area: &'a WorkArea,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(area: &'a WorkArea) -> Self {
        Self { area }
    }

    /// Apply `action` to every task matching `selection`, in collection order.
    pub async fn apply(
        &self,
        action: Action,
        tasks: &mut TaskCollection,
        selection: &TaskSelection,
    ) -> Result<()> {
        let selected: Vec<TaskName> = tasks
            .iter()
            .filter(|t| selection.matches(t.as_ref()))
            .map(|t| t.name().clone())
            .collect();
        info!(action = %action, selected = selected.len(), "Applying action");

        match action {
            Action::Print => {
                for name in &selected {
                    println!("{name}");
                }
            }
            Action::RunCommand(op) => {
                for name in &selected {
                    if let Some(task) = tasks.get_mut(name) {
                        run_operation(task.as_mut(), op).await?;
                        task.save_cfg().await?;
                        task.save_status().await?;
                    }
                }
            }
            Action::ListFilesToProcess => {
                for name in &selected {
                    if let Some(task) = tasks.get(name) {
                        println!("{name}: files to process");
                        for file in task.files_to_process() {
                            println!("  {file}");
                        }
                    }
                }
            }
            Action::CheckFailed => {
                println!("Checking files availability for failed tasks...");
                for name in &selected {
                    if let Some(task) = tasks.get_mut(name) {
                        if task.status() == TaskStatus::Failed {
                            task.check_files_to_process().await?;
                        }
                    }
                }
            }
            Action::Kill => {
                for name in &selected {
                    if let Some(task) = tasks.get_mut(name) {
                        println!("{name}: sending kill request...");
                        if let Err(e) = task.kill().await {
                            warn!(task = %name, error = %e, "Kill request failed");
                            println!("{name}: error sending kill request. {e}");
                        }
                    }
                }
            }
            Action::Remove => {
                let removed: Vec<_> = selected
                    .iter()
                    .filter_map(|name| tasks.remove(name))
                    .collect();
                // The task list must never name a directory that is gone.
                self.area.save_task_names(&tasks.names())?;
                for task in &removed {
                    println!("{}: removing...", task.name());
                    remove_path(task.work_area())?;
                }
            }
            Action::RemoveFinalOutput => {
                for name in &selected {
                    if let Some(task) = tasks.get(name) {
                        for output in task.outputs() {
                            let path = &output.final_output;
                            println!("{name}: removing final output \"{}\"...", path.display());
                            remove_path(path)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

async fn run_operation(task: &mut dyn GridTask, op: TaskOperation) -> Result<()> {
    let outcome = match op {
        TaskOperation::Submit => task.submit().await?,
        TaskOperation::UpdateStatus => task.update_status().await?,
        TaskOperation::Recover => task.recover().await?,
        TaskOperation::Kill => {
            task.kill().await?;
            StepOutcome::Advanced
        }
        TaskOperation::CheckCompleteness => {
            let complete = task.check_completeness().await?;
            println!("{}: complete = {complete}", task.name());
            StepOutcome::Advanced
        }
        TaskOperation::ReloadStatus => {
            task.update_status_from_file().await?;
            StepOutcome::Advanced
        }
    };
    match outcome {
        StepOutcome::Failed(reason) => println!("{}: {} failed. {reason}", task.name(), op.name()),
        StepOutcome::NeedsLocalWork => {
            println!("{}: {} requires local processing", task.name(), op.name())
        }
        StepOutcome::Advanced => {}
    }
    Ok(())
}

/// Remove a file or a directory tree. Missing paths are ignored.
fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{calls_of, CallLog, FakeTask};
    use overseer_core::TaskOutput;
    use tempfile::TempDir;

    fn collection(tasks: Vec<FakeTask>) -> TaskCollection {
        let mut collection = TaskCollection::new();
        for task in tasks {
            collection.insert(Box::new(task)).unwrap();
        }
        collection
    }

    #[tokio::test]
    async fn test_remove_updates_task_list() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let mut tasks = TaskCollection::new();
        for name in ["a", "b", "c"] {
            let dir = area.task_dir(&TaskName::from(name));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("cfg.json"), "{}").unwrap();
            tasks
                .insert(Box::new(FakeTask::new(name, TaskStatus::Failed).with_work_area(&dir)))
                .unwrap();
        }
        area.save_task_names(&tasks.names()).unwrap();

        let selection: TaskSelection = "name==b".parse().unwrap();
        ActionDispatcher::new(&area)
            .apply(Action::Remove, &mut tasks, &selection)
            .await
            .unwrap();

        assert_eq!(tasks.names(), vec![TaskName::from("a"), TaskName::from("c")]);
        assert!(!area.task_dir(&TaskName::from("b")).exists());
        // A reload only sees the remaining tasks.
        assert_eq!(
            area.load_task_names().unwrap(),
            vec![TaskName::from("a"), TaskName::from("c")]
        );
    }

    #[tokio::test]
    async fn test_remove_failure_keeps_task_list_consistent() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path().join("area")).unwrap();
        let blocker = temp.path().join("file.txt");
        fs::write(&blocker, "not a directory").unwrap();

        let a_dir = area.task_dir(&TaskName::from("a"));
        fs::create_dir_all(&a_dir).unwrap();
        let c_dir = area.task_dir(&TaskName::from("c"));
        fs::create_dir_all(&c_dir).unwrap();
        let mut tasks = collection(vec![
            FakeTask::new("a", TaskStatus::Failed).with_work_area(&a_dir),
            FakeTask::new("b", TaskStatus::Failed).with_work_area(&blocker.join("b")),
            FakeTask::new("c", TaskStatus::Failed).with_work_area(&c_dir),
        ]);
        area.save_task_names(&tasks.names()).unwrap();

        let selection: TaskSelection = "name==a || name==b".parse().unwrap();
        let result = ActionDispatcher::new(&area)
            .apply(Action::Remove, &mut tasks, &selection)
            .await;

        assert!(result.is_err());
        assert!(!a_dir.exists());
        assert!(c_dir.exists());
        assert_eq!(tasks.names(), vec![TaskName::from("c")]);
        assert_eq!(area.load_task_names().unwrap(), vec![TaskName::from("c")]);
    }

    #[tokio::test]
    async fn test_kill_errors_do_not_stop_batch() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let calls = CallLog::default();
        let mut failing = FakeTask::new("a", TaskStatus::InProgress).with_calls(&calls);
        failing.kill_error = Some("connection refused".into());
        let mut tasks = collection(vec![
            failing,
            FakeTask::new("b", TaskStatus::InProgress).with_calls(&calls),
        ]);

        ActionDispatcher::new(&area)
            .apply(Action::Kill, &mut tasks, &TaskSelection::All)
            .await
            .unwrap();

        assert_eq!(calls_of(&calls), vec!["a:kill", "b:kill"]);
        assert_eq!(
            tasks.get(&TaskName::from("b")).unwrap().status(),
            TaskStatus::WaitingForRecovery
        );
    }

    #[tokio::test]
    async fn test_run_cmd_saves_task() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let calls = CallLog::default();
        let mut tasks = collection(vec![
            FakeTask::new("a", TaskStatus::WaitingForRecovery).with_calls(&calls),
            FakeTask::new("b", TaskStatus::InProgress).with_calls(&calls),
        ]);

        let selection: TaskSelection = "status==WaitingForRecovery".parse().unwrap();
        ActionDispatcher::new(&area)
            .apply(
                Action::RunCommand(TaskOperation::Recover),
                &mut tasks,
                &selection,
            )
            .await
            .unwrap();

        assert_eq!(
            calls_of(&calls),
            vec!["a:recover", "a:save_cfg", "a:save_status"]
        );
    }

    #[tokio::test]
    async fn test_check_failed_only_touches_failed_tasks() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path()).unwrap();
        let calls = CallLog::default();
        let mut tasks = collection(vec![
            FakeTask::new("a", TaskStatus::Failed).with_calls(&calls),
            FakeTask::new("b", TaskStatus::InProgress).with_calls(&calls),
        ]);

        ActionDispatcher::new(&area)
            .apply(Action::CheckFailed, &mut tasks, &TaskSelection::All)
            .await
            .unwrap();

        assert_eq!(calls_of(&calls), vec!["a:check_files_to_process"]);
    }

    #[tokio::test]
    async fn test_remove_final_output() {
        let temp = TempDir::new().unwrap();
        let area = WorkArea::open(temp.path().join("area")).unwrap();
        let output_dir = temp.path().join("output");
        fs::create_dir_all(output_dir.join("nested")).unwrap();
        let mut task = FakeTask::new("a", TaskStatus::PostProcessingFinished);
        task.outputs = vec![
            TaskOutput {
                final_output: output_dir.clone(),
            },
            TaskOutput {
                final_output: temp.path().join("missing"),
            },
        ];
        let mut tasks = collection(vec![task]);

        ActionDispatcher::new(&area)
            .apply(Action::RemoveFinalOutput, &mut tasks, &TaskSelection::All)
            .await
            .unwrap();

        assert!(!output_dir.exists());
        assert_eq!(tasks.len(), 1);
    }
}
