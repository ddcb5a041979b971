//! The ordered set of tasks supervised by one overseer run.

use std::slice;

use async_trait::async_trait;
use tracing::info;

use overseer_core::{CoreError, GridTask, TaskDefinition, TaskError, TaskName};

/// Loads and creates tasks.
#[async_trait]
pub trait TaskFactory: Send + Sync {
    /// Load a task previously created in the work area.
    async fn load(&self, name: &TaskName) -> Result<Box<dyn GridTask>, TaskError>;

    /// Create a new task from its definition and persist it.
    async fn create(&self, definition: &TaskDefinition) -> Result<Box<dyn GridTask>, TaskError>;
}

/// Tasks indexed by name, in the order of the persisted task list.
#[derive(Default)]
pub struct TaskCollection {
    tasks: Vec<Box<dyn GridTask>>,
}

impl TaskCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every named task through the factory.
    pub async fn load(factory: &dyn TaskFactory, names: &[TaskName]) -> Result<Self, TaskError> {
        let mut collection = Self::new();
        for name in names {
            let task = factory.load(name).await?;
            collection.tasks.push(task);
        }
        info!(count = collection.len(), "Loaded tasks");
        Ok(collection)
    }

    /// Add a task. Names must be unique.
    pub fn insert(&mut self, task: Box<dyn GridTask>) -> Result<(), CoreError> {
        if self.contains(task.name()) {
            return Err(CoreError::DuplicateTask(task.name().to_string()));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &TaskName) -> bool {
        self.tasks.iter().any(|t| t.name() == name)
    }

    /// Task names in collection order.
    pub fn names(&self) -> Vec<TaskName> {
        self.tasks.iter().map(|t| t.name().clone()).collect()
    }

    pub fn get(&self, name: &TaskName) -> Option<&dyn GridTask> {
        self.tasks.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, name: &TaskName) -> Option<&mut Box<dyn GridTask>> {
        self.tasks.iter_mut().find(|t| t.name() == name)
    }

    /// Remove a task from the collection.
    pub fn remove(&mut self, name: &TaskName) -> Option<Box<dyn GridTask>> {
        let pos = self.tasks.iter().position(|t| t.name() == name)?;
        Some(self.tasks.remove(pos))
    }

    /// Keep only the tasks for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&dyn GridTask) -> bool) {
        self.tasks.retain(|t| keep(t.as_ref()));
    }

    pub fn iter(&self) -> slice::Iter<'_, Box<dyn GridTask>> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, Box<dyn GridTask>> {
        self.tasks.iter_mut()
    }

    /// Returns true if any task still needs work from the overseer.
    pub fn has_unfinished(&self) -> bool {
        self.tasks.iter().any(|t| !t.status().is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTask;
    use overseer_core::TaskStatus;

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut tasks = TaskCollection::new();
        tasks.insert(Box::new(FakeTask::new("a", TaskStatus::Defined))).unwrap();
        let err = tasks
            .insert(Box::new(FakeTask::new("a", TaskStatus::InProgress)))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTask(_)));
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_has_unfinished() {
        let mut tasks = TaskCollection::new();
        tasks.insert(Box::new(FakeTask::new("a", TaskStatus::Failed))).unwrap();
        tasks
            .insert(Box::new(FakeTask::new("b", TaskStatus::PostProcessingFinished)))
            .unwrap();
        assert!(!tasks.has_unfinished());

        tasks.insert(Box::new(FakeTask::new("c", TaskStatus::CrabFinished))).unwrap();
        assert!(tasks.has_unfinished());
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut tasks = TaskCollection::new();
        for name in ["a", "b", "c"] {
            tasks.insert(Box::new(FakeTask::new(name, TaskStatus::Defined))).unwrap();
        }
        assert!(tasks.remove(&TaskName::from("b")).is_some());
        assert_eq!(tasks.names(), vec![TaskName::from("a"), TaskName::from("c")]);
        assert!(tasks.remove(&TaskName::from("b")).is_none());
    }
}
