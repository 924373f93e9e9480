use crate::{Error, Operation, Result, Task};

/// Ordered set of named tasks. Each task's `enabled` flag decides whether
/// it is part of [`TaskRegistry::selected`].
pub struct TaskRegistry<H> {
    tasks: Vec<Task<H>>,
}

impl<H> TaskRegistry<H> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register an operation under a unique name
    pub fn register<O>(&mut self, name: impl Into<String>, enabled: bool, operation: O) -> Result<()>
    where
        O: Operation<H> + 'static,
    {
        self.register_task(Task::new(name, operation).with_enabled(enabled))
    }

    /// Register a prepared task; fails without touching the registry on a name clash
    pub fn register_task(&mut self, task: Task<H>) -> Result<()> {
        if self.get(&task.name).is_some() {
            return Err(Error::DuplicateTask(task.name));
        }

        tracing::debug!("Registered task: {} (enabled: {})", task.name, task.enabled);
        self.tasks.push(task);

        Ok(())
    }

    /// Enabled tasks in registration order
    pub fn selected(&self) -> Vec<&Task<H>> {
        self.tasks.iter().filter(|task| task.enabled).collect()
    }

    pub fn tasks(&self) -> &[Task<H>] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Task<H>> {
        self.tasks.iter().find(|task| task.name == name)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.name == name)
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))?;

        task.enabled = enabled;
        Ok(())
    }

    /// Enable exactly the named tasks and disable everything else.
    ///
    /// All names are checked before any flag changes.
    pub fn enable_only<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        if let Some(unknown) = names.iter().find(|name| self.get(name.as_ref()).is_none()) {
            return Err(Error::TaskNotFound(unknown.as_ref().to_string()));
        }

        for task in &mut self.tasks {
            task.enabled = names.iter().any(|name| name.as_ref() == task.name);
        }

        Ok(())
    }

    pub fn enable_all(&mut self) {
        for task in &mut self.tasks {
            task.enabled = true;
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<H> Default for TaskRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
