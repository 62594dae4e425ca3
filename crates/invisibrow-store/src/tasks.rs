//! Persisted task records with step traces.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{info, warn};

use invisibrow_types::{InvisibrowError, Task, TaskStatus};

use crate::atomic_write;

/// Error recorded on tasks found non-terminal after a process restart.
pub const RESTART_FAILURE_MESSAGE: &str = "task interrupted by process restart";

/// Process-global store of tasks, persisted as a JSON array.
///
/// Runtime state is owned by the scheduler; all durable writes go through
/// this store so step persistence stays causally ordered with execution.
pub struct TaskStore {
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
}

impl TaskStore {
    /// Load tasks from `path` (or start empty), then sweep: any task still
    /// pending or running did not survive the previous process and is
    /// rewritten to failed with [`RESTART_FAILURE_MESSAGE`].
    pub fn load(path: PathBuf) -> Result<Self, InvisibrowError> {
        let mut tasks: Vec<Task> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                InvisibrowError::Store(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                InvisibrowError::Store(format!("invalid task file {}: {e}", path.display()))
            })?
        } else {
            Vec::new()
        };

        let mut swept = 0usize;
        for task in tasks.iter_mut() {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.error = Some(RESTART_FAILURE_MESSAGE.to_string());
                task.completed_at = Some(chrono::Utc::now());
                swept += 1;
            }
        }

        let store = Self {
            path,
            tasks: Mutex::new(tasks),
        };
        if swept > 0 {
            warn!(swept, "rewrote interrupted tasks to failed on load");
            let tasks = store.lock()?;
            store.persist(&tasks)?;
        }
        Ok(store)
    }

    /// Insert and persist a new task.
    pub fn insert(&self, task: Task) -> Result<(), InvisibrowError> {
        let mut tasks = self.lock()?;
        tasks.push(task);
        self.persist(&tasks)
    }

    /// Mutate a task in place and persist. Returns the updated task, or
    /// `None` if the id is unknown.
    pub fn update<F>(&self, id: &str, apply: F) -> Result<Option<Task>, InvisibrowError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.lock()?;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        apply(task);
        let updated = task.clone();
        self.persist(&tasks)?;
        Ok(Some(updated))
    }

    /// Fetch one task by id.
    pub fn get(&self, id: &str) -> Result<Option<Task>, InvisibrowError> {
        Ok(self.lock()?.iter().find(|t| t.id == id).cloned())
    }

    /// All tasks, newest first by creation time.
    pub fn list(&self) -> Result<Vec<Task>, InvisibrowError> {
        let mut tasks = self.lock()?.clone();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// Move a task to a terminal status and persist. Logs and leaves the
    /// task untouched if it is already terminal.
    pub fn finalize(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        url: Option<String>,
        error: Option<String>,
    ) -> Result<Option<Task>, InvisibrowError> {
        let updated = self.update(id, |task| {
            if !task.finalize(status) {
                warn!(task_id = %task.id, status = %task.status, "ignoring duplicate terminal transition");
                return;
            }
            task.result = result;
            task.url = url;
            task.error = error;
        })?;
        if let Some(task) = &updated {
            info!(task_id = %task.id, status = %task.status, "task finalized");
        }
        Ok(updated)
    }

    fn persist(&self, tasks: &[Task]) -> Result<(), InvisibrowError> {
        let json = serde_json::to_string_pretty(tasks)
            .map_err(|e| InvisibrowError::Store(format!("failed to serialize tasks: {e}")))?;
        atomic_write(&self.path, &json)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Task>>, InvisibrowError> {
        self.tasks
            .lock()
            .map_err(|e| InvisibrowError::Store(format!("task lock poisoned: {e}")))
    }
}
