//! Task store contract + in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use caredesk_core::{CareDeskError, Result};

use crate::task::{ScheduledTask, TaskPhase, TaskStatus};

/// Persistence contract the executor polls against.
pub trait TaskStore: Send + Sync {
    /// Up to `limit` tasks with the given status/phase whose `next_fire_time`
    /// is at or before `before`. No ordering guarantee beyond "due".
    fn find_due_batch(
        &self,
        status: TaskStatus,
        phase: TaskPhase,
        before: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>>;

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>>;

    fn create(&self, task: &ScheduledTask) -> Result<()>;

    fn save(&self, task: &ScheduledTask) -> Result<()>;
}

/// HashMap-backed store for tests and embedders that bring their own
/// persistence.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskStore for InMemoryTaskStore {
    fn find_due_batch(
        &self,
        status: TaskStatus,
        phase: TaskPhase,
        before: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|_| CareDeskError::Store("task store mutex poisoned".into()))?;
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == status
                    && t.phase == phase
                    && t.next_fire_time.is_some_and(|fire| fire <= before)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|_| CareDeskError::Store("task store mutex poisoned".into()))?;
        Ok(tasks.get(id).cloned())
    }

    fn create(&self, task: &ScheduledTask) -> Result<()> {
        self.save(task)
    }

    fn save(&self, task: &ScheduledTask) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| CareDeskError::Store("task store mutex poisoned".into()))?;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }
}
