//! SQLite-backed task store — survives restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use caredesk_core::{CareDeskError, Result};

use crate::store::TaskStore;
use crate::task::{ScheduledTask, TaskOutcome, TaskPhase, TaskStatus};

/// SQLite persistence for scheduled tasks.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CareDeskError::Store(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CareDeskError::Store(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CareDeskError::Store("scheduler db mutex poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                schedule_expression TEXT NOT NULL,
                retry_expression TEXT,
                status TEXT NOT NULL,
                phase TEXT NOT NULL,
                last_outcome TEXT,
                last_fire_time INTEGER,
                last_cycle_time INTEGER,
                next_fire_time INTEGER,
                last_execution_time INTEGER,
                execution_count INTEGER NOT NULL DEFAULT 0,
                cycle_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                suspension_count INTEGER NOT NULL DEFAULT 0,
                resumption_count INTEGER NOT NULL DEFAULT 0,
                max_retry_limit INTEGER NOT NULL DEFAULT 0,
                handler TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due
                ON scheduled_tasks(status, phase, next_fire_time);
            CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_handler
                ON scheduled_tasks(handler);
         ",
            )
            .map_err(|e| CareDeskError::Store(format!("Migration: {e}")))?;
        Ok(())
    }
}

impl TaskStore for SchedulerDb {
    fn find_due_batch(
        &self,
        status: TaskStatus,
        phase: TaskPhase,
        before: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM scheduled_tasks
                 WHERE status = ?1 AND phase = ?2 AND next_fire_time <= ?3
                 LIMIT ?4",
            )
            .map_err(|e| CareDeskError::Store(format!("Due query: {e}")))?;
        let rows = stmt
            .query_map(
                rusqlite::params![status.as_str(), phase.as_str(), before, limit as i64],
                row_to_task,
            )
            .map_err(|e| CareDeskError::Store(format!("Due query: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CareDeskError::Store(format!("Due query: {e}")))
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM scheduled_tasks WHERE id = ?1")
            .map_err(|e| CareDeskError::Store(format!("Find task: {e}")))?;
        let mut rows = stmt
            .query_map([id], row_to_task)
            .map_err(|e| CareDeskError::Store(format!("Find task: {e}")))?;
        match rows.next() {
            None => Ok(None),
            Some(row) => row
                .map(Some)
                .map_err(|e| CareDeskError::Store(format!("Find task: {e}"))),
        }
    }

    fn create(&self, task: &ScheduledTask) -> Result<()> {
        self.save(task)
    }

    fn save(&self, task: &ScheduledTask) -> Result<()> {
        let data = serde_json::to_string(&task.data)
            .map_err(|e| CareDeskError::Store(format!("Serialize task data: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO scheduled_tasks
                 (id, schedule_expression, retry_expression, status, phase, last_outcome,
                  last_fire_time, last_cycle_time, next_fire_time, last_execution_time,
                  execution_count, cycle_count, success_count, failure_count, retry_count,
                  suspension_count, resumption_count, max_retry_limit, handler, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21)",
                rusqlite::params![
                    task.id,
                    task.schedule_expression,
                    task.retry_expression,
                    task.status.as_str(),
                    task.phase.as_str(),
                    task.last_outcome.map(TaskOutcome::as_str),
                    task.last_fire_time,
                    task.last_cycle_time,
                    task.next_fire_time,
                    task.last_execution_time,
                    task.execution_count,
                    task.cycle_count,
                    task.success_count,
                    task.failure_count,
                    task.retry_count,
                    task.suspension_count,
                    task.resumption_count,
                    task.max_retry_limit,
                    task.handler,
                    data,
                    task.created_at,
                ],
            )
            .map_err(|e| CareDeskError::Store(format!("Save task: {e}")))?;
        Ok(())
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let status_str: String = row.get("status")?;
    let phase_str: String = row.get("phase")?;
    let outcome_str: Option<String> = row.get("last_outcome")?;
    let data_str: String = row.get("data")?;

    let data: HashMap<String, String> = serde_json::from_str(&data_str).unwrap_or_default();

    Ok(ScheduledTask {
        id: row.get("id")?,
        schedule_expression: row.get("schedule_expression")?,
        retry_expression: row.get("retry_expression")?,
        // Unknown values park the task where an operator will notice.
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Suspended),
        phase: TaskPhase::parse(&phase_str).unwrap_or(TaskPhase::Paused),
        last_outcome: outcome_str.as_deref().and_then(TaskOutcome::parse),
        last_fire_time: row.get("last_fire_time")?,
        last_cycle_time: row.get("last_cycle_time")?,
        next_fire_time: row.get("next_fire_time")?,
        last_execution_time: row.get("last_execution_time")?,
        execution_count: row.get("execution_count")?,
        cycle_count: row.get("cycle_count")?,
        success_count: row.get("success_count")?,
        failure_count: row.get("failure_count")?,
        retry_count: row.get("retry_count")?,
        suspension_count: row.get("suspension_count")?,
        resumption_count: row.get("resumption_count")?,
        max_retry_limit: row.get("max_retry_limit")?,
        handler: row.get("handler")?,
        data,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> ScheduledTask {
        let mut task = ScheduledTask::recurring(
            "session-generation",
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            1_000,
        )
        .with_retry("DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1;COUNT=3", 3)
        .with_data("schedule_id", "s-42");
        task.status = TaskStatus::Active;
        task.phase = TaskPhase::Recurring;
        task.next_fire_time = Some(5_000);
        task.last_outcome = Some(TaskOutcome::SuccessNext);
        task.execution_count = 2;
        task
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let task = sample_task();
        db.save(&task).unwrap();

        let loaded = db.find_by_id(&task.id).unwrap().unwrap();
        assert_eq!(loaded.schedule_expression, task.schedule_expression);
        assert_eq!(loaded.retry_expression, task.retry_expression);
        assert_eq!(loaded.status, TaskStatus::Active);
        assert_eq!(loaded.phase, TaskPhase::Recurring);
        assert_eq!(loaded.last_outcome, Some(TaskOutcome::SuccessNext));
        assert_eq!(loaded.next_fire_time, Some(5_000));
        assert_eq!(loaded.execution_count, 2);
        assert_eq!(loaded.data.get("schedule_id").map(String::as_str), Some("s-42"));
    }

    #[test]
    fn test_due_batch_query() {
        let db = SchedulerDb::open_in_memory().unwrap();
        for i in 0..4 {
            let mut task = sample_task();
            task.id = format!("t-{i}");
            task.next_fire_time = Some(1_000 * (i + 1));
            db.save(&task).unwrap();
        }
        let mut parked = sample_task();
        parked.id = "t-parked".into();
        parked.status = TaskStatus::Suspended;
        parked.phase = TaskPhase::Paused;
        parked.next_fire_time = None;
        db.save(&parked).unwrap();

        let due = db
            .find_due_batch(TaskStatus::Active, TaskPhase::Recurring, 2_500, 10)
            .unwrap();
        assert_eq!(due.len(), 2);

        let limited = db
            .find_due_batch(TaskStatus::Active, TaskPhase::Recurring, 10_000, 3)
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn test_missing_task() {
        let db = SchedulerDb::open_in_memory().unwrap();
        assert!(db.find_by_id("nope").unwrap().is_none());
    }
}
