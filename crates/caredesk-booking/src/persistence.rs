//! SQLite-backed schedule and session stores.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use caredesk_core::{CareDeskError, Result};

use crate::schedule::{Schedule, ScheduleCycle, ScheduleStatus};
use crate::session::Session;
use crate::store::{ScheduleStore, SessionStore};

/// SQLite persistence for schedules and sessions. Can share a database file
/// with the scheduler's task store.
pub struct BookingDb {
    conn: Mutex<Connection>,
}

impl BookingDb {
    /// Open or create the booking database.
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
            .map_err(|_| CareDeskError::Store("booking db mutex poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                recurring_rule TEXT NOT NULL,
                max_allowed INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                next_generation_time INTEGER NOT NULL DEFAULT 0,
                cycle TEXT NOT NULL DEFAULT 'initial',
                task_id TEXT,
                professional_id TEXT,
                organization_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                start INTEGER NOT NULL,
                max_allowed INTEGER NOT NULL,
                booked INTEGER NOT NULL DEFAULT 0,
                professional_id TEXT,
                organization_id TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_schedule ON sessions(schedule_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start);
         ",
            )
            .map_err(|e| CareDeskError::Store(format!("Migration: {e}")))?;
        Ok(())
    }
}

impl ScheduleStore for BookingDb {
    fn find_by_id(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM schedules WHERE id = ?1")
            .map_err(|e| CareDeskError::Store(format!("Find schedule: {e}")))?;
        let mut rows = stmt
            .query_map([id], row_to_schedule)
            .map_err(|e| CareDeskError::Store(format!("Find schedule: {e}")))?;
        match rows.next() {
            None => Ok(None),
            Some(row) => row
                .map(Some)
                .map_err(|e| CareDeskError::Store(format!("Find schedule: {e}"))),
        }
    }

    fn create(&self, schedule: &Schedule) -> Result<()> {
        self.save(schedule)
    }

    fn save(&self, schedule: &Schedule) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO schedules
                 (id, recurring_rule, max_allowed, status, next_generation_time, cycle,
                  task_id, professional_id, organization_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    schedule.id,
                    schedule.recurring_rule,
                    schedule.max_allowed,
                    schedule.status.as_str(),
                    schedule.next_generation_time,
                    schedule.cycle.as_str(),
                    schedule.task_id,
                    schedule.professional_id,
                    schedule.organization_id,
                ],
            )
            .map_err(|e| CareDeskError::Store(format!("Save schedule: {e}")))?;
        Ok(())
    }
}

impl SessionStore for BookingDb {
    fn create(&self, session: &Session) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO sessions
                 (id, schedule_id, start, max_allowed, booked, professional_id, organization_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    session.id,
                    session.schedule_id,
                    session.start,
                    session.max_allowed,
                    session.booked,
                    session.professional_id,
                    session.organization_id,
                ],
            )
            .map_err(|e| CareDeskError::Store(format!("Create session: {e}")))?;
        Ok(())
    }

    fn list_for_schedule(&self, schedule_id: &str) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE schedule_id = ?1 ORDER BY start")
            .map_err(|e| CareDeskError::Store(format!("List sessions: {e}")))?;
        let rows = stmt
            .query_map([schedule_id], row_to_session)
            .map_err(|e| CareDeskError::Store(format!("List sessions: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CareDeskError::Store(format!("List sessions: {e}")))
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let status_str: String = row.get("status")?;
    let cycle_str: String = row.get("cycle")?;
    Ok(Schedule {
        id: row.get("id")?,
        recurring_rule: row.get("recurring_rule")?,
        max_allowed: row.get("max_allowed")?,
        status: ScheduleStatus::parse(&status_str).unwrap_or(ScheduleStatus::Draft),
        next_generation_time: row.get("next_generation_time")?,
        cycle: ScheduleCycle::parse(&cycle_str).unwrap_or(ScheduleCycle::Initial),
        task_id: row.get("task_id")?,
        professional_id: row.get("professional_id")?,
        organization_id: row.get("organization_id")?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get("id")?,
        schedule_id: row.get("schedule_id")?,
        start: row.get("start")?,
        max_allowed: row.get("max_allowed")?,
        booked: row.get("booked")?,
        professional_id: row.get("professional_id")?,
        organization_id: row.get("organization_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_round_trip() {
        let db = BookingDb::open_in_memory().unwrap();
        let mut schedule =
            Schedule::new("DTSTART=20250101T060000Z;FREQ=DAILY", 5, "org-1").activated();
        schedule.next_generation_time = 42;
        schedule.cycle = ScheduleCycle::Active;
        schedule.task_id = Some("t-1".into());
        ScheduleStore::create(&db, &schedule).unwrap();

        let loaded = db.find_by_id(&schedule.id).unwrap().unwrap();
        assert_eq!(loaded.recurring_rule, schedule.recurring_rule);
        assert_eq!(loaded.status, ScheduleStatus::Active);
        assert_eq!(loaded.cycle, ScheduleCycle::Active);
        assert_eq!(loaded.next_generation_time, 42);
        assert_eq!(loaded.task_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_sessions_listed_in_start_order() {
        let db = BookingDb::open_in_memory().unwrap();
        let schedule = Schedule::new("DTSTART=20250101T060000Z;FREQ=DAILY", 5, "org-1");
        ScheduleStore::create(&db, &schedule).unwrap();

        for start in [300, 100, 200] {
            SessionStore::create(&db, &Session::for_schedule(&schedule, start)).unwrap();
        }
        let sessions = db.list_for_schedule(&schedule.id).unwrap();
        let starts: Vec<i64> = sessions.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);

        assert!(db.list_for_schedule("ghost").unwrap().is_empty());
    }
}
