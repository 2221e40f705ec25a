//! Booking store contracts + in-memory implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use caredesk_core::{CareDeskError, Result};

use crate::schedule::Schedule;
use crate::session::Session;

/// Persistence contract for schedules.
pub trait ScheduleStore: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<Schedule>>;
    fn create(&self, schedule: &Schedule) -> Result<()>;
    fn save(&self, schedule: &Schedule) -> Result<()>;
}

/// Persistence contract for sessions.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> Result<()>;
    /// Sessions of one schedule, ordered by start.
    fn list_for_schedule(&self, schedule_id: &str) -> Result<Vec<Session>>;
}

/// HashMap-backed schedule store for tests and embedders.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    schedules: Mutex<HashMap<String, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn find_by_id(&self, id: &str) -> Result<Option<Schedule>> {
        let schedules = self
            .schedules
            .lock()
            .map_err(|_| CareDeskError::Store("schedule store mutex poisoned".into()))?;
        Ok(schedules.get(id).cloned())
    }

    fn create(&self, schedule: &Schedule) -> Result<()> {
        self.save(schedule)
    }

    fn save(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self
            .schedules
            .lock()
            .map_err(|_| CareDeskError::Store("schedule store mutex poisoned".into()))?;
        schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }
}

/// Vec-backed session store for tests and embedders.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<Vec<Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| CareDeskError::Store("session store mutex poisoned".into()))?;
        sessions.push(session.clone());
        Ok(())
    }

    fn list_for_schedule(&self, schedule_id: &str) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| CareDeskError::Store("session store mutex poisoned".into()))?;
        let mut found: Vec<Session> = sessions
            .iter()
            .filter(|s| s.schedule_id == schedule_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.start);
        Ok(found)
    }
}
