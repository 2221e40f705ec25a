//! Session — a concrete bookable slot materialized from a schedule.

use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

/// One bookable slot. Created only by the materialization machinery, never
/// directly by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub schedule_id: String,
    /// Slot start, epoch ms.
    pub start: i64,
    pub max_allowed: u32,
    /// Bookings taken so far; seeded at zero.
    pub booked: u32,
    pub professional_id: Option<String>,
    pub organization_id: String,
}

impl Session {
    /// Stamp a session out of its owning schedule at `start`.
    pub fn for_schedule(schedule: &Schedule, start: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            start,
            max_allowed: schedule.max_allowed,
            booked: 0,
            professional_id: schedule.professional_id.clone(),
            organization_id: schedule.organization_id.clone(),
        }
    }
}
