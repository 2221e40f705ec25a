//! Schedule orchestration — validation, the synchronous first batch, and
//! hand-off to the driving task.

use std::sync::Arc;

use caredesk_core::time::{MS_PER_DAY, format_utc_compact, now_ms};
use caredesk_core::{CareDeskError, Result};
use caredesk_rrule::Rule;
use caredesk_scheduler::{ScheduledTask, TaskStatus, TaskStore};

use crate::generation::{DEFAULT_SLIDING_RANGE_DAYS, SCHEDULE_ID_KEY, SESSION_GENERATION_HANDLER};
use crate::schedule::{Schedule, ScheduleCycle, ScheduleStatus};
use crate::session::Session;
use crate::store::{ScheduleStore, SessionStore};

/// Normal cycling for the driving task: re-check daily.
const TASK_EXPRESSION: &str = "DTSTART=$DTSTART;FREQ=DAILY;INTERVAL=1";
/// Retry cycling: hourly, three shots.
const TASK_RETRY_EXPRESSION: &str = "DTSTART=$DTSTART;FREQ=HOURLY;INTERVAL=1;COUNT=3";
const TASK_RETRY_MAX_LIMIT: u32 = 3;

/// Cap on the synchronous pass: one year from the first occurrence.
const FIRST_BATCH_CAP_DAYS: i64 = 365;

/// Creates schedules, materializes their first session batch synchronously,
/// and registers the recurring task that continues materialization through
/// the executor.
pub struct ScheduleOrchestrator {
    schedules: Arc<dyn ScheduleStore>,
    sessions: Arc<dyn SessionStore>,
    tasks: Arc<dyn TaskStore>,
    sliding_range_days: i64,
}

impl ScheduleOrchestrator {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        sessions: Arc<dyn SessionStore>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        Self { schedules, sessions, tasks, sliding_range_days: DEFAULT_SLIDING_RANGE_DAYS }
    }

    /// Override the look-ahead horizon (must match the generation handler's).
    pub fn with_sliding_range(mut self, days: i64) -> Self {
        self.sliding_range_days = days;
        self
    }

    /// Create a schedule. `creator` becomes the responsible professional when
    /// none is set. Active schedules are materialized immediately.
    pub fn create(&self, mut schedule: Schedule, creator: Option<&str>) -> Result<Schedule> {
        if schedule.recurring_rule.trim().is_empty()
            || schedule.max_allowed == 0
            || schedule.organization_id.trim().is_empty()
        {
            return Err(CareDeskError::Validation(
                "Missing required fields! - recurring_rule | max_allowed | organization".into(),
            ));
        }

        if schedule.professional_id.is_none() {
            schedule.professional_id = creator.map(str::to_string);
        }

        self.schedules.create(&schedule)?;

        if schedule.status == ScheduleStatus::Active {
            return self.materialize(schedule);
        }
        Ok(schedule)
    }

    /// Update a schedule; re-activation runs a fresh materialization pass.
    pub fn update(&self, schedule: Schedule) -> Result<Schedule> {
        if schedule.recurring_rule.trim().is_empty() || schedule.max_allowed == 0 {
            return Err(CareDeskError::Validation(
                "Missing required fields! - recurring_rule | max_allowed".into(),
            ));
        }

        self.schedules.save(&schedule)?;

        if schedule.status == ScheduleStatus::Active {
            return self.materialize(schedule);
        }
        Ok(schedule)
    }

    /// One synchronous pass: create every session inside the sliding range,
    /// then hand the rest to a driving task.
    fn materialize(&self, mut schedule: Schedule) -> Result<Schedule> {
        tracing::debug!("Generating sessions for schedule [{}]", schedule.id);

        let rule = Rule::parse(&schedule.recurring_rule).map_err(|e| {
            CareDeskError::Validation(format!("Error occurred while generating sessions [{e}]"))
        })?;

        // Expand up to one year past the first occurrence.
        let mut starts: Vec<i64> = Vec::new();
        for ts in rule.occurrences() {
            if let Some(first) = starts.first() {
                if ts > first + FIRST_BATCH_CAP_DAYS * MS_PER_DAY {
                    break;
                }
            }
            starts.push(ts);
        }

        let Some(&first) = starts.first() else {
            tracing::error!("Given rule [{}] has zero dates", schedule.recurring_rule);
            return Err(CareDeskError::Validation(
                "Given recurrence rule has zero dates!".into(),
            ));
        };

        let divider = first + self.sliding_range_days * MS_PER_DAY;
        let next_batch_start = starts.iter().copied().find(|ts| *ts >= divider);

        let mut generated = 0usize;
        for start in starts.iter().copied().filter(|ts| *ts < divider) {
            match self.sessions.create(&Session::for_schedule(&schedule, start)) {
                Ok(()) => generated += 1,
                Err(e) => tracing::error!(
                    "Session creation failure for schedule [{}], cause [{e}]",
                    schedule.id
                ),
            }
        }
        tracing::debug!(
            "Generated first batch of [{generated}] sessions for schedule [{}]",
            schedule.id
        );

        match next_batch_start {
            Some(cursor) => {
                // Later occurrences continue asynchronously: register the
                // driving task and drive it straight to (active, recurring).
                let now = now_ms();
                let dtstart = format_utc_compact(now);
                let mut task = ScheduledTask::recurring(
                    SESSION_GENERATION_HANDLER,
                    &TASK_EXPRESSION.replace("$DTSTART", &dtstart),
                    now,
                )
                .with_retry(
                    &TASK_RETRY_EXPRESSION.replace("$DTSTART", &dtstart),
                    TASK_RETRY_MAX_LIMIT,
                )
                .with_data(SCHEDULE_ID_KEY, &schedule.id);
                task.move_to_next_state(TaskStatus::Active, None, now);
                self.tasks.create(&task)?;

                schedule.task_id = Some(task.id.clone());
                schedule.next_generation_time = cursor;
                schedule.cycle = ScheduleCycle::Active;
                self.schedules.save(&schedule)?;
                tracing::debug!("Created scheduled task [{}] for remaining sessions", task.id);
                Ok(schedule)
            }
            None => {
                schedule.cycle = ScheduleCycle::Completed;
                self.schedules.save(&schedule)?;
                tracing::debug!(
                    "No scheduled task needed for schedule [{}], the first batch covers the whole rule",
                    schedule.id
                );
                Ok(schedule)
            }
        }
    }
}
