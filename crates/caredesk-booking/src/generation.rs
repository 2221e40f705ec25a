//! Windowed session generation.
//!
//! The driving task fires on a daily re-check schedule; each cycle
//! materializes at most one day-granularity window of sessions and advances
//! the schedule's generation cursor to the first occurrence beyond it. A
//! sliding-range guard skips cycles whose window has run too far ahead of
//! today, which keeps the number of pre-materialized sessions bounded no
//! matter how far the recurrence rule reaches.

use std::sync::Arc;

use async_trait::async_trait;

use caredesk_core::Result;
use caredesk_core::time::{format_utc_compact, now_ms, start_of_utc_day_plus};
use caredesk_rrule::{Rule, RuleMap, RuleParseError};
use caredesk_scheduler::{ScheduledTask, TaskHandler, TaskOutcome};

use crate::schedule::ScheduleCycle;
use crate::session::Session;
use crate::store::{ScheduleStore, SessionStore};

/// Registry key the driving task binds to.
pub const SESSION_GENERATION_HANDLER: &str = "session-generation";

/// Task payload key naming the schedule to materialize.
pub const SCHEDULE_ID_KEY: &str = "schedule_id";

/// Window length per generation cycle, days.
pub const GENERATION_RANGE_DAYS: i64 = 1;

/// Default look-ahead horizon, days.
pub const DEFAULT_SLIDING_RANGE_DAYS: i64 = 20;

/// The deterministic inner/outer split for one generation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowPlan {
    /// Enough sessions already exist inside the sliding range; generate
    /// nothing this cycle.
    Deferred,
    /// Materialize `starts`; `next_cursor` is the first occurrence at or
    /// beyond the window end, `None` when the rule is exhausted.
    Batch { starts: Vec<i64>, next_cursor: Option<i64> },
}

/// Compute the generation window for a schedule rule whose cursor sits at
/// `cursor`. Pure: the same (rule, cursor, now, sliding range) always yields
/// the same split.
pub fn plan_window(
    rule_text: &str,
    cursor: i64,
    now: i64,
    sliding_range_days: i64,
) -> std::result::Result<WindowPlan, RuleParseError> {
    // Always materialize at least through tomorrow, day-granular.
    let end_of_range = start_of_utc_day_plus(now, 1)
        .max(start_of_utc_day_plus(cursor, GENERATION_RANGE_DAYS));

    if GENERATION_RANGE_DAYS == 1
        && end_of_range > start_of_utc_day_plus(now, sliding_range_days + 1)
    {
        return Ok(WindowPlan::Deferred);
    }

    let mut map = RuleMap::parse(rule_text);
    map.set("DTSTART", format_utc_compact(cursor));
    let rule = Rule::parse(&map.to_expression())?;

    let mut starts = Vec::new();
    let mut next_cursor = None;
    for ts in rule.occurrences() {
        if ts < end_of_range {
            starts.push(ts);
        } else {
            next_cursor = Some(ts);
            break;
        }
    }

    Ok(WindowPlan::Batch { starts, next_cursor })
}

/// The canonical task handler: expands a schedule's recurrence rule into
/// sessions for the current window and reschedules itself for the next one.
pub struct SessionGenerationHandler {
    schedules: Arc<dyn ScheduleStore>,
    sessions: Arc<dyn SessionStore>,
    sliding_range_days: i64,
}

impl SessionGenerationHandler {
    pub fn new(schedules: Arc<dyn ScheduleStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { schedules, sessions, sliding_range_days: DEFAULT_SLIDING_RANGE_DAYS }
    }

    /// Override the look-ahead horizon.
    pub fn with_sliding_range(mut self, days: i64) -> Self {
        self.sliding_range_days = days;
        self
    }
}

#[async_trait]
impl TaskHandler for SessionGenerationHandler {
    async fn execute(&self, task: &ScheduledTask) -> Result<TaskOutcome> {
        let Some(schedule_id) = task.data.get(SCHEDULE_ID_KEY) else {
            tracing::error!(
                "Task permanent failure: task [{}] carries no {SCHEDULE_ID_KEY}",
                task.id
            );
            return Ok(TaskOutcome::FailureEnd);
        };

        let Some(mut schedule) = self.schedules.find_by_id(schedule_id)? else {
            tracing::error!(
                "Task permanent failure: schedule [{schedule_id}] is missing, task retires"
            );
            return Ok(TaskOutcome::FailureEnd);
        };

        let cursor = schedule.next_generation_time;
        let plan = match plan_window(&schedule.recurring_rule, cursor, now_ms(), self.sliding_range_days)
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(
                    "Task permanent failure: recurrence rule error on schedule [{}]: {e}",
                    schedule.id
                );
                return Ok(TaskOutcome::FailureEnd);
            }
        };

        let WindowPlan::Batch { starts, next_cursor } = plan else {
            tracing::info!(
                "More than enough sessions generated for schedule [{}] in the sliding range, skipping generation",
                schedule.id
            );
            return Ok(TaskOutcome::SuccessNext);
        };

        tracing::debug!(
            "Generating sessions for schedule [{}] from [{}]",
            schedule.id,
            format_utc_compact(cursor)
        );

        let mut generated = 0usize;
        for start in starts {
            let session = Session::for_schedule(&schedule, start);
            match self.sessions.create(&session) {
                Ok(()) => generated += 1,
                // Individual slot failures never abort the batch.
                Err(e) => tracing::error!(
                    "Failed to generate session for schedule [{}], cause [{e}]",
                    schedule.id
                ),
            }
        }

        match next_cursor {
            Some(next) => {
                schedule.next_generation_time = next;
                schedule.cycle = ScheduleCycle::Active;
                self.schedules.save(&schedule)?;
                tracing::debug!("Task success next: generated [{generated}] sessions");
                Ok(TaskOutcome::SuccessNext)
            }
            None => {
                schedule.cycle = ScheduleCycle::Completed;
                self.schedules.save(&schedule)?;
                tracing::debug!("Task success end: generated [{generated}] sessions");
                Ok(TaskOutcome::SuccessEnd)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Schedule;
    use crate::store::{InMemoryScheduleStore, InMemorySessionStore};
    use caredesk_core::time::{MS_PER_DAY, parse_utc_compact};

    fn ts(text: &str) -> i64 {
        parse_utc_compact(text).unwrap()
    }

    #[test]
    fn test_plan_covers_through_tomorrow() {
        // Cursor today, one daily occurrence lands inside the window.
        let plan = plan_window(
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            ts("20250101T060000Z"),
            ts("20250101T003000Z"),
            DEFAULT_SLIDING_RANGE_DAYS,
        )
        .unwrap();
        assert_eq!(
            plan,
            WindowPlan::Batch {
                starts: vec![ts("20250101T060000Z")],
                next_cursor: Some(ts("20250102T060000Z")),
            }
        );
    }

    #[test]
    fn test_plan_catches_up_a_stale_cursor() {
        // Cursor five days behind "now": the window stretches to tomorrow
        // and every missed occurrence lands inside it.
        let plan = plan_window(
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            ts("20250101T060000Z"),
            ts("20250106T003000Z"),
            DEFAULT_SLIDING_RANGE_DAYS,
        )
        .unwrap();
        match plan {
            WindowPlan::Batch { starts, next_cursor } => {
                assert_eq!(starts.len(), 6); // Jan 1..=Jan 6
                assert_eq!(next_cursor, Some(ts("20250107T060000Z")));
            }
            WindowPlan::Deferred => panic!("expected a batch"),
        }
    }

    #[test]
    fn test_plan_defers_beyond_sliding_range() {
        // Cursor 30 days ahead of now with a 20-day horizon: backpressure.
        let plan = plan_window(
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            ts("20250131T060000Z"),
            ts("20250101T003000Z"),
            DEFAULT_SLIDING_RANGE_DAYS,
        )
        .unwrap();
        assert_eq!(plan, WindowPlan::Deferred);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let args = (
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            ts("20250103T060000Z"),
            ts("20250103T100000Z"),
            DEFAULT_SLIDING_RANGE_DAYS,
        );
        let first = plan_window(args.0, args.1, args.2, args.3).unwrap();
        let second = plan_window(args.0, args.1, args.2, args.3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_exhausted_rule_has_no_next_cursor() {
        let plan = plan_window(
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1;COUNT=2",
            ts("20250101T060000Z"),
            ts("20250102T003000Z"),
            DEFAULT_SLIDING_RANGE_DAYS,
        )
        .unwrap();
        match plan {
            WindowPlan::Batch { starts, next_cursor } => {
                assert_eq!(starts.len(), 2);
                assert_eq!(next_cursor, None);
            }
            WindowPlan::Deferred => panic!("expected a batch"),
        }
    }

    #[test]
    fn test_plan_rejects_malformed_rule() {
        assert!(plan_window("FREQ=!!", ts("20250101T060000Z"), 0, 20).is_err());
    }

    fn handler_fixture(
        schedule: &Schedule,
    ) -> (SessionGenerationHandler, Arc<InMemoryScheduleStore>, Arc<InMemorySessionStore>) {
        let schedules = Arc::new(InMemoryScheduleStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        schedules.create(schedule).unwrap();
        let handler = SessionGenerationHandler::new(schedules.clone(), sessions.clone());
        (handler, schedules, sessions)
    }

    fn driving_task(schedule: &Schedule) -> ScheduledTask {
        ScheduledTask::recurring(
            SESSION_GENERATION_HANDLER,
            "DTSTART=20250101T000000Z;FREQ=DAILY;INTERVAL=1",
            0,
        )
        .with_data(SCHEDULE_ID_KEY, &schedule.id)
    }

    #[tokio::test]
    async fn test_handler_generates_and_advances_cursor() {
        // Rule anchored at "now" so the cursor sits inside the window.
        let now = now_ms();
        let rule = format!("DTSTART={};FREQ=DAILY;INTERVAL=1", format_utc_compact(now));
        let mut schedule = Schedule::new(&rule, 5, "org-1").activated();
        schedule.next_generation_time = now;

        let (handler, schedules, sessions) = handler_fixture(&schedule);
        let outcome = handler.execute(&driving_task(&schedule)).await.unwrap();

        assert_eq!(outcome, TaskOutcome::SuccessNext);
        let saved = schedules.find_by_id(&schedule.id).unwrap().unwrap();
        assert_eq!(saved.cycle, ScheduleCycle::Active);
        assert!(saved.next_generation_time > now);
        let generated = sessions.list_for_schedule(&schedule.id).unwrap();
        assert!(!generated.is_empty());
        assert!(generated.iter().all(|s| s.start < saved.next_generation_time));
    }

    #[tokio::test]
    async fn test_handler_retires_when_rule_is_exhausted() {
        let now = now_ms();
        let rule = format!("DTSTART={};FREQ=DAILY;COUNT=1", format_utc_compact(now));
        let mut schedule = Schedule::new(&rule, 5, "org-1").activated();
        schedule.next_generation_time = now;

        let (handler, schedules, sessions) = handler_fixture(&schedule);
        let outcome = handler.execute(&driving_task(&schedule)).await.unwrap();

        assert_eq!(outcome, TaskOutcome::SuccessEnd);
        let saved = schedules.find_by_id(&schedule.id).unwrap().unwrap();
        assert_eq!(saved.cycle, ScheduleCycle::Completed);
        assert_eq!(sessions.list_for_schedule(&schedule.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_skips_when_far_ahead() {
        let now = now_ms();
        let rule = format!("DTSTART={};FREQ=DAILY;INTERVAL=1", format_utc_compact(now));
        let mut schedule = Schedule::new(&rule, 5, "org-1").activated();
        schedule.next_generation_time = now + 30 * MS_PER_DAY;

        let (handler, schedules, sessions) = handler_fixture(&schedule);
        let outcome = handler.execute(&driving_task(&schedule)).await.unwrap();

        assert_eq!(outcome, TaskOutcome::SuccessNext);
        assert!(sessions.is_empty());
        // Cursor untouched.
        let saved = schedules.find_by_id(&schedule.id).unwrap().unwrap();
        assert_eq!(saved.next_generation_time, now + 30 * MS_PER_DAY);
    }

    #[tokio::test]
    async fn test_handler_fails_permanently_on_missing_schedule() {
        let schedules = Arc::new(InMemoryScheduleStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let handler = SessionGenerationHandler::new(schedules, sessions);

        let task = ScheduledTask::recurring(
            SESSION_GENERATION_HANDLER,
            "DTSTART=20250101T000000Z;FREQ=DAILY",
            0,
        )
        .with_data(SCHEDULE_ID_KEY, "ghost");
        assert_eq!(handler.execute(&task).await.unwrap(), TaskOutcome::FailureEnd);
    }

    #[tokio::test]
    async fn test_handler_fails_permanently_on_malformed_rule() {
        let now = now_ms();
        let mut schedule = Schedule::new("not-a-rule", 5, "org-1").activated();
        schedule.next_generation_time = now;
        let (handler, _, sessions) = handler_fixture(&schedule);

        let outcome = handler.execute(&driving_task(&schedule)).await.unwrap();
        assert_eq!(outcome, TaskOutcome::FailureEnd);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_handler_fails_permanently_without_payload() {
        let schedule = Schedule::new("DTSTART=20250101T060000Z;FREQ=DAILY", 5, "org-1");
        let (handler, _, _) = handler_fixture(&schedule);
        let task = ScheduledTask::recurring(
            SESSION_GENERATION_HANDLER,
            "DTSTART=20250101T000000Z;FREQ=DAILY",
            0,
        );
        assert_eq!(handler.execute(&task).await.unwrap(), TaskOutcome::FailureEnd);
    }
}
