//! Pure task state transitions.
//!
//! The transition table lives here as a single pure function over the
//! combined `(status, phase)` states: given the current state, the requested
//! status, and an optional execution outcome, it returns the next state plus
//! an [`Effects`] record describing every counter and field update. The
//! entity applies the effects; nothing in here mutates.
//!
//! Callers must serialize transitions per task — the executor dispatches at
//! most one at a time.

use caredesk_core::time::format_utc_compact;
use caredesk_rrule::find_next;

use crate::task::{TaskOutcome, TaskPhase, TaskStatus};

/// The combined `(status, phase)` states the scheduler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Just created, never scheduled.
    InitialFresh,
    /// Dispatch-eligible on the normal schedule.
    ActiveRecurring,
    /// Dispatch-eligible on the retry schedule.
    ActiveRecurringRetry,
    /// Ran out of occurrences or retired by an end outcome; still `active`
    /// status, which distinguishes it from explicit termination.
    ActiveFinished,
    SuspendedPaused,
    /// Absorbing.
    TerminatedFinished,
}

impl TaskState {
    pub fn status(self) -> TaskStatus {
        match self {
            TaskState::InitialFresh => TaskStatus::Initial,
            TaskState::ActiveRecurring
            | TaskState::ActiveRecurringRetry
            | TaskState::ActiveFinished => TaskStatus::Active,
            TaskState::SuspendedPaused => TaskStatus::Suspended,
            TaskState::TerminatedFinished => TaskStatus::Terminated,
        }
    }

    pub fn phase(self) -> TaskPhase {
        match self {
            TaskState::InitialFresh => TaskPhase::Fresh,
            TaskState::ActiveRecurring => TaskPhase::Recurring,
            TaskState::ActiveRecurringRetry => TaskPhase::RecurringRetry,
            TaskState::ActiveFinished | TaskState::TerminatedFinished => TaskPhase::Finished,
            TaskState::SuspendedPaused => TaskPhase::Paused,
        }
    }
}

/// Everything a transition decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInput<'a> {
    pub state: TaskState,
    pub requested: TaskStatus,
    pub outcome: Option<TaskOutcome>,
    /// Epoch ms "now" — occurrence searches are anchored here.
    pub now: i64,
    pub schedule_expression: &'a str,
    pub retry_expression: Option<&'a str>,
    pub next_fire_time: Option<i64>,
    pub last_cycle_time: Option<i64>,
    pub retry_count: u32,
    pub max_retry_limit: u32,
}

/// Field updates a transition asks the entity to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    /// One execution consumed: bump `execution_count`, move `next_fire_time`
    /// into `last_fire_time`, stamp `last_execution_time`.
    pub executed: bool,
    /// A normal cycle completed: bump `cycle_count`, refresh `last_cycle_time`.
    pub cycled: bool,
    pub succeeded: bool,
    pub failed: bool,
    pub suspended: bool,
    pub resumed: bool,
    /// New `retry_count` value, when it changes.
    pub retry_count: Option<u32>,
    /// Retry expression rebased onto the latest cycle anchor.
    pub rebased_retry_expression: Option<String>,
    pub record_outcome: Option<TaskOutcome>,
}

/// A computed transition: target state, due time, effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: TaskState,
    pub next_fire_time: Option<i64>,
    pub effects: Effects,
}

/// The transition table.
pub fn transition(input: &TransitionInput<'_>) -> Transition {
    match input.state {
        TaskState::InitialFresh => match input.requested {
            TaskStatus::Active => advance_normal(input, Effects::default()),
            TaskStatus::Suspended => suspend(),
            TaskStatus::Terminated => terminate(),
            TaskStatus::Initial => unchanged(input),
        },
        TaskState::ActiveRecurring | TaskState::ActiveRecurringRetry | TaskState::ActiveFinished => {
            match input.requested {
                TaskStatus::Suspended => suspend(),
                TaskStatus::Terminated => terminate(),
                TaskStatus::Active => match input.outcome {
                    Some(outcome) => execute_cycle(input, outcome),
                    None => unchanged(input),
                },
                TaskStatus::Initial => unchanged(input),
            }
        }
        TaskState::SuspendedPaused => match input.requested {
            TaskStatus::Terminated => terminate(),
            TaskStatus::Active => {
                let fx = Effects { resumed: true, ..Effects::default() };
                advance_normal(input, fx)
            }
            _ => unchanged(input),
        },
        TaskState::TerminatedFinished => unchanged(input),
    }
}

/// One execution cycle: book the execution, then dispatch on the outcome.
fn execute_cycle(input: &TransitionInput<'_>, outcome: TaskOutcome) -> Transition {
    let mut fx = Effects {
        executed: true,
        cycled: input.state == TaskState::ActiveRecurring,
        record_outcome: Some(outcome),
        ..Effects::default()
    };
    match outcome {
        TaskOutcome::SuccessNext => {
            fx.succeeded = true;
            advance_normal(input, fx)
        }
        TaskOutcome::SuccessEnd => {
            fx.succeeded = true;
            finish(fx)
        }
        TaskOutcome::FailureRetry => {
            fx.failed = true;
            advance_retry(input, fx)
        }
        TaskOutcome::FailureEnd => {
            fx.failed = true;
            finish(fx)
        }
    }
}

/// Next occurrence of the normal schedule strictly after now, or retire.
fn advance_normal(input: &TransitionInput<'_>, fx: Effects) -> Transition {
    let next = match find_next(input.schedule_expression, input.now) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(
                "Schedule expression [{}] no longer parses ({e}), task will finish",
                input.schedule_expression
            );
            None
        }
    };
    match next {
        Some(next_fire) => Transition {
            state: TaskState::ActiveRecurring,
            next_fire_time: Some(next_fire),
            effects: fx,
        },
        None => finish(fx),
    }
}

/// Decide between a retry cycle and falling back to the normal schedule.
///
/// The retry expression is rebased (`DTSTART` := latest cycle anchor) and the
/// retry only wins while the budget allows it, a retry date exists, and the
/// normal schedule would not fire sooner. Ties go to the normal cycle; a
/// missing normal date means the retry always wins.
fn advance_retry(input: &TransitionInput<'_>, mut fx: Effects) -> Transition {
    let Some(retry_expression) = input.retry_expression else {
        return advance_normal(input, fx);
    };
    let Some(rest) = split_after_dtstart(retry_expression) else {
        return advance_normal(input, fx);
    };

    // The cycle anchor: the normal fire just consumed, else the recorded one,
    // else now.
    let anchor = if fx.cycled { input.next_fire_time } else { input.last_cycle_time };
    let anchor = anchor.unwrap_or(input.now);
    let rebased = format!("DTSTART={};{rest}", format_utc_compact(anchor));

    let next_retry = find_next(&rebased, input.now).ok().flatten();
    let next_normal = find_next(input.schedule_expression, input.now).ok().flatten();
    fx.rebased_retry_expression = Some(rebased);

    let within_budget = input.retry_count + 1 <= input.max_retry_limit;
    let retry_sooner = match (next_normal, next_retry) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(normal), Some(retry)) => normal > retry,
    };

    if within_budget && retry_sooner {
        fx.retry_count = Some(input.retry_count + 1);
        Transition {
            state: TaskState::ActiveRecurringRetry,
            next_fire_time: next_retry,
            effects: fx,
        }
    } else {
        fx.retry_count = Some(0);
        advance_normal(input, fx)
    }
}

fn suspend() -> Transition {
    Transition {
        state: TaskState::SuspendedPaused,
        next_fire_time: None,
        effects: Effects { suspended: true, ..Effects::default() },
    }
}

fn terminate() -> Transition {
    Transition {
        state: TaskState::TerminatedFinished,
        next_fire_time: None,
        effects: Effects::default(),
    }
}

fn finish(fx: Effects) -> Transition {
    Transition { state: TaskState::ActiveFinished, next_fire_time: None, effects: fx }
}

fn unchanged(input: &TransitionInput<'_>) -> Transition {
    Transition {
        state: input.state,
        next_fire_time: input.next_fire_time,
        effects: Effects::default(),
    }
}

/// Match the `DTSTART=<token>;<rest>` shape a rebasable retry expression must
/// have; returns `<rest>`.
fn split_after_dtstart(expression: &str) -> Option<&str> {
    let tail = expression.strip_prefix("DTSTART=")?;
    let (token, rest) = tail.split_once(';')?;
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ScheduledTask;
    use caredesk_core::time::parse_utc_compact;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn ts(text: &str) -> i64 {
        parse_utc_compact(text).unwrap()
    }

    fn daily_task() -> ScheduledTask {
        ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            ts("20250101T050000Z"),
        )
        .with_retry("DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1", 3)
    }

    #[test]
    fn test_initial_to_active_schedules_first_occurrence() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.next_fire_time, Some(ts("20250101T060000Z")));
        assert_eq!(task.execution_count, 0);
    }

    #[test]
    fn test_initial_to_suspended_and_terminated() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Suspended, None, 0);
        assert_eq!(task.state(), TaskState::SuspendedPaused);
        assert_eq!(task.suspension_count, 1);
        assert_eq!(task.next_fire_time, None);

        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Terminated, None, 0);
        assert_eq!(task.state(), TaskState::TerminatedFinished);
    }

    #[test]
    fn test_success_next_completes_a_cycle() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));

        let fire = ts("20250101T060000Z");
        task.move_to_next_state(TaskStatus::Active, Some(TaskOutcome::SuccessNext), fire + 1);

        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.execution_count, 1);
        assert_eq!(task.cycle_count, 1);
        assert_eq!(task.success_count, 1);
        assert_eq!(task.last_fire_time, Some(fire));
        assert_eq!(task.last_cycle_time, Some(fire));
        assert_eq!(task.last_outcome, Some(TaskOutcome::SuccessNext));
        assert_eq!(task.next_fire_time, Some(fire + DAY));
    }

    #[test]
    fn test_success_end_retires_but_stays_active() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::SuccessEnd),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.phase, TaskPhase::Finished);
        assert_eq!(task.next_fire_time, None);
        assert!(!task.is_due(i64::MAX));
    }

    #[test]
    fn test_exhausted_schedule_finishes() {
        let mut task = ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=DAILY;COUNT=1",
            0,
        );
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        assert_eq!(task.next_fire_time, Some(ts("20250101T060000Z")));

        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::SuccessNext),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.state(), TaskState::ActiveFinished);
        assert_eq!(task.next_fire_time, None);
    }

    #[test]
    fn test_retry_sequence_then_fallback() {
        // Three consecutive business failures climb the retry ladder; the
        // fourth exceeds the budget and falls back to the normal cycle.
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));

        let mut now = ts("20250101T060001Z");
        for expected in [1, 2, 3] {
            task.move_to_next_state(TaskStatus::Active, Some(TaskOutcome::FailureRetry), now);
            assert_eq!(task.retry_count, expected);
            assert_eq!(task.state(), TaskState::ActiveRecurringRetry);
            let next = task.next_fire_time.unwrap();
            assert!(next > now);
            now = next + 1;
        }

        task.move_to_next_state(TaskStatus::Active, Some(TaskOutcome::FailureRetry), now);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        // Back on the daily schedule.
        assert_eq!(task.next_fire_time, Some(ts("20250102T060000Z")));
        assert_eq!(task.failure_count, 4);
        // Only the first failure consumed a normal cycle.
        assert_eq!(task.cycle_count, 1);
        assert_eq!(task.last_cycle_time, Some(ts("20250101T060000Z")));
    }

    #[test]
    fn test_retry_rebases_onto_last_cycle() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        assert_eq!(
            task.retry_expression.as_deref(),
            Some("DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1")
        );
        assert_eq!(task.next_fire_time, Some(ts("20250101T070000Z")));
    }

    #[test]
    fn test_retry_loses_to_sooner_normal_cycle() {
        // Hourly normal schedule vs daily retry schedule: the normal cycle
        // fires first, so the failure falls straight back.
        let mut task = ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1",
            0,
        )
        .with_retry("DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1", 3);
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.next_fire_time, Some(ts("20250101T070000Z")));
    }

    #[test]
    fn test_retry_tie_goes_to_normal_cycle() {
        // Same hourly pattern on both expressions: next dates tie, the
        // normal cycle wins.
        let mut task = ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1",
            0,
        )
        .with_retry("DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1", 3);
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.state(), TaskState::ActiveRecurring);
    }

    #[test]
    fn test_retry_wins_when_normal_schedule_exhausted() {
        // COUNT=1 normal schedule has no further dates after the first fire;
        // the retry must always win then.
        let mut task = ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=DAILY;COUNT=1",
            0,
        )
        .with_retry("DTSTART=20250101T060000Z;FREQ=HOURLY;INTERVAL=1", 3);
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.state(), TaskState::ActiveRecurringRetry);
        assert_eq!(task.next_fire_time, Some(ts("20250101T070000Z")));
    }

    #[test]
    fn test_malformed_retry_shape_falls_back_without_reset() {
        let mut task = daily_task();
        task.retry_expression = Some("FREQ=HOURLY;INTERVAL=1".to_string());
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.retry_count = 2;
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        // Shape mismatch: straight to the normal schedule, count untouched,
        // expression not rebased.
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.retry_expression.as_deref(), Some("FREQ=HOURLY;INTERVAL=1"));
    }

    #[test]
    fn test_missing_retry_expression_falls_back() {
        let mut task = ScheduledTask::recurring(
            "noop",
            "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1",
            0,
        );
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(
            TaskStatus::Active,
            Some(TaskOutcome::FailureRetry),
            ts("20250101T060001Z"),
        );
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.failure_count, 1);
        assert_eq!(task.next_fire_time, Some(ts("20250102T060000Z")));
    }

    #[test]
    fn test_suspend_and_resume() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(TaskStatus::Suspended, None, ts("20250101T053000Z"));
        assert_eq!(task.state(), TaskState::SuspendedPaused);
        assert_eq!(task.suspension_count, 1);
        assert_eq!(task.next_fire_time, None);

        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T054000Z"));
        assert_eq!(task.state(), TaskState::ActiveRecurring);
        assert_eq!(task.resumption_count, 1);
        assert_eq!(task.next_fire_time, Some(ts("20250101T060000Z")));
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        task.move_to_next_state(TaskStatus::Terminated, None, ts("20250101T055000Z"));

        let snapshot = format!("{task:?}");
        for requested in [
            TaskStatus::Active,
            TaskStatus::Suspended,
            TaskStatus::Terminated,
            TaskStatus::Initial,
        ] {
            task.move_to_next_state(requested, Some(TaskOutcome::SuccessNext), i64::MAX - 1);
        }
        assert_eq!(format!("{task:?}"), snapshot);
    }

    #[test]
    fn test_active_request_without_outcome_is_a_no_op() {
        let mut task = daily_task();
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T050000Z"));
        let before = format!("{task:?}");
        task.move_to_next_state(TaskStatus::Active, None, ts("20250101T070000Z"));
        assert_eq!(format!("{task:?}"), before);
    }
}
