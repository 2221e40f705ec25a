//! Scheduled task — the persistent unit of recurring work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use caredesk_core::time::format_utc_compact;

use crate::transition::{TaskState, Transition, TransitionInput, transition};

/// Lifecycle status — the operator-facing axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initial,
    Active,
    Suspended,
    Terminated,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Initial => "initial",
            TaskStatus::Active => "active",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Terminated => "terminated",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "initial" => Some(TaskStatus::Initial),
            "active" => Some(TaskStatus::Active),
            "suspended" => Some(TaskStatus::Suspended),
            "terminated" => Some(TaskStatus::Terminated),
            _ => None,
        }
    }
}

/// Cycle phase — the scheduling axis, orthogonal to status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Fresh,
    Recurring,
    RecurringRetry,
    Paused,
    Finished,
}

impl TaskPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Fresh => "fresh",
            TaskPhase::Recurring => "recurring",
            TaskPhase::RecurringRetry => "recurring_retry",
            TaskPhase::Paused => "paused",
            TaskPhase::Finished => "finished",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "fresh" => Some(TaskPhase::Fresh),
            "recurring" => Some(TaskPhase::Recurring),
            "recurring_retry" => Some(TaskPhase::RecurringRetry),
            "paused" => Some(TaskPhase::Paused),
            "finished" => Some(TaskPhase::Finished),
            _ => None,
        }
    }
}

/// Result a handler reports back after one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Work done, keep cycling on the normal schedule.
    SuccessNext,
    /// Work done, nothing left — retire the task.
    SuccessEnd,
    /// Business failure worth retrying on the retry schedule.
    FailureRetry,
    /// Permanent business failure — retire the task.
    FailureEnd,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::SuccessNext => "success_next",
            TaskOutcome::SuccessEnd => "success_end",
            TaskOutcome::FailureRetry => "failure_retry",
            TaskOutcome::FailureEnd => "failure_end",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "success_next" => Some(TaskOutcome::SuccessNext),
            "success_end" => Some(TaskOutcome::SuccessEnd),
            "failure_retry" => Some(TaskOutcome::FailureRetry),
            "failure_end" => Some(TaskOutcome::FailureEnd),
            _ => None,
        }
    }
}

/// A persistent recurring task.
///
/// All mutation goes through [`ScheduledTask::move_to_next_state`]; the
/// executor guarantees at most one in-flight transition per task, so the
/// non-atomic counter updates never race. Terminal tasks are kept for audit,
/// never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    /// Recurrence expression for normal cycling.
    pub schedule_expression: String,
    /// Recurrence expression for retry cycling; rebased on every retry.
    pub retry_expression: Option<String>,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    pub last_outcome: Option<TaskOutcome>,
    /// The occurrence consumed by the most recent execution, epoch ms.
    pub last_fire_time: Option<i64>,
    /// The most recent *normal-cycle* fire, epoch ms. Retry rebasing anchors here.
    pub last_cycle_time: Option<i64>,
    /// Due time while phase is recurring/recurring_retry; `None` otherwise.
    pub next_fire_time: Option<i64>,
    pub last_execution_time: Option<i64>,
    pub execution_count: u32,
    pub cycle_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub retry_count: u32,
    pub suspension_count: u32,
    pub resumption_count: u32,
    pub max_retry_limit: u32,
    /// Registry key of the handler that executes this task.
    pub handler: String,
    /// Small contextual payload, e.g. which schedule this task drives.
    #[serde(default)]
    pub data: HashMap<String, String>,
    pub created_at: i64,
}

impl ScheduledTask {
    /// Create a fresh `(initial, fresh)` task for `handler`.
    pub fn recurring(handler: &str, schedule_expression: &str, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_expression: schedule_expression.to_string(),
            retry_expression: None,
            status: TaskStatus::Initial,
            phase: TaskPhase::Fresh,
            last_outcome: None,
            last_fire_time: None,
            last_cycle_time: None,
            next_fire_time: None,
            last_execution_time: None,
            execution_count: 0,
            cycle_count: 0,
            success_count: 0,
            failure_count: 0,
            retry_count: 0,
            suspension_count: 0,
            resumption_count: 0,
            max_retry_limit: 0,
            handler: handler.to_string(),
            data: HashMap::new(),
            created_at,
        }
    }

    /// Attach a retry expression and budget.
    pub fn with_retry(mut self, retry_expression: &str, max_retry_limit: u32) -> Self {
        self.retry_expression = Some(retry_expression.to_string());
        self.max_retry_limit = max_retry_limit;
        self
    }

    /// Attach one payload entry.
    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    /// Combined `(status, phase)` view. Combinations the transition table
    /// never produces collapse to the nearest non-firing state.
    pub fn state(&self) -> TaskState {
        match (self.status, self.phase) {
            (TaskStatus::Initial, _) => TaskState::InitialFresh,
            (TaskStatus::Active, TaskPhase::Recurring) => TaskState::ActiveRecurring,
            (TaskStatus::Active, TaskPhase::RecurringRetry) => TaskState::ActiveRecurringRetry,
            (TaskStatus::Active, _) => TaskState::ActiveFinished,
            (TaskStatus::Suspended, _) => TaskState::SuspendedPaused,
            (TaskStatus::Terminated, _) => TaskState::TerminatedFinished,
        }
    }

    /// Whether the executor should pick this task up at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.status == TaskStatus::Active
            && self.phase == TaskPhase::Recurring
            && self.next_fire_time.is_some_and(|t| t <= now)
    }

    /// Drive the state machine with a requested status and optional outcome.
    ///
    /// Computes the pure transition for the current state and applies its
    /// effects. Calls on a terminated task are no-ops.
    pub fn move_to_next_state(
        &mut self,
        requested: TaskStatus,
        outcome: Option<TaskOutcome>,
        now: i64,
    ) {
        let input = TransitionInput {
            state: self.state(),
            requested,
            outcome,
            now,
            schedule_expression: &self.schedule_expression,
            retry_expression: self.retry_expression.as_deref(),
            next_fire_time: self.next_fire_time,
            last_cycle_time: self.last_cycle_time,
            retry_count: self.retry_count,
            max_retry_limit: self.max_retry_limit,
        };
        let next = transition(&input);
        self.apply(next, now);
    }

    fn apply(&mut self, next: Transition, now: i64) {
        let fx = next.effects;
        if fx.executed {
            self.execution_count += 1;
            self.last_fire_time = self.next_fire_time;
            self.last_execution_time = Some(now);
        }
        if fx.cycled {
            self.cycle_count += 1;
            self.last_cycle_time = self.last_fire_time;
        }
        if let Some(outcome) = fx.record_outcome {
            self.last_outcome = Some(outcome);
        }
        if fx.succeeded {
            self.success_count += 1;
        }
        if fx.failed {
            self.failure_count += 1;
        }
        if fx.suspended {
            self.suspension_count += 1;
        }
        if fx.resumed {
            self.resumption_count += 1;
        }
        if let Some(retry_count) = fx.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(expression) = fx.rebased_retry_expression {
            self.retry_expression = Some(expression);
        }
        self.status = next.state.status();
        self.phase = next.state.phase();
        self.next_fire_time = next.next_fire_time;

        tracing::debug!(
            "Task [{}] now {}/{}, next fire {}",
            self.id,
            self.status.as_str(),
            self.phase.as_str(),
            self.next_fire_time
                .map(format_utc_compact)
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_task_defaults() {
        let task = ScheduledTask::recurring("noop", "DTSTART=20250101T060000Z;FREQ=DAILY", 0);
        assert_eq!(task.status, TaskStatus::Initial);
        assert_eq!(task.phase, TaskPhase::Fresh);
        assert_eq!(task.state(), TaskState::InitialFresh);
        assert!(!task.is_due(i64::MAX));
    }

    #[test]
    fn test_builder_helpers() {
        let task = ScheduledTask::recurring("noop", "DTSTART=20250101T060000Z;FREQ=DAILY", 0)
            .with_retry("DTSTART=20250101T060000Z;FREQ=HOURLY;COUNT=3", 3)
            .with_data("schedule_id", "s-1");
        assert_eq!(task.max_retry_limit, 3);
        assert_eq!(task.data.get("schedule_id").map(String::as_str), Some("s-1"));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Initial,
            TaskStatus::Active,
            TaskStatus::Suspended,
            TaskStatus::Terminated,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        for phase in [
            TaskPhase::Fresh,
            TaskPhase::Recurring,
            TaskPhase::RecurringRetry,
            TaskPhase::Paused,
            TaskPhase::Finished,
        ] {
            assert_eq!(TaskPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(TaskOutcome::parse("success_next"), Some(TaskOutcome::SuccessNext));
        assert_eq!(TaskOutcome::parse("nope"), None);
    }
}
