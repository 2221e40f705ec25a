//! Schedule — a named recurring availability definition.

use serde::{Deserialize, Serialize};

/// Operator-facing schedule state; only `Active` schedules materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Draft,
    Active,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Draft => "draft",
            ScheduleStatus::Active => "active",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "draft" => Some(ScheduleStatus::Draft),
            "active" => Some(ScheduleStatus::Active),
            _ => None,
        }
    }
}

/// Materialization progress of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleCycle {
    /// Nothing materialized yet.
    Initial,
    /// Sessions exist and more remain beyond the cursor.
    Active,
    /// Every occurrence of the rule has been materialized.
    Completed,
}

impl ScheduleCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleCycle::Initial => "initial",
            ScheduleCycle::Active => "active",
            ScheduleCycle::Completed => "completed",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "initial" => Some(ScheduleCycle::Initial),
            "active" => Some(ScheduleCycle::Active),
            "completed" => Some(ScheduleCycle::Completed),
            _ => None,
        }
    }
}

/// A recurring availability definition owned by a professional within an
/// organization. Sessions are stamped out of `recurring_rule`;
/// `next_generation_time` marks how far materialization has progressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    /// Recurrence expression the sessions are generated from.
    pub recurring_rule: String,
    /// Booking capacity carried onto every generated session.
    pub max_allowed: u32,
    pub status: ScheduleStatus,
    /// Generation cursor, epoch ms. 0 until the first batch runs.
    pub next_generation_time: i64,
    pub cycle: ScheduleCycle,
    /// The driving task, once asynchronous materialization is under way.
    pub task_id: Option<String>,
    pub professional_id: Option<String>,
    pub organization_id: String,
}

impl Schedule {
    /// New draft schedule.
    pub fn new(recurring_rule: &str, max_allowed: u32, organization_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recurring_rule: recurring_rule.to_string(),
            max_allowed,
            status: ScheduleStatus::Draft,
            next_generation_time: 0,
            cycle: ScheduleCycle::Initial,
            task_id: None,
            professional_id: None,
            organization_id: organization_id.to_string(),
        }
    }

    /// Mark the schedule active (eligible for materialization).
    pub fn activated(mut self) -> Self {
        self.status = ScheduleStatus::Active;
        self
    }

    /// Assign the owning professional.
    pub fn owned_by(mut self, professional_id: &str) -> Self {
        self.professional_id = Some(professional_id.to_string());
        self
    }
}
