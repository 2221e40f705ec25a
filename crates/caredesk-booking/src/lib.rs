//! # CareDesk Booking
//!
//! The clinic-facing side of the scheduler: named recurring schedules,
//! concrete bookable sessions, and the machinery that materializes one from
//! the other without ever generating an unbounded number of future slots.
//!
//! ## Architecture
//! ```text
//! ScheduleOrchestrator.create(schedule)
//!   ├── validate + persist
//!   ├── synchronous first batch (rule occurrences within the sliding range)
//!   └── remaining occurrences → driving ScheduledTask (daily re-check)
//!
//! TaskExecutor → SessionGenerationHandler
//!   ├── window end = max(tomorrow, day(cursor) + 1)
//!   ├── too far ahead?  → skip, success_next        (backpressure)
//!   ├── rebase rule DTSTART to the cursor, split inner/outer
//!   ├── inner occurrences → Sessions
//!   └── outer occurrence → advance cursor (success_next) or done (success_end)
//! ```

pub mod generation;
pub mod orchestrator;
pub mod persistence;
pub mod schedule;
pub mod session;
pub mod store;

pub use generation::{
    SESSION_GENERATION_HANDLER, SCHEDULE_ID_KEY, SessionGenerationHandler, WindowPlan, plan_window,
};
pub use orchestrator::ScheduleOrchestrator;
pub use persistence::BookingDb;
pub use schedule::{Schedule, ScheduleCycle, ScheduleStatus};
pub use session::Session;
pub use store::{InMemoryScheduleStore, InMemorySessionStore, ScheduleStore, SessionStore};
