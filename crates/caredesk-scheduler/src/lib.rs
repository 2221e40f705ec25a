//! # CareDesk Scheduler
//!
//! Persistent recurring-task engine: a per-task state machine driven by
//! execution outcomes, a handler registry keyed by stable string ids, and a
//! background polling executor with bounded work per tick.
//!
//! ## Architecture
//! ```text
//! TaskExecutor (tokio loop, watch-channel shutdown)
//!   ├── poll: up to N due tasks (status=active, phase=recurring)
//!   ├── resolve handler by task.handler
//!   │     ├── missing  → suspend task (operator-visible)
//!   │     └── resolved → execute → TaskOutcome
//!   ├── move_to_next_state(active, outcome)   [pure transition + effects]
//!   └── persist via TaskStore (SQLite or in-memory)
//! ```

pub mod executor;
pub mod persistence;
pub mod registry;
pub mod store;
pub mod task;
pub mod transition;

pub use executor::{ExecutorConfig, ExecutorHandle, TaskExecutor};
pub use persistence::SchedulerDb;
pub use registry::{HandlerRegistry, TaskHandler};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{ScheduledTask, TaskOutcome, TaskPhase, TaskStatus};
pub use transition::{TaskState, Transition, TransitionInput, transition};
