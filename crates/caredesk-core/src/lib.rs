//! # CareDesk Core
//!
//! Shared foundation for the CareDesk workspace: configuration loading,
//! the error taxonomy, and the epoch-millisecond time helpers every other
//! crate builds on.

pub mod config;
pub mod error;
pub mod time;

pub use config::{CareDeskConfig, SchedulerConfig, StorageConfig};
pub use error::{CareDeskError, Result};
