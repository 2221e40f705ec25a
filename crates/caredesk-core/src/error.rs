//! CareDesk error taxonomy.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CareDeskError>;

/// Errors surfaced by the CareDesk crates.
///
/// Recurrence-rule parse failures are permanent and surface to whoever asked
/// for the schedule; store and handler errors are infrastructure faults the
/// executor loop recovers from.
#[derive(Debug, thiserror::Error)]
pub enum CareDeskError {
    /// Configuration file missing fields or failing to parse.
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed recurrence expression.
    #[error("Recurrence rule error: {0}")]
    Rule(String),

    /// Persistence failure (SQLite or otherwise).
    #[error("Store error: {0}")]
    Store(String),

    /// A task handler failed outside the business-outcome protocol.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Caller-supplied entity failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
