//! Error types for the caltext engine.

use thiserror::Error;

/// Errors that can occur in engine operations.
///
/// Time, duration, and payload errors are data-driven and recoverable
/// per record; `InvariantViolated` marks a programming defect and is
/// always fatal.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed time value: {0}")]
    MalformedTime(String),

    #[error("Malformed duration value: {0}")]
    MalformedDuration(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Invariant violated: {0}")]
    InvariantViolated(String),
}

/// Result type alias for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;
