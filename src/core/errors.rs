/*!
 * Error Types
 * Wait and timer outcomes with thiserror, miette, and serde support
 *
 * Timeouts and interruptions are ordinary results that callers branch on.
 * Broken invariants are not errors: they go through `contract_violation!`,
 * which logs and panics.
 */

use crate::core::sync::InterruptKind;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for blocking operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Result type for timer service operations
pub type TimerResult<T> = Result<T, TimerError>;

/// Non-success outcomes of a blocking wait
#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum WaitError {
    #[error("Wait operation timed out")]
    #[diagnostic(
        code(wait::timeout),
        help("The event did not occur before the deadline. Retry the wait or propagate.")
    )]
    Timeout,

    #[error("Wait was interrupted ({0})")]
    #[diagnostic(
        code(wait::interrupted),
        help("The interrupt token was raised while blocked. Nothing was consumed.")
    )]
    Interrupted(InterruptKind),
}

impl WaitError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout)
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WaitError::Interrupted(_))
    }
}

/// Timer service errors
#[derive(Error, Debug, Diagnostic)]
pub enum TimerError {
    #[error("Timer service has been shut down")]
    #[diagnostic(
        code(timer::service_stopped),
        help("Deferred calls cannot be armed after their service is shut down.")
    )]
    ServiceStopped,

    #[error("Failed to spawn timer worker thread: {0}")]
    #[diagnostic(
        code(timer::spawn_failed),
        help("The OS refused to create the worker thread. Check thread limits.")
    )]
    Spawn(#[source] std::io::Error),
}

/// Log a broken caller contract at `error` and panic
macro_rules! contract_violation {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        ::tracing::error!(violation = %message, "contract violation");
        panic!("contract violation: {}", message)
    }};
}

pub(crate) use contract_violation;
