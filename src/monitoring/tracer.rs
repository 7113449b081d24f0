/*!
 * Tracing Setup
 *
 * Installs the global subscriber that receives the primitives' events.
 * Filtering comes from `RUST_LOG` (default `info`); output is compact text
 * or, with `KCOMPAT_TRACE_JSON=1`, one JSON object per event.
 */

use crate::core::limits::TRACE_JSON_ENV_VAR;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Output format for the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// Single-line human-readable events
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl TraceFormat {
    /// `Json` when `KCOMPAT_TRACE_JSON` is `1` or `true`, else `Compact`
    pub fn from_env() -> Self {
        match std::env::var(TRACE_JSON_ENV_VAR).as_deref() {
            Ok("1") | Ok("true") => TraceFormat::Json,
            _ => TraceFormat::Compact,
        }
    }
}

/// Install the global subscriber in the format chosen by the environment
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that can happen (tests, embedding).
pub fn init_tracing() {
    if let Err(err) = try_init_tracing() {
        panic!("failed to install tracing subscriber: {err}");
    }
}

/// Like [`init_tracing`], but reports an existing global subscriber
pub fn try_init_tracing() -> Result<(), TryInitError> {
    try_init_tracing_with(TraceFormat::from_env())
}

/// Install the global subscriber with an explicit output format
pub fn try_init_tracing_with(format: TraceFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Thread names tell the timer worker apart from waiters
    let output = match format {
        TraceFormat::Json => fmt::layer()
            .json()
            .with_thread_names(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .boxed(),
        TraceFormat::Compact => fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()?;

    debug!(?format, "Tracing subscriber installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_format_from_env() {
        std::env::set_var(TRACE_JSON_ENV_VAR, "true");
        assert_eq!(TraceFormat::from_env(), TraceFormat::Json);

        std::env::set_var(TRACE_JSON_ENV_VAR, "no");
        assert_eq!(TraceFormat::from_env(), TraceFormat::Compact);

        std::env::remove_var(TRACE_JSON_ENV_VAR);
        assert_eq!(TraceFormat::from_env(), TraceFormat::default());
    }

    #[test]
    fn test_second_install_is_reported() {
        // The first call may lose to another test; the second always loses
        let _ = try_init_tracing_with(TraceFormat::Compact);
        assert!(try_init_tracing().is_err());
    }
}
