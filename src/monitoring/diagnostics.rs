/*!
 * Diagnostics
 *
 * Warn-once and rate-limited warnings keyed by call site.
 *
 * State lives in an explicit `DiagnosticRegistry` rather than hidden
 * per-call-site statics: the process-wide instance is reached through
 * `registry()` and can be cleared with `reset_diagnostics()`, and tests can
 * build private registries.
 */

use crate::core::limits::DIAGNOSTIC_WINDOW;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
struct SiteState {
    warned: bool,
    window_start: Instant,
    emitted_in_window: u32,
    suppressed: u64,
}

impl SiteState {
    fn new() -> Self {
        Self {
            warned: false,
            window_start: Instant::now(),
            emitted_in_window: 0,
            suppressed: 0,
        }
    }
}

/// Per-call-site emission state for diagnostic warnings
pub struct DiagnosticRegistry {
    sites: DashMap<&'static str, SiteState, RandomState>,
    window: Duration,
}

impl DiagnosticRegistry {
    pub fn new() -> Self {
        Self::with_window(DIAGNOSTIC_WINDOW)
    }

    /// Registry whose rate limits count per `window` instead of per second
    pub fn with_window(window: Duration) -> Self {
        Self {
            sites: DashMap::with_hasher(RandomState::new()),
            window,
        }
    }

    /// Emit `message` the first time `site` reports; returns whether it was emitted
    pub fn warn_once(&self, site: &'static str, message: fmt::Arguments<'_>) -> bool {
        let first = {
            let mut state = self.sites.entry(site).or_insert_with(SiteState::new);
            if state.warned {
                state.suppressed += 1;
                false
            } else {
                state.warned = true;
                true
            }
        };

        // Log outside the shard lock
        if first {
            warn!(site, "{}", message);
        }
        first
    }

    /// Emit at most `per_window` messages per window for `site`; returns
    /// whether this one was emitted
    pub fn rate_limited(
        &self,
        site: &'static str,
        per_window: u32,
        message: fmt::Arguments<'_>,
    ) -> bool {
        let emit = {
            let mut state = self.sites.entry(site).or_insert_with(SiteState::new);
            let now = Instant::now();
            if now.duration_since(state.window_start) >= self.window {
                state.window_start = now;
                state.emitted_in_window = 0;
            }
            if state.emitted_in_window < per_window {
                state.emitted_in_window += 1;
                Some(state.suppressed)
            } else {
                state.suppressed += 1;
                None
            }
        };

        match emit {
            Some(suppressed) => {
                warn!(site, suppressed, "{}", message);
                true
            }
            None => false,
        }
    }

    /// Number of messages swallowed for `site` since the last reset
    pub fn suppressed(&self, site: &str) -> u64 {
        self.sites.get(site).map_or(0, |state| state.suppressed)
    }

    /// Whether `site` has already used its one warning
    pub fn has_warned(&self, site: &str) -> bool {
        self.sites.get(site).is_some_and(|state| state.warned)
    }

    /// Forget every site
    pub fn reset(&self) {
        self.sites.clear();
    }

    /// Forget one site
    pub fn reset_site(&self, site: &str) {
        self.sites.remove(site);
    }
}

impl Default for DiagnosticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiagnosticRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticRegistry")
            .field("sites", &self.sites.len())
            .field("window", &self.window)
            .finish()
    }
}

/// The process-wide registry used by the diagnostic macros
pub fn registry() -> &'static DiagnosticRegistry {
    static REGISTRY: OnceLock<DiagnosticRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DiagnosticRegistry::new)
}

/// Clear the process-wide registry
pub fn reset_diagnostics() {
    registry().reset();
}

/// Warn once per call site when `cond` holds; evaluates to `cond`
///
/// ```
/// let fired = kcompat_sync::warn_on_once!(1 + 1 == 2, "arithmetic still works");
/// assert!(fired);
/// ```
#[macro_export]
macro_rules! warn_on_once {
    ($cond:expr, $($arg:tt)+) => {{
        let triggered: bool = $cond;
        if triggered {
            $crate::monitoring::diagnostics::registry().warn_once(
                concat!(file!(), ":", line!(), ":", column!()),
                format_args!($($arg)+),
            );
        }
        triggered
    }};
}

/// Warn at most `per_second` times per second from this call site;
/// evaluates to whether the message was emitted
#[macro_export]
macro_rules! warn_ratelimited {
    ($per_second:expr, $($arg:tt)+) => {
        $crate::monitoring::diagnostics::registry().rate_limited(
            concat!(file!(), ":", line!(), ":", column!()),
            $per_second,
            format_args!($($arg)+),
        )
    };
}
