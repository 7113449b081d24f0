/*!
 * System Limits and Constants
 *
 * Centralized location for tick lengths, sentinels and tuning knobs.
 * Organized by domain for maintainability and discoverability.
 *
 * ## Conventions
 * - Performance-sensitive constants are marked with [PERF]
 * - Values matching the Linux kernel API are marked with [LINUX-COMPAT]
 */

use std::time::Duration;

// =============================================================================
// TIMER LIMITS
// =============================================================================

/// Default logical tick length (1ms, HZ=1000)
/// [LINUX-COMPAT] Matches the common CONFIG_HZ_1000 jiffy
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Coarse tick length (10ms, HZ=100)
pub const COARSE_TICK: Duration = Duration::from_millis(10);

/// Fine tick length (100µs)
/// [PERF] Worker wakes more often; use only when sub-millisecond firing matters
pub const FINE_TICK: Duration = Duration::from_micros(100);

/// Default name of the timer worker thread
pub const TIMER_THREAD_NAME: &str = "kcompat-timer";

/// Environment variable overriding the tick length (microseconds)
pub const TICK_ENV_VAR: &str = "KCOMPAT_TICK_US";

/// Environment variable overriding the timer worker thread name
pub const TIMER_THREAD_ENV_VAR: &str = "KCOMPAT_TIMER_THREAD";

/// Schedule size below which stale entries are never compacted away
/// [PERF] Compaction cost is amortized by doubling this bound after each pass
pub const SCHEDULE_COMPACT_MIN: usize = 256;

// =============================================================================
// COMPLETION LIMITS
// =============================================================================

/// Completion count meaning "done for every current and future waiter"
/// [LINUX-COMPAT] complete_all() stores UINT_MAX in `done`
pub const COMPLETION_DONE_FOREVER: u32 = u32::MAX;

// =============================================================================
// WAIT TUNING
// =============================================================================

/// Time a waiter spins on its grant before parking on the condvar
/// [PERF] Short enough that an uncontended wait costs almost nothing extra
pub const DEFAULT_SPIN_DURATION: Duration = Duration::from_micros(10);

/// Maximum spin iterations before parking
pub const DEFAULT_MAX_SPINS: u32 = 100;

/// Spin iterations that use a CPU hint before switching to `yield_now`
pub const SPIN_HINT_ITERATIONS: u32 = 10;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Window for rate-limited diagnostics
pub const DIAGNOSTIC_WINDOW: Duration = Duration::from_secs(1);

/// Environment variable switching tracing output to JSON
pub const TRACE_JSON_ENV_VAR: &str = "KCOMPAT_TRACE_JSON";
