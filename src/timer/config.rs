/*!
 * Timer Configuration
 *
 * Tick length and worker thread naming for a timer service.
 */

use crate::core::limits::{
    COARSE_TICK, DEFAULT_TICK, FINE_TICK, TICK_ENV_VAR, TIMER_THREAD_ENV_VAR, TIMER_THREAD_NAME,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Timer service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Length of one logical tick (default: 1ms)
    pub tick: Duration,

    /// Name of the worker thread that runs callbacks
    pub thread_name: String,
}

impl TimerConfig {
    /// Create default timer configuration
    pub fn new() -> Self {
        Self {
            tick: DEFAULT_TICK,
            thread_name: TIMER_THREAD_NAME.to_string(),
        }
    }

    /// 10ms ticks; fewer worker wakeups, coarser firing
    pub fn coarse() -> Self {
        Self::new().with_tick(COARSE_TICK)
    }

    /// 100µs ticks
    pub fn fine() -> Self {
        Self::new().with_tick(FINE_TICK)
    }

    /// Defaults overridden by `KCOMPAT_TICK_US` and `KCOMPAT_TIMER_THREAD`
    ///
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(raw) = std::env::var(TICK_ENV_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(micros) if micros > 0 => config.tick = Duration::from_micros(micros),
                _ => warn!(var = TICK_ENV_VAR, value = %raw, "Ignoring invalid tick length"),
            }
        }

        if let Ok(name) = std::env::var(TIMER_THREAD_ENV_VAR) {
            if !name.trim().is_empty() {
                config.thread_name = name;
            }
        }

        config
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}
