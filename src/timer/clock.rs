/*!
 * Logical Clock
 *
 * Timers are armed in logical ticks. A `Clock` maps ticks to wall time so
 * the timer worker knows how long to sleep.
 */

use crate::core::errors::contract_violation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::time::{Duration, Instant};

/// A point in logical time
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn saturating_add(self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    /// Ticks from `earlier` to `self`, zero if `earlier` is later
    #[inline]
    pub const fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for Tick {
    type Output = Tick;

    #[inline]
    fn add(self, ticks: u64) -> Tick {
        self.saturating_add(ticks)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of logical time for a timer service
pub trait Clock: Send + Sync {
    /// Current tick
    fn now(&self) -> Tick;

    /// Earliest instant at which `now()` reaches `tick`; `None` if it is too
    /// far away to represent
    fn deadline_of(&self, tick: Tick) -> Option<Instant>;

    /// Number of ticks covering `duration`, rounded up
    fn ticks_for(&self, duration: Duration) -> u64;
}

/// Monotonic clock counting fixed-length ticks from its creation
#[derive(Debug, Clone)]
pub struct TickClock {
    origin: Instant,
    tick_nanos: u64,
}

impl TickClock {
    /// # Panics
    ///
    /// Panics if `tick` is zero.
    pub fn new(tick: Duration) -> Self {
        let tick_nanos = u64::try_from(tick.as_nanos()).unwrap_or(u64::MAX);
        if tick_nanos == 0 {
            contract_violation!("tick length must be non-zero");
        }
        Self {
            origin: Instant::now(),
            tick_nanos,
        }
    }

    #[inline]
    pub fn tick_length(&self) -> Duration {
        Duration::from_nanos(self.tick_nanos)
    }
}

impl Clock for TickClock {
    fn now(&self) -> Tick {
        let ticks = self.origin.elapsed().as_nanos() / u128::from(self.tick_nanos);
        Tick(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    fn deadline_of(&self, tick: Tick) -> Option<Instant> {
        let nanos = tick.0.checked_mul(self.tick_nanos)?;
        self.origin.checked_add(Duration::from_nanos(nanos))
    }

    fn ticks_for(&self, duration: Duration) -> u64 {
        let tick = u128::from(self.tick_nanos);
        let ticks = duration.as_nanos().div_ceil(tick);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tick_arithmetic_saturates() {
        assert_eq!(Tick(5) + 3, Tick(8));
        assert_eq!(Tick(u64::MAX) + 1, Tick(u64::MAX));
        assert_eq!(Tick(8).since(Tick(5)), 3);
        assert_eq!(Tick(5).since(Tick(8)), 0);
    }

    #[test]
    fn test_ticks_for_rounds_up() {
        let clock = TickClock::new(Duration::from_millis(1));
        assert_eq!(clock.ticks_for(Duration::ZERO), 0);
        assert_eq!(clock.ticks_for(Duration::from_micros(1)), 1);
        assert_eq!(clock.ticks_for(Duration::from_millis(10)), 10);
        assert_eq!(clock.ticks_for(Duration::from_micros(10_500)), 11);
    }

    #[test]
    fn test_now_advances() {
        let clock = TickClock::new(Duration::from_millis(1));
        let start = clock.now();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now().since(start) >= 5);
    }

    #[test]
    fn test_deadline_matches_now() {
        let clock = TickClock::new(Duration::from_millis(1));
        let target = clock.now() + 3;
        let deadline = clock.deadline_of(target).unwrap();

        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(clock.now() >= target);
        assert!(clock.deadline_of(Tick(u64::MAX)).is_none());
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_tick_panics() {
        let _ = TickClock::new(Duration::ZERO);
    }
}
