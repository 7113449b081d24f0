/*!
 * Wait Queue Traits
 *
 * Small shared vocabulary between the wait queue and the things that wake it.
 */

/// Result of a wake operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Successfully woke N waiters (N >= 1)
    Woken(usize),
    /// No waiters were waiting
    NoWaiters,
}

impl WakeResult {
    /// Check if any waiters were woken
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    /// Get number of woken waiters (0 if none)
    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }

    #[inline]
    pub(crate) fn from_count(n: usize) -> Self {
        if n == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(n)
        }
    }
}

/// Something that can kick its blocked waiters so they re-check conditions
///
/// Implementations must not grant anything: a notified waiter only re-reads
/// shared state (such as an interrupt flag) and goes back to sleep if nothing
/// changed for it.
pub(crate) trait Notify: Send + Sync {
    fn notify_waiters(&self);
}
