/*!
 * Counting Gate (Semaphore)
 *
 * Classic counting semaphore: `acquire` takes a unit, blocking while none
 * are available; `release` returns one and hands it to the longest-blocked
 * acquirer. There is no upper bound on the count.
 */

use super::config::SyncConfig;
use super::interrupt::{InterruptToken, WaitMode};
use super::wait::{deadline_after, WaitQueue};
use crate::core::errors::{contract_violation, WaitResult};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Counting semaphore
///
/// # Examples
///
/// ```
/// use kcompat_sync::CountingGate;
///
/// let gate = CountingGate::new(1);
/// gate.acquire();
/// assert!(!gate.try_acquire());
/// gate.release();
/// assert!(gate.try_acquire());
/// ```
pub struct CountingGate {
    /// Units available; never negative outside the lock
    queue: WaitQueue<i64>,
}

impl CountingGate {
    /// Create a gate holding `initial` units
    ///
    /// # Panics
    ///
    /// Panics if `initial` is negative.
    pub fn new(initial: i64) -> Self {
        Self::with_config(initial, SyncConfig::default())
    }

    pub fn with_config(initial: i64, config: SyncConfig) -> Self {
        if initial < 0 {
            contract_violation!("counting gate initialized with negative value {}", initial);
        }
        Self {
            queue: WaitQueue::with_config(initial, config),
        }
    }

    /// Take one unit, blocking until one is available
    pub fn acquire(&self) {
        if let Err(err) = self.acquire_until(None, WaitMode::Uninterruptible) {
            unreachable!("uninterruptible acquire without deadline failed: {err}");
        }
    }

    /// Take one unit unless `token` is raised first
    pub fn acquire_interruptible(&self, token: &InterruptToken) -> WaitResult<()> {
        self.acquire_until(None, WaitMode::Interruptible(token))
    }

    /// Take one unit unless `timeout` elapses first
    pub fn acquire_timeout(&self, timeout: Duration) -> WaitResult<()> {
        self.acquire_until(deadline_after(timeout), WaitMode::Uninterruptible)
    }

    /// Take one unit unless `token` is raised or `timeout` elapses first
    pub fn acquire_interruptible_timeout(
        &self,
        token: &InterruptToken,
        timeout: Duration,
    ) -> WaitResult<()> {
        self.acquire_until(deadline_after(timeout), WaitMode::Interruptible(token))
    }

    /// General form of every acquire; a failed acquire consumes nothing
    pub fn acquire_until(&self, deadline: Option<Instant>, mode: WaitMode<'_>) -> WaitResult<()> {
        let mut value = self.queue.lock();
        value.wait_while(deadline, mode, |value| *value <= 0)?;
        *value -= 1;
        Ok(())
    }

    /// Take one unit only if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut value = self.queue.lock();
        if *value > 0 {
            *value -= 1;
            true
        } else {
            false
        }
    }

    /// Return one unit, waking the longest-blocked acquirer if any
    pub fn release(&self) {
        let mut value = self.queue.lock();
        let next = value
            .checked_add(1)
            .unwrap_or_else(|| contract_violation!("counting gate value overflowed"));
        *value = next;
        if value.waiter_count() > 0 {
            value.signal_one();
        }
        trace!(value = *value, "counting gate released");
    }

    /// Units currently available
    pub fn value(&self) -> i64 {
        *self.queue.lock()
    }

    /// Number of blocked acquirers (for diagnostics)
    pub fn waiters(&self) -> usize {
        self.queue.waiter_count()
    }

    /// Tear the gate down
    ///
    /// # Panics
    ///
    /// Panics if any thread is still blocked on the gate.
    pub fn destroy(self) {
        self.queue.destroy();
    }
}

impl fmt::Debug for CountingGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingGate")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::WaitError;
    use crate::core::sync::InterruptKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn wait_for_waiters(gate: &CountingGate, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while gate.waiters() < n {
            assert!(Instant::now() < deadline, "acquirers never blocked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_try_acquire_respects_value() {
        let gate = CountingGate::new(2);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert_eq!(gate.value(), 0);
    }

    #[test]
    fn test_release_without_waiters_accumulates() {
        let gate = CountingGate::new(0);
        gate.release();
        gate.release();
        gate.release();
        assert_eq!(gate.value(), 3);
        gate.destroy();
    }

    #[test]
    #[should_panic(expected = "negative value")]
    fn test_negative_initial_value_panics() {
        let _ = CountingGate::new(-1);
    }

    #[test]
    fn test_acquire_timeout() {
        let gate = CountingGate::new(0);
        assert_eq!(
            gate.acquire_timeout(Duration::from_millis(30)),
            Err(WaitError::Timeout)
        );
        assert_eq!(gate.value(), 0);
        assert_eq!(gate.waiters(), 0);
    }

    #[test]
    fn test_blocked_acquire_released() {
        let gate = Arc::new(CountingGate::new(0));
        let gate_clone = gate.clone();
        let handle = thread::spawn(move || gate_clone.acquire());

        wait_for_waiters(&gate, 1);
        gate.release();
        handle.join().unwrap();
        assert_eq!(gate.value(), 0);
    }

    #[test]
    fn test_interrupted_acquire_consumes_nothing() {
        let gate = Arc::new(CountingGate::new(0));
        let token = InterruptToken::new();

        let gate_clone = gate.clone();
        let token_clone = token.clone();
        let handle = thread::spawn(move || gate_clone.acquire_interruptible(&token_clone));

        wait_for_waiters(&gate, 1);
        token.raise(InterruptKind::Signal);
        assert_eq!(
            handle.join().unwrap(),
            Err(WaitError::Interrupted(InterruptKind::Signal))
        );

        gate.release();
        assert_eq!(gate.value(), 1);
    }

    #[test]
    fn test_concurrent_releases_sum() {
        let gate = Arc::new(CountingGate::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate_clone = gate.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        gate_clone.release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gate.value(), 2000);
    }

    #[test]
    fn test_gate_bounds_concurrency() {
        let gate = Arc::new(CountingGate::new(3));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        gate.acquire();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        gate.release();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.value(), 3);
    }
}
