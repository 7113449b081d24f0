/*!
 * Wait Queue
 *
 * A lock around caller state plus a condition variable, with signals handed
 * to specific waiters instead of broadcast to whoever wakes first.
 *
 * # Design: Ticketed FIFO Grants
 *
 * Every blocked waiter takes a ticket under the lock and joins the back of
 * the queue. `signal_one` moves the oldest ticket into the granted set;
 * `signal_all` moves all of them. A waiter returns success only when it
 * finds its own ticket granted, so:
 *
 * - exactly one waiter consumes each `signal_one` (FIFO order)
 * - a grant that races a timeout or interrupt still wins, so no signal is
 *   lost to a waiter that was leaving anyway
 * - a timed-out or interrupted waiter removes its ticket before returning,
 *   so later grants go to someone still waiting
 *
 * Signals issued while nobody waits are dropped by the queue itself;
 * primitives that must remember them (completions, semaphores) keep a count
 * in the guarded state and use [`QueueGuard::wait_while`].
 */

use super::traits::{Notify, WakeResult};
use crate::core::errors::{contract_violation, WaitError, WaitResult};
use crate::core::limits::SPIN_HINT_ITERATIONS;
use crate::core::sync::config::SyncConfig;
use crate::core::sync::interrupt::WaitMode;
use ahash::RandomState;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Deadline `timeout` from now; `None` when it does not fit in an `Instant`
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

struct Inner<T> {
    state: T,
    /// Blocked waiter tickets, oldest first
    waiters: VecDeque<u64>,
    /// Tickets handed a signal that have not observed it yet
    granted: HashSet<u64, RandomState>,
    next_ticket: u64,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    config: SyncConfig,
}

impl<T: Send> Notify for Shared<T> {
    fn notify_waiters(&self) {
        // Notify under the lock so a waiter between its interrupt check and
        // its sleep cannot miss this.
        let _inner = self.inner.lock();
        self.cond.notify_all();
    }
}

/// Lock-protected state with FIFO blocking waits
///
/// `T` is the state the waiters' condition depends on. A bare `WaitQueue<()>`
/// behaves like a classic condition variable with FIFO wakeups.
///
/// # Examples
///
/// ```
/// use kcompat_sync::{WaitMode, WaitQueue};
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(WaitQueue::new(false));
/// let waiter = {
///     let queue = queue.clone();
///     thread::spawn(move || {
///         let mut ready = queue.lock();
///         ready.wait_while(None, WaitMode::Uninterruptible, |ready| !*ready)
///     })
/// };
///
/// let mut ready = queue.lock();
/// *ready = true;
/// ready.signal_all();
/// drop(ready);
///
/// assert!(waiter.join().unwrap().is_ok());
/// ```
pub struct WaitQueue<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> WaitQueue<T> {
    /// Create a queue guarding `state` with the default wait tuning
    pub fn new(state: T) -> Self {
        Self::with_config(state, SyncConfig::default())
    }

    pub fn with_config(state: T, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state,
                    waiters: VecDeque::new(),
                    granted: HashSet::with_hasher(RandomState::new()),
                    next_ticket: 0,
                }),
                cond: Condvar::new(),
                config,
            }),
        }
    }

    /// Acquire the queue lock
    #[inline]
    pub fn lock(&self) -> QueueGuard<'_, T> {
        QueueGuard {
            shared: &self.shared,
            inner: self.shared.inner.lock(),
        }
    }

    /// Number of currently blocked waiters (for diagnostics)
    pub fn waiter_count(&self) -> usize {
        self.shared.inner.lock().waiters.len()
    }

    #[inline]
    pub fn config(&self) -> SyncConfig {
        self.shared.config
    }

    /// Tear the queue down, returning the guarded state
    ///
    /// # Panics
    ///
    /// Panics if any thread is still blocked on the queue.
    pub fn destroy(self) -> T
    where
        T: Default,
    {
        let mut inner = self.shared.inner.lock();
        if !inner.waiters.is_empty() {
            contract_violation!(
                "wait queue destroyed with {} blocked waiter(s)",
                inner.waiters.len()
            );
        }
        std::mem::take(&mut inner.state)
    }
}

impl WaitQueue<()> {
    /// Block until signaled or interrupted
    pub fn wait(&self, mode: WaitMode<'_>) -> WaitResult<()> {
        self.lock().wait(mode)
    }

    /// Block until signaled, interrupted, or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration, mode: WaitMode<'_>) -> WaitResult<()> {
        self.lock().wait_timeout(timeout, mode)
    }

    /// Wake the longest-waiting thread
    pub fn signal_one(&self) -> WakeResult {
        self.lock().signal_one()
    }

    /// Wake every currently blocked thread
    pub fn signal_all(&self) -> WakeResult {
        self.lock().signal_all()
    }
}

impl<T: Default + Send + 'static> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for WaitQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("WaitQueue");
        match self.shared.inner.try_lock() {
            Some(inner) => out.field("waiters", &inner.waiters.len()),
            None => out.field("waiters", &"<locked>"),
        };
        out.finish()
    }
}

/// Held queue lock; dereferences to the guarded state
pub struct QueueGuard<'a, T> {
    shared: &'a Arc<Shared<T>>,
    inner: MutexGuard<'a, Inner<T>>,
}

impl<'a, T: Send + 'static> QueueGuard<'a, T> {
    /// Block until signaled or interrupted
    #[inline]
    pub fn wait(&mut self, mode: WaitMode<'_>) -> WaitResult<()> {
        self.wait_until(None, mode)
    }

    /// Block until signaled, interrupted, or `timeout` elapses
    #[inline]
    pub fn wait_timeout(&mut self, timeout: Duration, mode: WaitMode<'_>) -> WaitResult<()> {
        self.wait_until(deadline_after(timeout), mode)
    }

    /// Block until signaled, interrupted, or `deadline` passes
    ///
    /// The lock is released while asleep and held again on return. Reports
    /// exactly one of: `Ok(())` (signaled), `Err(Timeout)`,
    /// `Err(Interrupted)`. A signal granted to this waiter takes precedence
    /// over a concurrent timeout or interrupt.
    pub fn wait_until(&mut self, deadline: Option<Instant>, mode: WaitMode<'_>) -> WaitResult<()> {
        let ticket = self.enqueue();

        let _watch = mode.token().map(|token| {
            let queue: Weak<dyn Notify> = Arc::downgrade(self.shared) as Weak<dyn Notify>;
            token.watch(queue)
        });

        if self.shared.config.spins() {
            self.spin_for_grant(ticket, deadline);
        }

        loop {
            if self.inner.granted.remove(&ticket) {
                return Ok(());
            }

            if let Some(kind) = mode.pending() {
                self.abandon(ticket);
                return Err(WaitError::Interrupted(kind));
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        self.abandon(ticket);
                        return Err(WaitError::Timeout);
                    }
                    self.shared.cond.wait_until(&mut self.inner, deadline);
                }
                None => self.shared.cond.wait(&mut self.inner),
            }
        }
    }

    /// Block for as long as `condition` holds on the guarded state
    ///
    /// The condition is checked before the first sleep and after every
    /// wakeup, so a state change made before this call is never missed. If
    /// the wait fails but the condition cleared in the meantime, the
    /// condition wins and `Ok(())` is returned.
    pub fn wait_while<F>(
        &mut self,
        deadline: Option<Instant>,
        mode: WaitMode<'_>,
        mut condition: F,
    ) -> WaitResult<()>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut self.inner.state) {
            if let Err(err) = self.wait_until(deadline, mode) {
                return if condition(&mut self.inner.state) {
                    Err(err)
                } else {
                    Ok(())
                };
            }
        }
        Ok(())
    }

    /// Hand a signal to the longest-waiting thread
    pub fn signal_one(&mut self) -> WakeResult {
        match self.inner.waiters.pop_front() {
            Some(ticket) => {
                self.inner.granted.insert(ticket);
                self.shared.cond.notify_all();
                WakeResult::Woken(1)
            }
            None => WakeResult::NoWaiters,
        }
    }

    /// Hand a signal to every currently blocked thread
    pub fn signal_all(&mut self) -> WakeResult {
        let inner = &mut *self.inner;
        let woken = inner.waiters.len();
        inner.granted.extend(inner.waiters.drain(..));
        if woken > 0 {
            self.shared.cond.notify_all();
        }
        WakeResult::from_count(woken)
    }

    /// Number of blocked waiters that have not been granted yet
    #[inline]
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Run `f` with the lock temporarily released
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        MutexGuard::unlocked(&mut self.inner, f)
    }

    fn enqueue(&mut self) -> u64 {
        let ticket = self.inner.next_ticket;
        self.inner.next_ticket = ticket.wrapping_add(1);
        self.inner.waiters.push_back(ticket);
        ticket
    }

    fn abandon(&mut self, ticket: u64) {
        if let Some(pos) = self.inner.waiters.iter().position(|t| *t == ticket) {
            self.inner.waiters.remove(pos);
        }
    }

    /// Spin briefly on our grant with the lock released between checks
    fn spin_for_grant(&mut self, ticket: u64, deadline: Option<Instant>) {
        let config = self.shared.config;
        let start = Instant::now();
        let mut spins = 0u32;

        while spins < config.max_spins && start.elapsed() < config.spin_duration {
            if self.inner.granted.contains(&ticket) {
                return;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return;
            }

            MutexGuard::unlocked(&mut self.inner, || {
                if spins < SPIN_HINT_ITERATIONS {
                    std::hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            });
            spins += 1;
        }
    }
}

impl<T> Deref for QueueGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner.state
    }
}

impl<T> DerefMut for QueueGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner.state
    }
}
