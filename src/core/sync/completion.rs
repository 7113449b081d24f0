/*!
 * Waitable Flag (Completion)
 *
 * One thread waits for another to finish something. Each `complete` lets
 * exactly one wait through; `complete_all` opens the flag for every current
 * and future waiter until `reset`.
 *
 * A `complete` with nobody waiting is remembered in the count, so a waiter
 * that arrives later passes straight through.
 */

use super::config::SyncConfig;
use super::interrupt::{InterruptToken, WaitMode};
use super::wait::{deadline_after, WaitQueue};
use crate::core::errors::WaitResult;
use crate::core::limits::COMPLETION_DONE_FOREVER;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Completion primitive
///
/// # Examples
///
/// ```
/// use kcompat_sync::WaitableFlag;
/// use std::sync::Arc;
/// use std::thread;
///
/// let done = Arc::new(WaitableFlag::new());
/// let worker = {
///     let done = done.clone();
///     thread::spawn(move || done.complete())
/// };
///
/// done.wait();
/// worker.join().unwrap();
/// ```
pub struct WaitableFlag {
    /// Pending completions, or `COMPLETION_DONE_FOREVER`
    queue: WaitQueue<u32>,
}

impl WaitableFlag {
    /// Create an unsignaled flag
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            queue: WaitQueue::with_config(0, config),
        }
    }

    /// Let one waiter through, now or in the future
    pub fn complete(&self) {
        let mut done = self.queue.lock();
        if *done < COMPLETION_DONE_FOREVER - 1 {
            *done += 1;
        }
        let woken = done.signal_one();
        trace!(pending = *done, woken = woken.count(), "completion signaled");
    }

    /// Let every current and future waiter through until `reset`
    pub fn complete_all(&self) {
        let mut done = self.queue.lock();
        *done = COMPLETION_DONE_FOREVER;
        let woken = done.signal_all();
        trace!(woken = woken.count(), "completion signaled for all");
    }

    /// Block until completed
    pub fn wait(&self) {
        if let Err(err) = self.wait_until(None, WaitMode::Uninterruptible) {
            unreachable!("uninterruptible wait without deadline failed: {err}");
        }
    }

    /// Block until completed or `timeout` elapses
    ///
    /// Returns the unused part of `timeout` on success.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitResult<Duration> {
        self.wait_remaining(timeout, WaitMode::Uninterruptible)
    }

    /// Block until completed or `token` is raised with any kind
    pub fn wait_interruptible(&self, token: &InterruptToken) -> WaitResult<()> {
        self.wait_until(None, WaitMode::Interruptible(token))
    }

    /// Block until completed, `token` is raised, or `timeout` elapses
    pub fn wait_interruptible_timeout(
        &self,
        token: &InterruptToken,
        timeout: Duration,
    ) -> WaitResult<Duration> {
        self.wait_remaining(timeout, WaitMode::Interruptible(token))
    }

    /// Block until completed or `token` is raised with `InterruptKind::Kill`
    pub fn wait_killable(&self, token: &InterruptToken) -> WaitResult<()> {
        self.wait_until(None, WaitMode::Killable(token))
    }

    /// General form of every wait: optional deadline, any interrupt mode
    pub fn wait_until(&self, deadline: Option<Instant>, mode: WaitMode<'_>) -> WaitResult<()> {
        let mut done = self.queue.lock();
        done.wait_while(deadline, mode, |done| *done == 0)?;
        if *done != COMPLETION_DONE_FOREVER {
            *done -= 1;
        }
        Ok(())
    }

    /// Consume one completion if available, without blocking
    pub fn try_wait(&self) -> bool {
        let mut done = self.queue.lock();
        match *done {
            0 => false,
            COMPLETION_DONE_FOREVER => true,
            _ => {
                *done -= 1;
                true
            }
        }
    }

    /// Whether a wait would pass right now (does not consume)
    pub fn is_done(&self) -> bool {
        *self.queue.lock() != 0
    }

    /// Return to the unsignaled state
    ///
    /// The caller guarantees nobody is waiting; a violation is reported once
    /// and the reset happens anyway.
    pub fn reset(&self) {
        let mut done = self.queue.lock();
        crate::warn_on_once!(
            done.waiter_count() > 0,
            "completion reset with {} waiter(s) blocked",
            done.waiter_count()
        );
        *done = 0;
    }

    /// Number of blocked waiters (for diagnostics)
    pub fn waiters(&self) -> usize {
        self.queue.waiter_count()
    }

    /// Tear the flag down
    ///
    /// # Panics
    ///
    /// Panics if any thread is still blocked on the flag.
    pub fn destroy(self) {
        self.queue.destroy();
    }

    fn wait_remaining(&self, timeout: Duration, mode: WaitMode<'_>) -> WaitResult<Duration> {
        let deadline = deadline_after(timeout);
        self.wait_until(deadline, mode)?;
        Ok(deadline.map_or(timeout, |deadline| {
            deadline.saturating_duration_since(Instant::now())
        }))
    }
}

impl Default for WaitableFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitableFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitableFlag")
            .field("queue", &self.queue)
            .finish()
    }
}
