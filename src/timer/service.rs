/*!
 * Timer Service
 *
 * One worker thread per service runs every due deferred call.
 *
 * # Design: Min-Heap With Lazy Deletion
 *
 * Arming pushes `(expires, seq)` with the timer's generation number. Re-arming
 * or cancelling never searches the heap: the stale entry stays until it is
 * popped, and the timer ignores any entry whose generation is not current.
 *
 * The worker pops due entries under the schedule lock, then releases it
 * before touching any timer, and no timer lock is held while its callback
 * runs. Neither lock is ever taken inside the other.
 */

use super::clock::{Clock, Tick, TickClock};
use super::config::TimerConfig;
use super::deferred::TimerShared;
use crate::core::errors::{TimerError, TimerResult};
use crate::core::limits::SCHEDULE_COMPACT_MIN;
use crate::core::sync::{SyncConfig, WaitMode, WaitQueue};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// One armed expiration
struct Entry {
    expires: Tick,
    seq: u64,
    generation: u64,
    timer: Weak<TimerShared>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.expires == other.expires && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier expiration first, then arming order
        self.expires
            .cmp(&other.expires)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Schedule {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    running: bool,
    /// Heap size that triggers the next stale-entry sweep
    compact_at: usize,
}

impl Schedule {
    /// Drop entries that were re-armed, or whose timer is gone
    ///
    /// Re-arming a far-off timer over and over would otherwise grow the heap
    /// without bound until the stale expirations come due. Upgraded timers
    /// go to `released` so the caller drops them after unlocking.
    fn compact(&mut self, released: &mut Vec<Arc<TimerShared>>) {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| match entry.timer.upgrade() {
            Some(timer) => {
                let current = timer.is_current(entry.generation);
                released.push(timer);
                current
            }
            None => false,
        });
        self.compact_at = (self.heap.len() * 2).max(SCHEDULE_COMPACT_MIN);
        trace!(before, after = self.heap.len(), "Compacted timer schedule");
    }
}

pub(crate) struct ServiceInner {
    clock: Arc<dyn Clock>,
    schedule: WaitQueue<Schedule>,
    name: String,
}

impl ServiceInner {
    #[inline]
    pub(crate) fn now(&self) -> Tick {
        self.clock.now()
    }

    #[inline]
    pub(crate) fn ticks_for(&self, duration: std::time::Duration) -> u64 {
        self.clock.ticks_for(duration)
    }

    /// Queue an expiration for `timer`; wakes the worker if it is the new head
    pub(crate) fn enqueue(
        &self,
        expires: Tick,
        generation: u64,
        timer: Weak<TimerShared>,
    ) -> TimerResult<()> {
        // Declared before the guard so these drop after it
        let mut released = Vec::new();
        let mut schedule = self.schedule.lock();
        if !schedule.running {
            return Err(TimerError::ServiceStopped);
        }

        if schedule.heap.len() >= schedule.compact_at {
            schedule.compact(&mut released);
        }

        let seq = schedule.next_seq;
        schedule.next_seq += 1;

        let new_head = schedule
            .heap
            .peek()
            .map_or(true, |Reverse(head)| expires < head.expires);

        schedule.heap.push(Reverse(Entry {
            expires,
            seq,
            generation,
            timer,
        }));

        if new_head {
            schedule.signal_all();
        }
        Ok(())
    }

    fn run(&self) {
        debug!(thread = %self.name, "Timer worker started");

        let mut schedule = self.schedule.lock();
        while schedule.running {
            let now = self.clock.now();

            let mut due = Vec::new();
            while schedule
                .heap
                .peek()
                .is_some_and(|Reverse(head)| head.expires <= now)
            {
                if let Some(Reverse(entry)) = schedule.heap.pop() {
                    due.push(entry);
                }
            }

            if !due.is_empty() {
                trace!(now = %now, due = due.len(), "Firing due timers");
                schedule.unlocked(|| {
                    for entry in due {
                        if let Some(timer) = entry.timer.upgrade() {
                            timer.fire(entry.generation);
                        }
                    }
                });
                continue;
            }

            let deadline = schedule
                .heap
                .peek()
                .and_then(|Reverse(head)| self.clock.deadline_of(head.expires));

            // Timing out is how the head entry becomes due
            let _ = schedule.wait_until(deadline, WaitMode::Uninterruptible);
        }

        debug!(thread = %self.name, "Timer worker stopped");
    }
}

/// Owner of a timer worker thread
///
/// Dropping the service stops the worker. Deferred calls still armed at that
/// point never fire and return to idle.
///
/// # Examples
///
/// ```
/// use kcompat_sync::{DeferredCall, TimerConfig, TimerService, WaitableFlag};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let service = TimerService::start(TimerConfig::default()).unwrap();
/// let fired = Arc::new(WaitableFlag::new());
///
/// let flag = fired.clone();
/// let call = DeferredCall::new(&service, move || flag.complete());
/// call.schedule_after(Duration::from_millis(5)).unwrap();
///
/// assert!(fired.wait_timeout(Duration::from_secs(5)).is_ok());
/// ```
pub struct TimerService {
    inner: Arc<ServiceInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Start a service on a `TickClock` with the configured tick length
    pub fn start(config: TimerConfig) -> TimerResult<Self> {
        let clock = Arc::new(TickClock::new(config.tick));
        Self::start_with_clock(config, clock)
    }

    /// Start a service driven by a caller-provided clock
    pub fn start_with_clock(config: TimerConfig, clock: Arc<dyn Clock>) -> TimerResult<Self> {
        let inner = Arc::new(ServiceInner {
            clock,
            schedule: WaitQueue::with_config(
                Schedule {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    running: true,
                    compact_at: SCHEDULE_COMPACT_MIN,
                },
                SyncConfig::no_spin(),
            ),
            name: config.thread_name.clone(),
        });

        let worker_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_inner.run())
            .map_err(TimerError::Spawn)?;

        debug!(thread = %config.thread_name, tick = ?config.tick, "Timer service started");

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Start with default configuration
    pub fn with_defaults() -> TimerResult<Self> {
        Self::start(TimerConfig::default())
    }

    /// Current logical time
    #[inline]
    pub fn now(&self) -> Tick {
        self.inner.now()
    }

    #[inline]
    pub fn clock(&self) -> &dyn Clock {
        &*self.inner.clock
    }

    /// Entries in the schedule, stale ones included (for diagnostics)
    pub fn queued(&self) -> usize {
        self.inner.schedule.lock().heap.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.schedule.lock().running
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Armed calls are disarmed without firing. A callback already running
    /// finishes first. Called from inside a callback, this does not wait for
    /// the worker (it is the caller); the worker exits once the callback
    /// returns.
    pub fn shutdown(&self) {
        let mut dropped: Vec<Entry> = Vec::new();
        {
            let mut schedule = self.inner.schedule.lock();
            if schedule.running {
                schedule.running = false;
                schedule.signal_all();
                dropped.extend(schedule.heap.drain().map(|Reverse(entry)| entry));
            }
        }

        for entry in dropped {
            if let Some(timer) = entry.timer.upgrade() {
                timer.discard(entry.generation);
            }
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(thread = %self.inner.name, "Timer worker panicked");
            } else {
                debug!(thread = %self.inner.name, "Timer service shut down");
            }
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ServiceInner> {
        &self.inner
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("thread", &self.inner.name)
            .field("now", &self.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::DeferredCall;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::{Duration, Instant};

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition never became true");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_entries_order_by_expiry_then_seq() {
        let entry = |expires, seq| Entry {
            expires: Tick(expires),
            seq,
            generation: 0,
            timer: Weak::new(),
        };
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(entry(5, 0)));
        heap.push(Reverse(entry(3, 2)));
        heap.push(Reverse(entry(3, 1)));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(e)| (e.expires.get(), e.seq))
            .collect();
        assert_eq!(order, vec![(3, 1), (3, 2), (5, 0)]);
    }

    #[test]
    fn test_worker_thread_is_named() {
        let service =
            TimerService::start(TimerConfig::new().with_thread_name("named-timer")).unwrap();
        let name = Arc::new(Mutex::new(None));

        let name_clone = name.clone();
        let call = DeferredCall::new(&service, move || {
            *name_clone.lock() = thread::current().name().map(str::to_string);
        });
        call.schedule_in(0).unwrap();

        wait_until(|| name.lock().is_some());
        assert_eq!(name.lock().as_deref(), Some("named-timer"));
    }

    #[test]
    fn test_fires_in_expiry_order() {
        let service = TimerService::with_defaults().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let calls: Vec<_> = [30u64, 10, 20]
            .into_iter()
            .map(|delay| {
                let order = order.clone();
                let call = DeferredCall::new(&service, move || order.lock().push(delay));
                call.schedule_in(delay).unwrap();
                call
            })
            .collect();

        wait_until(|| order.lock().len() == 3);
        assert_eq!(*order.lock(), vec![10, 20, 30]);
        drop(calls);
    }

    #[test]
    fn test_rearming_does_not_grow_schedule() {
        let service = TimerService::with_defaults().unwrap();
        let call = DeferredCall::new(&service, || {});

        for _ in 0..(SCHEDULE_COMPACT_MIN * 4) {
            call.schedule_in(1_000_000).unwrap();
        }
        assert!(service.queued() <= SCHEDULE_COMPACT_MIN);
        assert!(call.is_pending());
    }

    #[test]
    fn test_shutdown_disarms_pending_calls() {
        let service = TimerService::with_defaults().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = fired.clone();
        let call = DeferredCall::new(&service, move || {
            fired_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });
        call.schedule_after(Duration::from_millis(20)).unwrap();
        assert!(call.is_pending());

        service.shutdown();
        assert!(!service.is_running());
        assert!(!call.is_pending());
        assert!(matches!(
            call.schedule_in(1),
            Err(TimerError::ServiceStopped)
        ));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
        // Second shutdown is a no-op
        service.shutdown();
    }

    #[test]
    fn test_shutdown_from_callback_does_not_deadlock() {
        let service = Arc::new(TimerService::with_defaults().unwrap());
        let done = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&service);
        let done_clone = done.clone();
        let call = DeferredCall::new(&service, move || {
            if let Some(service) = weak.upgrade() {
                service.shutdown();
            }
            done_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });
        call.schedule_in(0).unwrap();

        wait_until(|| done.load(AtomicOrdering::SeqCst) == 1);
        wait_until(|| !service.is_running());
    }
}
