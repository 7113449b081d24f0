/*!
 * Deferred Calls
 *
 * A one-shot callback armed for a future tick and run on the service worker.
 *
 * Each arm bumps a generation number and queues `(expires, generation)` with
 * the service. The worker hands every due entry back to its timer, which
 * fires only if the generation is still current: moving or re-arming a call
 * never has to find and remove its old entry.
 */

use super::clock::Tick;
use super::service::{ServiceInner, TimerService};
use crate::core::errors::TimerResult;
use crate::core::sync::{SyncConfig, WaitMode, WaitQueue};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, error, trace};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle of a deferred call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Not armed
    Idle,
    /// Waiting for its expiration tick
    Armed,
    /// Callback running on the worker
    Firing,
    /// Disarmed before expiring; becomes `Idle` once the service drops the
    /// stale entry
    Cancelled,
}

struct TimerSlot {
    state: TimerState,
    expires: Tick,
    /// Worker thread currently inside the callback
    firing_on: Option<ThreadId>,
    callback: Callback,
    fired: u64,
}

pub(crate) struct TimerShared {
    slot: WaitQueue<TimerSlot>,
    /// Bumped under the slot lock on every arm; read lock-free by the service
    generation: AtomicU64,
}

impl TimerShared {
    /// Whether an entry queued for `generation` is still the armed one
    #[inline]
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Run the callback for an expired entry of `generation`
    pub(crate) fn fire(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if !self.is_current(generation) {
            trace!(generation, "Skipping stale timer entry");
            return;
        }

        match slot.state {
            TimerState::Armed => {}
            TimerState::Cancelled => {
                slot.state = TimerState::Idle;
                return;
            }
            TimerState::Idle | TimerState::Firing => return,
        }

        slot.state = TimerState::Firing;
        slot.firing_on = Some(thread::current().id());
        let callback = slot.callback.clone();
        let expires = slot.expires;

        trace!(expires = %expires, generation, "Deferred call firing");
        let outcome = slot.unlocked(|| panic::catch_unwind(AssertUnwindSafe(|| (*callback)())));

        if let Err(payload) = outcome {
            error!(
                expires = %expires,
                panic = %panic_message(payload.as_ref()),
                "Deferred call callback panicked"
            );
        }

        slot.firing_on = None;
        slot.fired += 1;
        // The callback may have re-armed itself
        if slot.state == TimerState::Firing {
            slot.state = TimerState::Idle;
        }
        slot.signal_all();
    }

    /// Disarm an entry the service dropped without firing
    pub(crate) fn discard(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if self.is_current(generation)
            && matches!(slot.state, TimerState::Armed | TimerState::Cancelled)
        {
            slot.state = TimerState::Idle;
            debug!(expires = %slot.expires, "Deferred call discarded by service shutdown");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Cancellable one-shot callback run by a [`TimerService`]
///
/// Dropping the call cancels it without waiting for a callback already in
/// progress; use [`cancel_sync`](Self::cancel_sync) first when the callback
/// borrows state that is about to go away.
///
/// # Examples
///
/// ```
/// use kcompat_sync::{DeferredCall, TimerService, TimerState};
///
/// let service = TimerService::with_defaults().unwrap();
/// let call = DeferredCall::new(&service, || println!("expired"));
///
/// call.schedule_in(1_000).unwrap();
/// assert_eq!(call.state(), TimerState::Armed);
///
/// assert!(call.cancel());
/// assert!(!call.is_pending());
/// ```
pub struct DeferredCall {
    shared: Arc<TimerShared>,
    service: Arc<ServiceInner>,
}

impl DeferredCall {
    /// Bind `callback` to `service`; the call starts idle
    pub fn new<F>(service: &TimerService, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let slot = TimerSlot {
            state: TimerState::Idle,
            expires: Tick::ZERO,
            firing_on: None,
            callback: Arc::new(callback),
            fired: 0,
        };

        Self {
            shared: Arc::new(TimerShared {
                slot: WaitQueue::with_config(slot, SyncConfig::no_spin()),
                generation: AtomicU64::new(0),
            }),
            service: service.inner().clone(),
        }
    }

    /// Replace the callback; a firing already in progress keeps the old one
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.slot.lock().callback = Arc::new(callback);
    }

    /// Arm for `expires`, moving any pending expiration
    ///
    /// Returns whether the call was already pending. A tick at or before
    /// `now()` fires on the next worker pass.
    pub fn schedule_at(&self, expires: Tick) -> TimerResult<bool> {
        let (was_pending, generation) = {
            let mut slot = self.shared.slot.lock();
            let was_pending = slot.state == TimerState::Armed;
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            slot.expires = expires;
            slot.state = TimerState::Armed;
            (was_pending, generation)
        };

        let result = self
            .service
            .enqueue(expires, generation, Arc::downgrade(&self.shared));

        if let Err(err) = result {
            let mut slot = self.shared.slot.lock();
            if self.shared.is_current(generation) {
                slot.state = TimerState::Idle;
            }
            return Err(err);
        }

        trace!(expires = %expires, generation, was_pending, "Deferred call armed");
        Ok(was_pending)
    }

    /// Arm `ticks` ticks from now
    pub fn schedule_in(&self, ticks: u64) -> TimerResult<bool> {
        self.schedule_at(self.service.now() + ticks)
    }

    /// Arm for `delay` from now, rounded up to whole ticks
    ///
    /// Like jiffies arithmetic, the current tick is already partly over, so
    /// the call may run up to one tick before `delay` has fully elapsed.
    pub fn schedule_after(&self, delay: Duration) -> TimerResult<bool> {
        self.schedule_in(self.service.ticks_for(delay))
    }

    /// Disarm; returns whether a pending firing was prevented
    ///
    /// Does not wait for a callback that is already running.
    pub fn cancel(&self) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.state != TimerState::Armed {
            return false;
        }
        slot.state = TimerState::Cancelled;
        trace!(expires = %slot.expires, "Deferred call cancelled");
        true
    }

    /// Disarm and wait until no callback for this call is running
    ///
    /// Returns whether a pending firing was prevented. Re-arms made by the
    /// callback while this waits are cancelled too. Called from the callback
    /// itself this cannot wait for its own return; it disarms and returns.
    pub fn cancel_sync(&self) -> bool {
        let mut slot = self.shared.slot.lock();
        let mut cancelled = false;

        let current = thread::current().id();
        if slot.firing_on == Some(current) {
            crate::warn_on_once!(true, "cancel_sync called from its own callback; not waiting");
            if slot.state == TimerState::Armed {
                slot.state = TimerState::Cancelled;
                cancelled = true;
            }
            return cancelled;
        }

        // Uninterruptible with no deadline cannot fail
        let _ = slot.wait_while(None, WaitMode::Uninterruptible, |slot| {
            if slot.state == TimerState::Armed {
                slot.state = TimerState::Cancelled;
                cancelled = true;
            }
            slot.firing_on.is_some()
        });

        trace!(cancelled, "Deferred call cancelled synchronously");
        cancelled
    }

    pub fn state(&self) -> TimerState {
        self.shared.slot.lock().state
    }

    /// Whether an expiration is armed
    pub fn is_pending(&self) -> bool {
        self.state() == TimerState::Armed
    }

    /// Armed expiration tick, if pending
    pub fn expires(&self) -> Option<Tick> {
        let slot = self.shared.slot.lock();
        (slot.state == TimerState::Armed).then_some(slot.expires)
    }

    /// Completed callback runs, panicking ones included
    pub fn fire_count(&self) -> u64 {
        self.shared.slot.lock().fired
    }
}

impl Drop for DeferredCall {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("DeferredCall")
            .field("state", &slot.state)
            .field("expires", &slot.expires)
            .field("fired", &slot.fired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::WaitableFlag;
    use crate::timer::TimerConfig;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    fn service() -> TimerService {
        TimerService::start(TimerConfig::default()).unwrap()
    }

    fn counter() -> (Arc<AtomicU64>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let clone = count.clone();
        (count, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_new_call_is_idle() {
        let service = service();
        let call = DeferredCall::new(&service, || {});
        assert_eq!(call.state(), TimerState::Idle);
        assert_eq!(call.expires(), None);
        assert!(!call.cancel());
        assert!(!call.cancel_sync());
    }

    #[test]
    fn test_fires_once() {
        let service = service();
        let done = Arc::new(WaitableFlag::new());
        let (count, bump) = counter();

        let done_clone = done.clone();
        let call = DeferredCall::new(&service, move || {
            bump();
            done_clone.complete();
        });

        assert!(!call.schedule_in(2).unwrap());
        assert!(done.wait_timeout(Duration::from_secs(5)).is_ok());

        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(call.fire_count(), 1);
        assert_eq!(call.state(), TimerState::Idle);
    }

    #[test]
    fn test_rearm_moves_expiration() {
        let service = service();
        let (count, bump) = counter();
        let call = DeferredCall::new(&service, bump);

        let now = service.now();
        assert!(!call.schedule_at(now + 10_000).unwrap());
        assert!(call.schedule_at(now + 20).unwrap());
        assert_eq!(call.expires(), Some(now + 20));

        let deadline = Instant::now() + Duration::from_secs(5);
        while call.fire_count() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!call.is_pending());
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let service = service();
        let (count, bump) = counter();
        let call = DeferredCall::new(&service, bump);

        call.schedule_after(Duration::from_millis(30)).unwrap();
        assert!(call.cancel());
        assert_eq!(call.state(), TimerState::Cancelled);
        assert!(!call.cancel());

        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // The stale entry has been reaped by now
        assert_eq!(call.state(), TimerState::Idle);
    }

    #[test]
    fn test_panicking_callback_keeps_worker_alive() {
        let service = service();
        let failing = DeferredCall::new(&service, || panic!("callback failure"));
        failing.schedule_in(0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while failing.fire_count() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(failing.state(), TimerState::Idle);

        let done = Arc::new(WaitableFlag::new());
        let done_clone = done.clone();
        let healthy = DeferredCall::new(&service, move || done_clone.complete());
        healthy.schedule_in(0).unwrap();
        assert!(done.wait_timeout(Duration::from_secs(5)).is_ok());
        assert!(service.is_running());
    }

    #[test]
    fn test_set_callback_applies_to_next_firing() {
        let service = service();
        let (first, bump_first) = counter();
        let (second, bump_second) = counter();

        let call = DeferredCall::new(&service, bump_first);
        call.set_callback(bump_second);
        call.schedule_in(0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while call.fire_count() == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let text: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(text.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
