/*!
 * Interrupt Tokens
 *
 * Cooperative cancellation for blocking waits. A token is shared between the
 * thread that may block and whoever decides it should stop blocking.
 *
 * # Wakeup Protocol
 *
 * A waiter registers the queue it sleeps on with the token and checks the
 * token under the queue lock before every sleep. `raise` stores the kind
 * first and then notifies every registered queue under that queue's lock, so
 * a raise can never fall between a waiter's check and its sleep.
 */

use super::wait::Notify;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const NOT_RAISED: u8 = 0;

/// Why a wait was interrupted
///
/// `Kill` outranks `Signal`: once a token is killed, raising `Signal` does not
/// downgrade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// Ordinary interruption; wakes interruptible waits
    Signal,
    /// Fatal interruption; wakes interruptible and killable waits
    Kill,
}

impl InterruptKind {
    #[inline]
    fn code(self) -> u8 {
        match self {
            InterruptKind::Signal => 1,
            InterruptKind::Kill => 2,
        }
    }

    #[inline]
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(InterruptKind::Signal),
            2 => Some(InterruptKind::Kill),
            _ => None,
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::Signal => f.write_str("signal"),
            InterruptKind::Kill => f.write_str("kill"),
        }
    }
}

struct Watchers {
    next_id: u64,
    entries: Vec<(u64, Weak<dyn Notify>)>,
}

struct TokenInner {
    raised: AtomicU8,
    watchers: Mutex<Watchers>,
}

/// Shared cancellation handle for blocking waits
///
/// Cloning yields another handle to the same token.
#[derive(Clone)]
pub struct InterruptToken {
    inner: Arc<TokenInner>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                raised: AtomicU8::new(NOT_RAISED),
                watchers: Mutex::new(Watchers {
                    next_id: 0,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    /// Raise the token and wake every wait currently blocked under it
    pub fn raise(&self, kind: InterruptKind) {
        self.inner.raised.fetch_max(kind.code(), Ordering::AcqRel);

        // Snapshot first: notifying takes queue locks, which a waiter holds
        // while it registers with us.
        let targets: Vec<Arc<dyn Notify>> = self
            .inner
            .watchers
            .lock()
            .entries
            .iter()
            .filter_map(|(_, queue)| queue.upgrade())
            .collect();

        tracing::debug!(kind = %kind, queues = targets.len(), "interrupt raised");

        for queue in targets {
            queue.notify_waiters();
        }
    }

    /// The strongest kind raised so far, if any
    #[inline]
    pub fn kind(&self) -> Option<InterruptKind> {
        InterruptKind::from_code(self.inner.raised.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.kind().is_some()
    }

    /// Lower the token so later waits block normally again
    pub fn clear(&self) {
        self.inner.raised.store(NOT_RAISED, Ordering::Release);
    }

    /// Number of waits currently registered (for diagnostics)
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().entries.len()
    }

    pub(crate) fn watch(&self, queue: Weak<dyn Notify>) -> WatchGuard<'_> {
        let mut watchers = self.inner.watchers.lock();
        let id = watchers.next_id;
        watchers.next_id += 1;
        watchers.entries.push((id, queue));
        WatchGuard { token: self, id }
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterruptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptToken")
            .field("raised", &self.kind())
            .finish()
    }
}

/// Registration of one blocked wait; unregisters on drop
pub(crate) struct WatchGuard<'a> {
    token: &'a InterruptToken,
    id: u64,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.token
            .inner
            .watchers
            .lock()
            .entries
            .retain(|(entry, _)| *entry != id);
    }
}

/// How a blocking wait reacts to interruption
#[derive(Debug, Clone, Copy, Default)]
pub enum WaitMode<'a> {
    /// Ignore interrupts entirely
    #[default]
    Uninterruptible,
    /// Return on any raised kind
    Interruptible(&'a InterruptToken),
    /// Return only on [`InterruptKind::Kill`]
    Killable(&'a InterruptToken),
}

impl<'a> WaitMode<'a> {
    #[inline]
    pub(crate) fn token(&self) -> Option<&'a InterruptToken> {
        match *self {
            WaitMode::Uninterruptible => None,
            WaitMode::Interruptible(token) | WaitMode::Killable(token) => Some(token),
        }
    }

    /// The interrupt this wait must honor right now, if any
    #[inline]
    pub(crate) fn pending(&self) -> Option<InterruptKind> {
        match *self {
            WaitMode::Uninterruptible => None,
            WaitMode::Interruptible(token) => token.kind(),
            WaitMode::Killable(token) => token.kind().filter(|kind| *kind == InterruptKind::Kill),
        }
    }
}
