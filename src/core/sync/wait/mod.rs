/*!
 * Wait Queue
 *
 * Mutex + condition variable pair with FIFO hand-off of signals to queued
 * waiters. Every other primitive in this crate is built on it.
 */

mod queue;
mod traits;

pub use queue::{QueueGuard, WaitQueue};
pub use traits::WakeResult;

pub(crate) use traits::Notify;
pub(crate) use queue::deadline_after;
