/*!
 * Synchronization Primitives
 *
 * Blocking wait/notify primitives for driver-style code:
 * - `WaitQueue`: lock + condition variable with FIFO signal hand-off
 * - `WaitableFlag`: completion (one-shot or counted signal)
 * - `CountingGate`: counting semaphore
 *
 * # Architecture
 *
 * `WaitQueue` is the leaf. The flag and the gate each own exactly one queue
 * and keep their count inside it, so the count and the waiter list change
 * under the same lock and no wakeup can be lost between a check and a sleep.
 *
 * # Interruption
 *
 * Every blocking call can take an `InterruptToken` through `WaitMode` and
 * reports a tri-state result: `Ok`, `Err(Timeout)` or `Err(Interrupted)`.
 */

mod completion;
mod config;
mod interrupt;
mod semaphore;
mod wait;

// Re-export public API
pub use completion::WaitableFlag;
pub use config::SyncConfig;
pub use interrupt::{InterruptKind, InterruptToken, WaitMode};
pub use semaphore::CountingGate;
pub use wait::{QueueGuard, WaitQueue, WakeResult};
