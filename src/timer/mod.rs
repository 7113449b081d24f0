/*!
 * Timers
 *
 * Deferred one-shot callbacks driven by a logical tick clock and run on a
 * dedicated worker thread.
 */

mod clock;
mod config;
mod deferred;
mod service;

pub use clock::{Clock, Tick, TickClock};
pub use config::TimerConfig;
pub use deferred::{DeferredCall, TimerState};
pub use service::TimerService;
