/*!
 * kcompat-sync Library
 * Completion, semaphore, wait queue and deferred-call primitives for
 * driver-style code running in user space
 */

pub mod core;
pub mod monitoring;
pub mod timer;

// Re-exports
pub use crate::core::errors::{TimerError, TimerResult, WaitError, WaitResult};
pub use crate::core::sync::{
    CountingGate, InterruptKind, InterruptToken, QueueGuard, SyncConfig, WaitMode, WaitQueue,
    WaitableFlag, WakeResult,
};
pub use monitoring::{init_tracing, try_init_tracing, DiagnosticRegistry, TraceFormat};
pub use timer::{Clock, DeferredCall, Tick, TickClock, TimerConfig, TimerService, TimerState};
