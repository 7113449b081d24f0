/*!
 * Core Module
 * Synchronization primitives, error types and system limits
 */

pub mod errors;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use errors::*;
pub use sync::{
    CountingGate, InterruptKind, InterruptToken, QueueGuard, SyncConfig, WaitMode, WaitQueue,
    WaitableFlag, WakeResult,
};
