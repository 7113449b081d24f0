/*!
 * Monitoring
 * Tracing setup and rate-limited diagnostics
 */

pub mod diagnostics;
mod tracer;

pub use diagnostics::{registry, reset_diagnostics, DiagnosticRegistry};
pub use tracer::{init_tracing, try_init_tracing, try_init_tracing_with, TraceFormat};
