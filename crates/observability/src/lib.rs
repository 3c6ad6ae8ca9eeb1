//! Tracing, logging and the ownership audit trail (shared setup).

/// Initialize process-wide logging with the given output format.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Server-side audit events for authorization decisions.
pub mod audit;

pub use tracing::LogFormat;
