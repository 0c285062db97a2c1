//! Tracing and logging setup shared by ledger binaries and tests.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogFormat, ParseLogFormatError, init, init_for_tests};
