//! Process-wide tracing setup shared by the engine's binaries.

/// Initialize process-wide tracing.
///
/// Filter comes from `RUST_LOG` (default `info`); `FEEDFLOW_LOG_FORMAT`
/// selects `json` (default) or `pretty` output. Safe to call multiple times;
/// subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;
