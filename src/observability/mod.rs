//! Observability for the journal subsystem
//!
//! Per OBSERVABILITY.md: structured synchronous JSON logs and a flat,
//! counters-only metrics registry. Nothing here samples, exports or reports.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::JournalMetrics;
