//! Structured logging levels and lightweight metrics (NEW §2d).
//!
//! The crate logs through `tracing`; this module only defines the severity
//! vocabulary used for the (out-of-scope) diagnostics-formatting
//! collaborator to filter on, and a small atomic counter registry for the
//! handful of counters the scheduler and depdb engine want to expose to
//! tests and an optional end-of-run summary.

pub mod level;
pub mod metrics;

pub use level::LogLevel;
pub use metrics::Metrics;
