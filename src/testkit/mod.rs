//! In-process test doubles (NEW §2e).
//!
//! Nothing under this module runs a real subprocess or depends on
//! wall-clock time; it exists purely so the match/apply/execute state
//! machines and the C/C++ rules are unit- and property-testable without a
//! real compiler, linker, or buildfile front end. Gated behind no feature
//! flag (the teacher's own `lab`-equivalent test harness is likewise part
//! of the ordinary crate surface, just never used outside `#[cfg(test)]`
//! modules and integration tests), but nothing here is part of the
//! supported public API for consumers driving real builds.

pub mod fake_cc;
pub mod graph;

pub use fake_cc::FakeCompiler;
pub use graph::GraphBuilder;
