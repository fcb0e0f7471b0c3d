//! forgec: a parallel match/apply/execute build scheduler with C/C++ compile
//! and link rules.
//!
//! # Overview
//!
//! A driver hands the scheduler a set of root [`graph::Target`]s under an
//! [`action::Action`] (meta-operation + operation). The scheduler moves each
//! reachable target through phases `load -> match -> execute`
//! ([`sched::Phase`]). In match, each target's rule is selected
//! ([`rules::RuleRegistry`]) and its `apply` function runs, recursively
//! triggering match of prerequisites. The C/C++ compile rule
//! ([`rules::cc::compile`]) opens a dependency database ([`depdb`]), runs the
//! header/module extractor, and records injected prerequisites. In execute,
//! the recipe returned by `apply` runs; for compile it spawns the compiler,
//! for link it links already-updated objects and libraries
//! ([`rules::cc::link`]).
//!
//! # Module structure
//!
//! - [`types`]: identifiers and small value types shared across the crate.
//! - [`graph`]: the target, its on-disk identity, prerequisites, and
//!   per-action operation state (`opstate`).
//! - [`action`]: the `(meta_operation, operation)` pair that drives a pass.
//! - [`rules`]: the rule registry, ad hoc rule selection, and the C/C++
//!   compile and link rules.
//! - [`depdb`]: the per-target dependency-database file format and contract.
//! - [`sched`]: the phase/lock/scheduler machinery, the worker pool, target
//!   locking, and dependency-cycle detection.
//! - [`driver`]: ties scheduler, graph, and rules together into the
//!   match/apply/execute state machines and the meta-operation post-hoc pass.
//! - [`backlink`]: forwarded-project backlink support.
//! - [`diag`]: the diagnostics data model (not formatting; see crate docs).
//! - [`error`]: the crate-wide error type.
//! - [`config`]: process-wide tunables, loadable from environment/TOML/CLI.
//! - [`observability`]: structured logging levels and lightweight metrics.
//! - [`util`]: internal, dependency-light helpers (arena, deterministic
//!   hashing, deterministic RNG).
//! - [`testkit`]: in-process test doubles (fake toolchain, graph builder).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod backlink;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod depdb;
pub mod diag;
pub mod driver;
pub mod error;
pub mod graph;
pub mod observability;
pub mod rules;
pub mod sched;
pub mod testkit;
pub mod types;
pub mod util;

pub use action::{Action, MetaOperationId, OperationId};
pub use config::Config;
pub use driver::Driver;
pub use error::{Error, ErrorKind, Result};
pub use graph::{Target, TargetId, TargetKind};
