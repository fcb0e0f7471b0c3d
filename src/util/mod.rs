//! Internal, dependency-light helpers.
//!
//! These are intentionally small and deterministic so that lab-mode runs
//! (fixed-seed work-stealing, reproducible iteration order for diagnostics)
//! stay reproducible across platforms.

pub mod arena;
pub mod det_hash;
pub mod det_rng;

pub use arena::{Arena, ArenaIndex};
pub use det_hash::{DetBuildHasher, DetHashMap};
pub use det_rng::DetRng;
