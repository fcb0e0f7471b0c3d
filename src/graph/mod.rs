//! The target graph: identity, prerequisites, groups, and per-action
//! operation state (§3 Data model).

pub mod kind;
pub mod opstate;
pub mod target;

pub use kind::TargetKind;
pub use opstate::{MatchExtra, Opstate, Recipe, RecipeKind, RecipeOutcome};
pub use target::{Prerequisite, PrereqRole, Target, TargetGraph, TargetId, TargetKey};

use parking_lot::RwLock;
use std::sync::Arc;

/// A `TargetGraph` shared across worker threads.
///
/// The graph's own synchronization is a single `RwLock` guarding target
/// insertion and the rare cross-target structural mutation (e.g. setting
/// `group`); the *real* per-target exclusion that match/execute rely on is
/// each target's [`Opstate`] CAS (§4.2, §5). A reader only needs the read
/// lock to resolve a [`TargetId`] to a `&Target` and then operates on that
/// target's `Opstate` lock-free from there.
pub type SharedGraph = Arc<RwLock<TargetGraph>>;
