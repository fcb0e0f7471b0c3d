//! `opstate` task-count offsets.
//!
//! An `opstate`'s task counter is an atomic value whose meaning is an offset
//! from a per-action base, not an absolute counter. Offsets are totally
//! ordered: `Tried < Touched < Matched < Applied < Executed`, plus a
//! transient `Busy` level a worker occupies while advancing a target.
//! `Failed` is a terminal level reachable from any other level.
//!
//! # Invariant: monotone offsets (Testable Property 2)
//!
//! For a target's `opstate` across a single action, letting `o(t)` be the
//! offset observed at time `t`:
//!
//! ```text
//! forall t1 < t2 in the same action: o(t1) <= o(t2)
//!     unless a rematch with new match_extra options explicitly reopens
//!     the target (o(t2) < o(t1) is then accompanied by setting
//!     new_options != 0).
//! ```
//!
//! `Busy` is never the level left behind after a transition completes: a
//! worker that CASes into `Busy` always CASes back out to some other level
//! (or to `Failed`) before releasing the target lock (§4.2).

use std::fmt;

/// A lifecycle offset for a target's `opstate`, relative to the per-action
/// base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Offset {
    /// Not yet touched by this action.
    Tried,
    /// Observed but not yet matched (e.g. group membership noted).
    Touched,
    /// A rule has been selected.
    Matched,
    /// `apply` has run and a recipe is stored.
    Applied,
    /// The recipe has run and its effects are externally visible.
    Executed,
    /// A worker is actively transitioning this target; never observed as a
    /// final state by a correct caller.
    Busy,
    /// A terminal failure state, reachable from any other level.
    Failed,
}

impl Offset {
    /// Returns `true` if progressing from `self` to `other` without an
    /// explicit rematch is consistent with the monotone-offset invariant.
    #[must_use]
    pub fn permits_forward(self, other: Self) -> bool {
        use Offset::{Applied, Busy, Executed, Failed, Matched, Touched, Tried};
        match (self, other) {
            (Failed, _) | (_, Failed) => true,
            (Busy, _) | (_, Busy) => true,
            (a, b) => rank(a) <= rank(b) || matches!((a, b), (Tried | Touched, Matched | Applied | Executed))
        }
    }
}

fn rank(o: Offset) -> u8 {
    match o {
        Offset::Tried => 0,
        Offset::Touched => 1,
        Offset::Matched => 2,
        Offset::Applied => 3,
        Offset::Executed => 4,
        Offset::Busy => 5,
        Offset::Failed => 6,
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tried => "tried",
            Self::Touched => "touched",
            Self::Matched => "matched",
            Self::Applied => "applied",
            Self::Executed => "executed",
            Self::Busy => "busy",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_lifecycle() {
        assert!(Offset::Tried < Offset::Touched);
        assert!(Offset::Touched < Offset::Matched);
        assert!(Offset::Matched < Offset::Applied);
        assert!(Offset::Applied < Offset::Executed);
    }

    #[test]
    fn busy_and_failed_permit_any_transition() {
        assert!(Offset::Executed.permits_forward(Offset::Busy));
        assert!(Offset::Busy.permits_forward(Offset::Matched));
        assert!(Offset::Executed.permits_forward(Offset::Failed));
    }
}
