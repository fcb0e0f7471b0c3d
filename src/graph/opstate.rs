//! Per-action operation state (`opstate`, §3) and the monotone task-count
//! machinery that drives match/execute (§4.2, §4.4, §4.5).

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::graph::target::TargetId;
use crate::rules::RuleId;
use crate::types::{MatchOptions, Offset};

/// Negotiated per-target match options (§3).
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchExtra {
    /// Options already applied by a prior match.
    pub cur_options: MatchOptions,
    /// Options requested by the current match request.
    pub new_options: MatchOptions,
}

impl MatchExtra {
    /// Returns `true` if `new_options` asks for bits not in `cur_options`
    /// (the rematch-required test, §4.2).
    #[must_use]
    pub fn requests_rematch(&self) -> bool {
        self.cur_options.requests_new(self.new_options)
    }

    /// Folds `new_options` into `cur_options` after a successful
    /// (re)match.
    pub fn commit(&mut self) {
        self.cur_options = self.cur_options.merged_with(self.new_options);
        self.new_options = MatchOptions::NONE;
    }
}

/// The outcome a recipe reports after running in execute (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeOutcome {
    /// No work was needed; the target is up to date.
    Unchanged,
    /// The target was rebuilt.
    Changed,
    /// Deferred: "don't advance my publicly visible state yet". Folded
    /// into `Unchanged` for the caller (§4.5).
    Postponed,
    /// Forward to the enclosing group's own execute state.
    Group,
    /// The recipe failed.
    Failed,
}

/// A rule's per-target decision, produced by `apply` and run in execute
/// (§9 "Recipe closures").
///
/// Rather than a boxed closure, a recipe is a tagged variant naming which
/// of the rule's own methods to invoke, plus an optional `match_data`
/// payload the rule stashed during `apply` (read back, e.g., by an install
/// rule that needs the compile rule's resolved object path).
pub struct Recipe {
    /// Which of the owning rule's entry points to invoke in execute.
    pub kind: RecipeKind,
    /// The rule that produced this recipe.
    pub rule: RuleId,
    /// Opaque, rule-defined data produced during `apply` and consumed
    /// during execute (or read back by another rule, e.g. install).
    pub match_data: Option<Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Recipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipe")
            .field("kind", &self.kind)
            .field("rule", &self.rule)
            .field("match_data", &self.match_data.is_some())
            .finish()
    }
}

/// The kind of action a [`Recipe`] performs in execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    /// Nothing to do; the target is already up to date.
    Noop,
    /// Forward execute to the enclosing group.
    Group,
    /// Run the rule's `perform_update`.
    PerformUpdate,
    /// Run the rule's `perform_clean`.
    PerformClean,
}

/// Per-action state attached to a target.
///
/// `task_count` is the single synchronization point (§5): observing
/// `>= Offset::Applied` happens-before the recipe having been assigned;
/// observing `== Offset::Executed` happens-before the recipe's externally
/// visible effects. All other fields are protected by the ownership that
/// holding the target lock confers (only the worker that last CASed
/// `task_count` into `Busy` may touch them), except where guarded
/// explicitly below.
pub struct Opstate {
    task_count: AtomicU8,
    waiters: Mutex<()>,
    condvar: Condvar,
    /// The selected rule, set on entry to `Offset::Matched`.
    pub rule: Option<RuleId>,
    /// The recipe produced by `apply`, set on entry to `Offset::Applied`.
    pub recipe: Option<Recipe>,
    /// Resolved prerequisite target list for this action (rule chaining
    /// may synthesize targets not literally named by the buildfile, §3).
    pub prerequisite_targets: Vec<TargetId>,
    /// Negotiated match options.
    pub match_extra: MatchExtra,
    /// Post-hoc prerequisites collected after `apply`, matched in a later
    /// pass by the meta-operation driver (§4.4).
    pub posthoc_prerequisites: Vec<TargetId>,
    /// The outcome the recipe reported, set on entry to `Offset::Executed`
    /// (or `Offset::Failed`).
    pub last_outcome: Option<RecipeOutcome>,
}

impl Default for Opstate {
    fn default() -> Self {
        Self {
            task_count: AtomicU8::new(offset_to_code(Offset::Tried)),
            waiters: Mutex::new(()),
            condvar: Condvar::new(),
            rule: None,
            recipe: None,
            prerequisite_targets: Vec::new(),
            match_extra: MatchExtra::default(),
            posthoc_prerequisites: Vec::new(),
            last_outcome: None,
        }
    }
}

impl Opstate {
    /// Creates a fresh `opstate`, as on entering a new action (§3
    /// Lifecycle: "`opstate` is reset on entering each new action").
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current offset.
    #[must_use]
    pub fn offset(&self) -> Offset {
        code_to_offset(self.task_count.load(Ordering::Acquire))
    }

    /// Attempts to CAS the offset from `from` to `Offset::Busy`, the sole
    /// lock-acquisition primitive (§4.2).
    ///
    /// Returns `Ok(())` on success; `Err(actual)` with the observed offset
    /// on failure (the caller then decides between cycle detection and
    /// suspension, §4.2).
    pub fn try_lock(&self, from: Offset) -> Result<(), Offset> {
        match self.task_count.compare_exchange(
            offset_to_code(from),
            offset_to_code(Offset::Busy),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(actual) => Err(code_to_offset(actual)),
        }
    }

    /// Releases the lock, storing `to` and waking any suspended waiters
    /// (§4.2: "Lock release stores the new offset and signals waiters").
    pub fn unlock_to(&self, to: Offset) {
        self.task_count.store(offset_to_code(to), Ordering::Release);
        let _guard = self.waiters.lock();
        self.condvar.notify_all();
    }

    /// Blocks the calling thread until `task_count` is no longer `Busy`,
    /// returning the offset observed on wake. The phase lock must not be
    /// held while suspended so phase switches can still proceed (§4.2).
    pub fn wait_while_busy(&self) -> Offset {
        loop {
            let cur = self.offset();
            if cur != Offset::Busy {
                return cur;
            }
            let mut guard = self.waiters.lock();
            // Re-check under the waiters lock to avoid the missed-wakeup
            // race between the load above and acquiring this lock.
            if self.offset() == Offset::Busy {
                self.condvar.wait(&mut guard);
            }
        }
    }
}

fn offset_to_code(o: Offset) -> u8 {
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

fn code_to_offset(c: u8) -> Offset {
    match c {
        0 => Offset::Tried,
        1 => Offset::Touched,
        2 => Offset::Matched,
        3 => Offset::Applied,
        4 => Offset::Executed,
        5 => Offset::Busy,
        _ => Offset::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_opstate_starts_tried() {
        assert_eq!(Opstate::new().offset(), Offset::Tried);
    }

    #[test]
    fn try_lock_then_unlock_roundtrip() {
        let op = Opstate::new();
        op.try_lock(Offset::Tried).unwrap();
        assert_eq!(op.offset(), Offset::Busy);
        op.unlock_to(Offset::Matched);
        assert_eq!(op.offset(), Offset::Matched);
    }

    #[test]
    fn try_lock_fails_when_already_busy() {
        let op = Opstate::new();
        op.try_lock(Offset::Tried).unwrap();
        assert_eq!(op.try_lock(Offset::Tried), Err(Offset::Busy));
    }

    #[test]
    fn match_extra_commit_merges_and_clears_new() {
        let mut me = MatchExtra {
            cur_options: MatchOptions::from_bits(0b01),
            new_options: MatchOptions::from_bits(0b10),
        };
        assert!(me.requests_rematch());
        me.commit();
        assert_eq!(me.cur_options.bits(), 0b11);
        assert!(me.new_options.is_empty());
    }
}
