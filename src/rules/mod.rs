//! Rule registry and ad hoc rule selection (§3 "Rule", §4.3).
//!
//! A [`Rule`] is a named object with `match`/`apply` entry points. Rules are
//! registered per meta-operation, per operation, per target type in an
//! ordered map scanned outermost→innermost scope with hint-based filtering
//! (§4.3 step 4). Ad hoc rules (attached directly to a target rather than
//! looked up by type) are tried first (§4.3 steps 1-3).

pub mod cc;
pub mod registry;

pub use registry::{AdhocRule, MatchHint, RuleId, RuleRegistry, ScopeId, SelectedRule};

use crate::action::Action;
use crate::error::Result;
use crate::graph::{MatchExtra, Recipe, RecipeOutcome, TargetGraph, TargetId};

/// A named object with `match`/`apply` entry points (§3 "Rule").
pub trait Rule: Send + Sync {
    /// Returns `true` if this rule is willing to handle `target` under
    /// `action`, optionally consulting/updating `match_extra`.
    fn matches(&self, action: Action, graph: &TargetGraph, target: TargetId, hint: MatchHint, match_extra: &MatchExtra) -> bool;

    /// Runs the rule's `apply` step: resolves prerequisites, opens any
    /// per-target cache (e.g. depdb), and returns the recipe to run in
    /// execute.
    fn apply(
        &self,
        action: Action,
        graph: &mut TargetGraph,
        target: TargetId,
        match_extra: &MatchExtra,
    ) -> Result<Recipe>;

    /// `true` if this rule can be selected as a fallback carrier when no
    /// other rule's `match` returned `true` (§4.3 step 3, step 4).
    fn reverse_fallback(&self, _action: Action, _target: TargetId) -> bool {
        false
    }

    /// `true` if this rule supports `reapply` (re-running `apply` with new
    /// options on an already-applied target, §4.4).
    fn supports_reapply(&self) -> bool {
        false
    }

    /// Runs the rule's `apply_posthoc` step, if it declares the
    /// capability: additional prerequisites collected after `apply` but
    /// matched later, in a separate pass, to avoid cycles with
    /// self-referential groups (§3 "Rule" optional capabilities, §4.4).
    /// The default declares no post-hoc prerequisites.
    fn apply_posthoc(
        &self,
        _action: Action,
        _graph: &TargetGraph,
        _target: TargetId,
    ) -> Result<Vec<TargetId>> {
        Ok(Vec::new())
    }

    /// Re-runs `apply` for a target whose options grew after it was
    /// already applied. The default forwards to [`Self::apply`].
    fn reapply(
        &self,
        action: Action,
        graph: &mut TargetGraph,
        target: TargetId,
        match_extra: &MatchExtra,
    ) -> Result<Recipe> {
        self.apply(action, graph, target, match_extra)
    }

    /// Runs the recipe `apply` produced (§4.5 execute). The default treats
    /// any recipe as a no-op; rules that produce `PerformUpdate`/
    /// `PerformClean` recipes override this to dispatch to their own
    /// collaborator (a [`crate::rules::cc::toolchain::Toolchain`], for the
    /// C/C++ rules).
    fn perform(
        &self,
        _action: Action,
        _graph: &TargetGraph,
        _target: TargetId,
        _recipe: &Recipe,
    ) -> Result<RecipeOutcome> {
        Ok(RecipeOutcome::Unchanged)
    }
}
