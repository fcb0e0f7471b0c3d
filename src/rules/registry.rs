//! The rule map and rule-selection algorithm (§4.3).

use std::sync::Arc;

use crate::action::{Action, OperationId};
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{TargetGraph, TargetId, TargetKind};
use crate::rules::Rule;
use crate::util::det_hash::DetHashMap;

/// A stable handle to a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RuleId(u32);

/// An opaque scope handle (a node in the project's directory-scope chain,
/// from a target's own "base scope" out through ancestor scopes to the
/// outermost "global" scope, §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

/// A rule's hint: rules can be filtered to targets carrying a matching
/// hint string (e.g. a target-type suffix like `.cxx`); the empty hint
/// matches any target on a second pass for non-`perform` meta-operations
/// (§4.3 step 4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchHint(pub Option<String>);

impl MatchHint {
    /// The hint carried by a target with no specific hint.
    pub const NONE: Self = Self(None);

    /// Creates a hint.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(Some(s.into()))
    }
}

struct RegisteredRule {
    id: RuleId,
    target_kind: TargetKind,
    hint: MatchHint,
}

#[derive(Default)]
struct ScopeNode {
    parent: Option<ScopeId>,
    /// `(meta_operation-agnostic operation key) -> rules for that (op,
    /// target-type)`. Meta-operation scoping is folded into the operation
    /// key itself by the caller of [`RuleRegistry::register`]; `perform`
    /// and operations that inherit from it share entries via
    /// [`Action::inherits_from_perform`] at lookup time.
    table: DetHashMap<OperationId, Vec<RegisteredRule>>,
}

/// The outcome of a successful rule-selection pass.
#[derive(Debug, Clone, Copy)]
pub struct SelectedRule {
    /// The selected rule.
    pub rule: RuleId,
    /// Whether the rule was selected as a `reverse_fallback` carrier
    /// rather than an ordinary match.
    pub via_fallback: bool,
}

/// An ad hoc rule attached directly to a target rather than looked up by
/// type (§4.3 steps 1-3).
#[derive(Debug, Clone, Copy)]
pub struct AdhocRule {
    /// The underlying registered rule.
    pub rule: RuleId,
}

/// The process-wide rule map (§3 "Rule").
pub struct RuleRegistry {
    rules: Vec<Arc<dyn Rule>>,
    names: Vec<String>,
    scopes: Vec<ScopeNode>,
    global_scope: ScopeId,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// Creates a registry with a single global scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            names: Vec::new(),
            scopes: vec![ScopeNode::default()],
            global_scope: ScopeId(0),
        }
    }

    /// The outermost, parent-less scope every other scope eventually
    /// chains up to.
    #[must_use]
    pub const fn global_scope(&self) -> ScopeId {
        self.global_scope
    }

    /// Creates a new scope nested under `parent` (use `global_scope()` for
    /// a project's root scope).
    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(ScopeNode {
            parent: Some(parent),
            table: DetHashMap::default(),
        });
        ScopeId((self.scopes.len() - 1) as u32)
    }

    /// Registers a rule implementation, returning its id.
    pub fn insert(&mut self, name: impl Into<String>, rule: Arc<dyn Rule>) -> RuleId {
        self.rules.push(rule);
        self.names.push(name.into());
        RuleId((self.rules.len() - 1) as u32)
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn get(&self, id: RuleId) -> &dyn Rule {
        self.rules[id.0 as usize].as_ref()
    }

    /// The rule's registered name, for diagnostics.
    #[must_use]
    pub fn name(&self, id: RuleId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Binds a rule into `scope`'s table for `(operation, target_kind)`
    /// with an optional hint.
    pub fn register(
        &mut self,
        scope: ScopeId,
        operation: OperationId,
        target_kind: TargetKind,
        hint: MatchHint,
        rule: RuleId,
    ) {
        self.scopes[scope.0 as usize]
            .table
            .entry(operation)
            .or_default()
            .push(RegisteredRule {
                id: rule,
                target_kind,
                hint,
            });
    }

    /// Selects a rule for `target` under `action`, starting the scope walk
    /// at `base_scope` (§4.3 steps 4-6).
    ///
    /// Ad hoc rule selection (steps 1-3) and group inheritance are the
    /// caller's (the driver's) responsibility, since they require looking
    /// at the target's own `adhoc_rules`/`group` fields before falling
    /// back to this scope walk; this method implements the type-map scan.
    pub fn select_by_type(
        &self,
        action: Action,
        target_kind: TargetKind,
        target_hint: &MatchHint,
        base_scope: ScopeId,
    ) -> Result<Option<SelectedRule>> {
        let op = action.outer;
        let mut candidate: Option<(RuleId, bool)> = None;
        let mut ambiguous_with: Option<RuleId> = None;
        let mut fallback: Option<RuleId> = None;

        let mut scope = Some(base_scope);
        while let Some(s) = scope {
            let node = &self.scopes[s.0 as usize];
            if let Some(entries) = self.lookup_operation(node, op, action) {
                self.scan_entries(entries, target_kind, target_hint, &mut candidate, &mut ambiguous_with, &mut fallback);
            }
            if candidate.is_some() {
                break;
            }
            scope = node.parent;
        }

        // Second pass with empty hint, non-`perform` meta-operations only
        // (§4.3 step 4 final sentence).
        if candidate.is_none() && target_hint.0.is_some() && action.meta_operation != crate::action::MetaOperationId::PERFORM {
            let empty = MatchHint::NONE;
            let mut scope = Some(base_scope);
            while let Some(s) = scope {
                let node = &self.scopes[s.0 as usize];
                if let Some(entries) = self.lookup_operation(node, op, action) {
                    self.scan_entries(entries, target_kind, &empty, &mut candidate, &mut ambiguous_with, &mut fallback);
                }
                if candidate.is_some() {
                    break;
                }
                scope = node.parent;
            }
        }

        if let Some(other) = ambiguous_with {
            let (first, _) = candidate.expect("ambiguity only set alongside a candidate");
            return Err(Error::ambiguous_rule(format!(
                "ambiguous rule match for {:?}: {} and {} both apply",
                target_kind,
                self.name(first),
                self.name(other)
            )));
        }

        if let Some((rule, via_fallback)) = candidate {
            return Ok(Some(SelectedRule { rule, via_fallback }));
        }
        if let Some(rule) = fallback {
            return Ok(Some(SelectedRule { rule, via_fallback: true }));
        }
        Ok(None)
    }

    fn lookup_operation<'a>(
        &self,
        node: &'a ScopeNode,
        op: OperationId,
        action: Action,
    ) -> Option<&'a [RegisteredRule]> {
        if let Some(v) = node.table.get(&op) {
            return Some(v);
        }
        if action.inherits_from_perform()
            && let Some(v) = node.table.get(&OperationId::UPDATE)
        {
            return Some(v);
        }
        node.table.get(&OperationId::WILDCARD).map(Vec::as_slice)
    }

    fn scan_entries(
        &self,
        entries: &[RegisteredRule],
        target_kind: TargetKind,
        target_hint: &MatchHint,
        candidate: &mut Option<(RuleId, bool)>,
        ambiguous_with: &mut Option<RuleId>,
        fallback: &mut Option<RuleId>,
    ) {
        for entry in entries {
            if !target_kind.is_a(entry.target_kind) {
                continue;
            }
            if entry.hint == *target_hint {
                match candidate {
                    None => *candidate = Some((entry.id, false)),
                    Some((first, _)) if *first != entry.id => *ambiguous_with = Some(entry.id),
                    _ => {}
                }
            } else if fallback.is_none() {
                // A wildcard-operation entry (reached via the `WILDCARD`
                // fallback path above) acts as a fallback carrier only;
                // its own hint is not compared (§4.3 step 4).
                *fallback = Some(entry.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MetaOperationId;
    use crate::graph::{MatchExtra, Recipe, RecipeKind};

    struct DummyRule;
    impl Rule for DummyRule {
        fn matches(&self, _: Action, _: &TargetGraph, _: TargetId, _: MatchHint, _: &MatchExtra) -> bool {
            true
        }
        fn apply(&self, _: Action, _: &mut TargetGraph, _: TargetId, _: &MatchExtra) -> Result<Recipe> {
            Ok(Recipe {
                kind: RecipeKind::Noop,
                rule: RuleId(0),
                match_data: None,
            })
        }
    }

    #[test]
    fn selects_single_registered_rule() {
        let mut reg = RuleRegistry::new();
        let rid = reg.insert("cxx.compile", Arc::new(DummyRule));
        let scope = reg.global_scope();
        reg.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, rid);

        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        let selected = reg
            .select_by_type(action, TargetKind::Object, &MatchHint::NONE, scope)
            .unwrap()
            .unwrap();
        assert_eq!(selected.rule, rid);
        assert!(!selected.via_fallback);
    }

    #[test]
    fn ambiguous_same_priority_rules_is_an_error() {
        let mut reg = RuleRegistry::new();
        let a = reg.insert("a", Arc::new(DummyRule));
        let b = reg.insert("b", Arc::new(DummyRule));
        let scope = reg.global_scope();
        reg.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, a);
        reg.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, b);

        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        let err = reg
            .select_by_type(action, TargetKind::Object, &MatchHint::NONE, scope)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousRule);
    }

    #[test]
    fn nested_scope_falls_back_to_parent() {
        let mut reg = RuleRegistry::new();
        let rid = reg.insert("cxx.compile", Arc::new(DummyRule));
        let global = reg.global_scope();
        reg.register(global, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, rid);
        let child = reg.new_scope(global);

        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        let selected = reg
            .select_by_type(action, TargetKind::Object, &MatchHint::NONE, child)
            .unwrap()
            .unwrap();
        assert_eq!(selected.rule, rid);
    }

    #[test]
    fn configure_inherits_perform_rules() {
        let mut reg = RuleRegistry::new();
        let rid = reg.insert("cxx.compile", Arc::new(DummyRule));
        let scope = reg.global_scope();
        reg.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, rid);

        let action = Action::simple(MetaOperationId::CONFIGURE, OperationId::UPDATE);
        let selected = reg
            .select_by_type(action, TargetKind::Object, &MatchHint::NONE, scope)
            .unwrap()
            .unwrap();
        assert_eq!(selected.rule, rid);
    }
}
