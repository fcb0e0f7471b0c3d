//! The target itself: identity, on-disk state, prerequisites, and group
//! membership (§3).

use std::path::PathBuf;
use std::time::SystemTime;

use crate::graph::kind::TargetKind;
use crate::graph::opstate::Opstate;
use crate::util::arena::{Arena, ArenaIndex};
use crate::util::det_hash::DetHashMap;

/// A stable handle to a [`Target`] in a [`TargetGraph`].
///
/// Targets are interned once and never move (§3 Lifecycle); `TargetId` is
/// the index handle referenced in place of a raw pointer (§9).
pub type TargetId = ArenaIndex<Target>;

/// The identity key `(type, dir, out, name, ext?)` a target is interned
/// under (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    /// The target's kind.
    pub kind: TargetKind,
    /// The target's conceptual source/"in" directory scope.
    pub dir: PathBuf,
    /// The target's output directory, if out-of-source.
    pub out: PathBuf,
    /// The target's base name.
    pub name: String,
    /// The target's extension, if the type carries one.
    pub ext: Option<String>,
}

/// How a prerequisite entry relates to the matching `apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrereqRole {
    /// An ordinary prerequisite, matched and (usually) executed.
    Ordinary,
    /// A library prerequisite matched only (`unmatch::safe`) so as not to
    /// block on its execute (§4.6 step 3).
    MatchOnly,
    /// An ad hoc prerequisite injected by the rule itself (e.g. the
    /// `fsdir{}` for a compile target's output directory, §4.6 step 2).
    AdHoc,
}

/// One entry in a target's prerequisite multiset.
#[derive(Debug, Clone)]
pub struct Prerequisite {
    /// The literal target named by the buildfile (or rule) — may differ
    /// from the resolved target once rule chaining synthesizes an
    /// intermediate (§3 invariant).
    pub literal: TargetId,
    /// The role this prerequisite plays for the owning rule.
    pub role: PrereqRole,
}

/// A build target.
pub struct Target {
    /// The identity key.
    pub key: TargetKey,
    /// The on-disk path, if this target corresponds to a concrete file.
    pub path: Option<PathBuf>,
    /// The last observed on-disk modification time.
    pub mtime: Option<SystemTime>,
    /// Unordered multiset of prerequisites (buildfile/rule-declared).
    pub prerequisites: Vec<Prerequisite>,
    /// Ordered ad hoc group members, if this target is an ad hoc group.
    pub adhoc_members: Vec<TargetId>,
    /// The enclosing explicit group, if any. Immutable for the operation
    /// once set (§3 invariant).
    pub group: Option<TargetId>,
    /// Ad hoc rules attached directly to this target (not looked up via
    /// the type-keyed rule map), tried in order before the rule registry's
    /// scope walk (§4.3 steps 1-3).
    pub adhoc_rules: Vec<crate::rules::RuleId>,
    /// The rule-selection hint this target carries (§4.3 step 4).
    pub hint: crate::rules::MatchHint,
    /// This target's module classification, set by the compile rule once
    /// the TU parser runs (§4.6 step 6, §4.6.2). Consulted by sibling
    /// compiles resolving `import` names against this target as a
    /// candidate BMI (§4.6.2 step 2).
    pub module_info: Option<crate::rules::cc::ModuleInfo>,
    /// Per-action operation state, reset at the start of each action.
    pub opstate: Opstate,
}

impl Target {
    /// Creates a new target for `key`, with empty prerequisites and a
    /// fresh `opstate`.
    #[must_use]
    pub fn new(key: TargetKey) -> Self {
        Self {
            key,
            path: None,
            mtime: None,
            prerequisites: Vec::new(),
            adhoc_members: Vec::new(),
            group: None,
            adhoc_rules: Vec::new(),
            hint: crate::rules::MatchHint::NONE,
            module_info: None,
            opstate: Opstate::new(),
        }
    }

    /// Resets this target's `opstate` to a fresh value, as on entering a
    /// new action.
    pub fn reset_for_action(&mut self) {
        self.opstate = Opstate::new();
    }
}

/// The process-wide target map: a concurrent, insert-only arena keyed by
/// target identity (§3 Lifecycle, §5).
///
/// Lookup by key is a hash-map probe; insertion allocates a fresh arena
/// slot. In this single-process, cooperative-scheduling implementation
/// the whole map is guarded by the caller (the scheduler serializes load,
/// and match/execute only ever add targets, never remove them), so no
/// additional internal locking is needed beyond what [`Opstate`] already
/// provides per target.
#[derive(Default)]
pub struct TargetGraph {
    arena: Arena<Target>,
    index: DetHashMap<TargetKey, TargetId>,
}

impl TargetGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a target for `key`, returning its existing id if already
    /// present, or inserting a fresh one.
    pub fn intern(&mut self, key: TargetKey) -> TargetId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.arena.insert(Target::new(key.clone()));
        self.index.insert(key, id);
        id
    }

    /// Looks up an already-interned target by key, without inserting.
    #[must_use]
    pub fn lookup(&self, key: &TargetKey) -> Option<TargetId> {
        self.index.get(key).copied()
    }

    /// Returns a reference to a target.
    #[must_use]
    pub fn get(&self, id: TargetId) -> &Target {
        self.arena
            .get(id)
            .expect("TargetId must refer to a live entry in this graph")
    }

    /// Returns a mutable reference to a target.
    pub fn get_mut(&mut self, id: TargetId) -> &mut Target {
        self.arena
            .get_mut(id)
            .expect("TargetId must refer to a live entry in this graph")
    }

    /// Resets every target's `opstate`, as on entering a new action.
    pub fn reset_all_for_action(&mut self) {
        for (_, target) in self.arena.iter_mut() {
            target.reset_for_action();
        }
    }

    /// Iterates all interned targets.
    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &Target)> {
        self.arena.iter()
    }

    /// Number of interned targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns `true` if no targets have been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> TargetKey {
        TargetKey {
            kind: TargetKind::File,
            dir: PathBuf::from("/src"),
            out: PathBuf::from("/out"),
            name: name.to_string(),
            ext: None,
        }
    }

    #[test]
    fn interning_is_idempotent() {
        let mut g = TargetGraph::new();
        let a = g.intern(key("foo"));
        let b = g.intern(key("foo"));
        assert_eq!(a, b);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_ids() {
        let mut g = TargetGraph::new();
        let a = g.intern(key("foo"));
        let b = g.intern(key("bar"));
        assert_ne!(a, b);
    }
}
