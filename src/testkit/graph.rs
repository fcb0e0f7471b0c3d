//! `testkit::graph::GraphBuilder` (NEW §2e): constructs target graphs
//! in-memory for scheduler, cycle-detection, and rule-selection tests,
//! without a buildfile front end.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::{PrereqRole, Prerequisite, SharedGraph, TargetGraph, TargetId, TargetKey, TargetKind};

/// Builds a [`TargetGraph`] by name, independent of any on-disk src/out
/// layout: every target gets the same placeholder `dir`/`out` unless
/// overridden, which is enough for tests that exercise rule selection,
/// the phase/lock machinery, or cycle detection and don't care about
/// real paths.
pub struct GraphBuilder {
    graph: TargetGraph,
    dir: PathBuf,
    out: PathBuf,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates a builder with placeholder `/src`/`/out` directories.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: TargetGraph::new(),
            dir: PathBuf::from("/src"),
            out: PathBuf::from("/out"),
        }
    }

    /// Overrides the placeholder directories new targets are interned
    /// under.
    #[must_use]
    pub fn with_dirs(mut self, dir: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self.out = out.into();
        self
    }

    /// Interns (or returns the existing id for) a target named `name` of
    /// `kind`.
    pub fn target(&mut self, kind: TargetKind, name: &str) -> TargetId {
        self.graph.intern(TargetKey {
            kind,
            dir: self.dir.clone(),
            out: self.out.clone(),
            name: name.to_string(),
            ext: None,
        })
    }

    /// Adds an ordinary prerequisite edge `from -> to` (`from` depends on
    /// `to`).
    pub fn depends_on(&mut self, from: TargetId, to: TargetId) -> &mut Self {
        self.graph.get_mut(from).prerequisites.push(Prerequisite {
            literal: to,
            role: PrereqRole::Ordinary,
        });
        self
    }

    /// Adds a match-only (`unmatch::safe`) prerequisite edge, as a
    /// compile target records a library prerequisite (§4.6 step 3).
    pub fn depends_on_match_only(&mut self, from: TargetId, to: TargetId) -> &mut Self {
        self.graph.get_mut(from).prerequisites.push(Prerequisite {
            literal: to,
            role: PrereqRole::MatchOnly,
        });
        self
    }

    /// Declares `member` as belonging to `group`'s ad hoc member list,
    /// setting `member.group` (§3 invariant: immutable once set).
    pub fn add_to_group(&mut self, group: TargetId, member: TargetId) -> &mut Self {
        self.graph.get_mut(group).adhoc_members.push(member);
        self.graph.get_mut(member).group = Some(group);
        self
    }

    /// Finishes building, handing back the graph wrapped for sharing
    /// across worker threads the way [`crate::driver::Driver`] expects.
    #[must_use]
    pub fn build(self) -> SharedGraph {
        Arc::new(RwLock::new(self.graph))
    }

    /// Finishes building without the `Arc<RwLock<_>>` wrapper, for tests
    /// that only need single-threaded, direct access.
    #[must_use]
    pub fn into_graph(self) -> TargetGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_names_get_distinct_targets() {
        let mut b = GraphBuilder::new();
        let a = b.target(TargetKind::Object, "a.o");
        let c = b.target(TargetKind::Object, "b.o");
        assert_ne!(a, c);
    }

    #[test]
    fn depends_on_records_an_ordinary_prerequisite() {
        let mut b = GraphBuilder::new();
        let exe = b.target(TargetKind::Exe, "app");
        let obj = b.target(TargetKind::Object, "main.o");
        b.depends_on(exe, obj);
        let graph = b.into_graph();
        assert_eq!(graph.get(exe).prerequisites.len(), 1);
        assert_eq!(graph.get(exe).prerequisites[0].literal, obj);
    }

    #[test]
    fn group_membership_sets_the_member_s_group_pointer() {
        let mut b = GraphBuilder::new();
        let group = b.target(TargetKind::Group, "g");
        let member = b.target(TargetKind::AdhocMember, "m");
        b.add_to_group(group, member);
        let graph = b.into_graph();
        assert_eq!(graph.get(member).group, Some(group));
        assert_eq!(graph.get(group).adhoc_members, vec![member]);
    }

    #[test]
    fn a_two_target_cycle_is_representable() {
        let mut b = GraphBuilder::new();
        let a = b.target(TargetKind::StaticLib, "liba");
        let c = b.target(TargetKind::StaticLib, "libb");
        b.depends_on(a, c);
        b.depends_on(c, a);
        let graph = b.build();
        let g = graph.read();
        assert_eq!(g.get(a).prerequisites[0].literal, c);
        assert_eq!(g.get(c).prerequisites[0].literal, a);
    }
}
