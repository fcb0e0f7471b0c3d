//! Ties the scheduler, target graph, and rule registry into the
//! match/apply/execute state machines (§4.4, §4.5) and the meta-operation
//! post-hoc pass (§4.4 final paragraph).
//!
//! [`Driver::run`] drives one action over a set of root targets through
//! three phases: `load` (a formality here — the graph is already built by
//! the caller, e.g. [`crate::testkit::graph::GraphBuilder`] or
//! [`crate::cli`]), `match`, and `execute`. Recursive prerequisite matching
//! inside `match` is a plain synchronous call stack rather than further
//! scheduler submissions: only the root targets fan out across worker
//! threads, while a single worker walks its own root's subtree
//! depth-first. This keeps [`crate::sched::Scheduler::drain`] — which waits
//! for a global pending count to reach zero — free of the reentrant-drain
//! deadlock a worker blocked inside its own `drain()` call would invite.
//! Cross-root sharing (two roots reaching the same prerequisite) still
//! resolves correctly and without busy-waiting: a second worker reaching an
//! already-busy target blocks on [`crate::sched::LockRegistry`] exactly as
//! it would for any other contested lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::{Action, OperationId};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{Opstate, Prerequisite, PrereqRole, RecipeOutcome, SharedGraph, TargetId, TargetKind};
use crate::observability::Metrics;
use crate::rules::{MatchHint, RuleId, RuleRegistry, ScopeId};
use crate::sched::{LockOutcome, Phase, Scheduler, SchedulerConfig};
use crate::sched::task::{self, TaskId};
use crate::types::{MatchOptions, Offset};
use crate::util::det_hash::DetHashMap;

/// Drives one or more actions over a [`SharedGraph`].
pub struct Driver {
    graph: SharedGraph,
    registry: Arc<RuleRegistry>,
    scheduler: Arc<Scheduler>,
    /// Process-wide counters (§2d), exposed for a caller that wants an
    /// end-of-run summary.
    pub metrics: Arc<Metrics>,
    base_scope: ScopeId,
    keep_going: bool,
    dependents_pending: Mutex<DetHashMap<TargetId, usize>>,
}

impl Driver {
    /// Builds a driver over `graph`, with rules looked up from `registry`
    /// starting at `registry`'s global scope, and a worker pool sized per
    /// `config`.
    #[must_use]
    pub fn new(graph: SharedGraph, registry: Arc<RuleRegistry>, config: &Config) -> Arc<Self> {
        let base_scope = registry.global_scope();
        let scheduler = Scheduler::new(SchedulerConfig {
            jobs: config.jobs,
            keep_going: config.keep_going,
        });
        Arc::new(Self {
            graph,
            registry,
            scheduler,
            metrics: Arc::new(Metrics::new()),
            base_scope,
            keep_going: config.keep_going,
            dependents_pending: Mutex::new(DetHashMap::default()),
        })
    }

    /// Runs `action` to completion over `roots`: resets per-action state,
    /// matches every reachable target, runs the post-hoc pass, then
    /// executes (§4.1 `load -> match -> execute`).
    pub fn run(self: &Arc<Self>, action: Action, roots: &[TargetId]) -> Result<()> {
        {
            let _guard = self.scheduler.phase.enter(Phase::Load);
            self.graph.write().reset_all_for_action();
        }
        self.dependents_pending.lock().clear();

        self.match_all(action, roots)?;
        self.run_posthoc_pass(action)?;
        self.execute_all(action, roots)
    }

    /// Matches every target reachable from `roots`, one scheduler task per
    /// root, then drains.
    pub fn match_all(self: &Arc<Self>, action: Action, roots: &[TargetId]) -> Result<()> {
        let _guard = self.scheduler.phase.enter(Phase::Match);
        for &root in roots {
            if self.scheduler.should_abort() {
                tracing::debug!("match: aborting further root submission after failure");
                break;
            }
            let this = Arc::clone(self);
            self.scheduler.submit(move || {
                if let Err(e) = this.match_target(action, root) {
                    tracing::warn!(target_id = ?root, error = %e, "match failed");
                    this.scheduler.report_failure(e);
                }
            });
        }
        self.scheduler.drain()
    }

    /// Matches a single target and everything it recursively depends on
    /// (§4.4), with no `new_options` request — the ordinary forward-build
    /// path. Safe to call from within another target's own match (direct
    /// recursion, not a scheduler resubmission).
    pub fn match_target(&self, action: Action, target: TargetId) -> Result<()> {
        task::push_diag_frame(format!("match {target:?}"));
        let result = self.match_target_with_options(action, target, MatchOptions::NONE);
        task::pop_diag_frame();
        result
    }

    /// Matches `target`, requesting `new_options` be folded in if it is
    /// already matched/applied/executed (§4.2, §4.4).
    pub fn match_target_with_options(&self, action: Action, target: TargetId, new_options: MatchOptions) -> Result<()> {
        loop {
            let offset = self.read_offset(target);
            match offset {
                Offset::Failed => {
                    return Err(Error::new(ErrorKind::NoMatchingRule, "target already failed this action").with_target(target));
                }
                Offset::Executed => {
                    if self.wants_rematch(target, new_options) {
                        return Err(Error::new(ErrorKind::OptionsAfterExecute, "match requested new options on an already-executed target").with_target(target));
                    }
                    return Ok(());
                }
                Offset::Applied => {
                    if !self.wants_rematch(target, new_options) {
                        return Ok(());
                    }
                    match self.acquire(target, Offset::Applied)? {
                        LockOutcome::AlreadyAt(_) => continue,
                        LockOutcome::Acquired => {
                            self.guarded(target, Offset::Applied, |this| this.reapply_locked(action, target, new_options))?;
                            continue;
                        }
                    }
                }
                Offset::Matched => match self.acquire(target, Offset::Matched)? {
                    LockOutcome::AlreadyAt(_) => continue,
                    LockOutcome::Acquired => {
                        self.guarded(target, Offset::Applied, |this| this.apply_locked(action, target, new_options))?;
                        continue;
                    }
                },
                Offset::Tried | Offset::Touched => match self.acquire(target, offset)? {
                    LockOutcome::AlreadyAt(_) => continue,
                    LockOutcome::Acquired => {
                        self.guarded(target, Offset::Matched, |this| this.select_rule_locked(action, target))?;
                        continue;
                    }
                },
                Offset::Busy => {
                    self.wait_for_release(target)?;
                    continue;
                }
            }
        }
    }

    /// Recursively matches every `posthoc_prerequisites` entry collected by
    /// `apply` across the whole graph, then folds each into its owner's
    /// ordinary prerequisite list so `execute` walks it too (§4.4: "Post-hoc
    /// prerequisites are collected after apply but matched later, in a
    /// separate pass... to avoid cycles with self-referential groups").
    fn run_posthoc_pass(&self, action: Action) -> Result<()> {
        let _guard = self.scheduler.phase.enter(Phase::Match);
        let pending: Vec<(TargetId, Vec<TargetId>)> = {
            let graph = self.graph.read();
            graph
                .iter()
                .filter(|(_, t)| !t.opstate.posthoc_prerequisites.is_empty())
                .map(|(id, t)| (id, t.opstate.posthoc_prerequisites.clone()))
                .collect()
        };
        for (owner, posthocs) in pending {
            for &p in &posthocs {
                self.match_target(action, p)?;
            }
            let mut graph = self.graph.write();
            let owner_target = graph.get_mut(owner);
            for p in posthocs {
                if !owner_target.prerequisites.iter().any(|pr| pr.literal == p) {
                    owner_target.prerequisites.push(Prerequisite { literal: p, role: PrereqRole::Ordinary });
                }
            }
        }
        Ok(())
    }

    /// Executes every target reachable from `roots`, one scheduler task per
    /// root, then drains (§4.5).
    pub fn execute_all(self: &Arc<Self>, action: Action, roots: &[TargetId]) -> Result<()> {
        let _guard = self.scheduler.phase.enter(Phase::Execute);
        if action.inner == OperationId::CLEAN {
            self.prepare_dependents_counters(roots);
        }
        for &root in roots {
            if self.scheduler.should_abort() {
                tracing::debug!("execute: aborting further root submission after failure");
                break;
            }
            let this = Arc::clone(self);
            self.scheduler.submit(move || {
                if let Err(e) = this.execute_target(action, root) {
                    tracing::warn!(target_id = ?root, error = %e, "execute failed");
                    this.scheduler.report_failure(e);
                }
            });
        }
        self.scheduler.drain()
    }

    /// Executes `target` and (recursively, synchronously) every ordinary
    /// prerequisite it still needs, returning the outcome its own recipe
    /// reported (§4.5).
    pub fn execute_target(&self, action: Action, target: TargetId) -> Result<RecipeOutcome> {
        task::push_diag_frame(format!("execute {target:?}"));
        let result = self.execute_target_inner(action, target);
        task::pop_diag_frame();
        result
    }

    fn execute_target_inner(&self, action: Action, target: TargetId) -> Result<RecipeOutcome> {
        loop {
            let offset = self.read_offset(target);
            match offset {
                Offset::Failed => {
                    if self.keep_going {
                        return Ok(RecipeOutcome::Failed);
                    }
                    return Err(Error::new(ErrorKind::NoMatchingRule, "dependency already failed this action").with_target(target));
                }
                Offset::Executed => {
                    let outcome = { self.graph.read().get(target).opstate.last_outcome }.unwrap_or(RecipeOutcome::Unchanged);
                    return Ok(outcome);
                }
                Offset::Applied => match self.acquire(target, Offset::Applied)? {
                    LockOutcome::AlreadyAt(_) => continue,
                    LockOutcome::Acquired => {
                        let outcome = self.guarded(target, Offset::Executed, |this| this.execute_prereqs_then_recipe(action, target))?;
                        return Ok(outcome);
                    }
                },
                Offset::Matched | Offset::Tried | Offset::Touched => {
                    // Reachable only for a target added by the post-hoc
                    // pass after the matching driver already walked past
                    // it, or one a rule's recipe reaches directly without
                    // it ever having been listed as a root. Match it lazily
                    // before continuing the execute walk.
                    self.match_target(action, target)?;
                    continue;
                }
                Offset::Busy => {
                    self.wait_for_release(target)?;
                    continue;
                }
            }
        }
    }

    fn execute_prereqs_then_recipe(&self, action: Action, target: TargetId) -> Result<RecipeOutcome> {
        let prereq_ids: Vec<TargetId> = {
            self.graph
                .read()
                .get(target)
                .prerequisites
                .iter()
                .map(|p| p.literal)
                .collect()
        };
        for p in prereq_ids {
            let outcome = self.execute_target(action, p)?;
            if outcome == RecipeOutcome::Failed && !self.keep_going {
                return Err(Error::new(ErrorKind::NoMatchingRule, "prerequisite recipe failed").with_target(p));
            }
        }
        self.run_recipe(action, target)
    }

    fn run_recipe(&self, action: Action, target: TargetId) -> Result<RecipeOutcome> {
        if action.inner == OperationId::CLEAN && self.defer_for_dependents(target) {
            return Ok(RecipeOutcome::Unchanged);
        }
        let outcome = {
            let graph = self.graph.read();
            let t = graph.get(target);
            match t.opstate.rule {
                None => RecipeOutcome::Unchanged,
                Some(rule_id) => {
                    let rule = self.registry.get(rule_id);
                    let recipe = t
                        .opstate
                        .recipe
                        .as_ref()
                        .ok_or_else(|| Error::new(ErrorKind::NoMatchingRule, "matched target has no recipe").with_target(target))?;
                    rule.perform(action, &graph, target, recipe)?
                }
            }
        };
        let folded = match outcome {
            RecipeOutcome::Postponed => RecipeOutcome::Unchanged,
            RecipeOutcome::Group => {
                let group = self.graph.read().get(target).group;
                match group {
                    Some(g) => self.execute_target(action, g)?,
                    None => RecipeOutcome::Unchanged,
                }
            }
            other => other,
        };
        self.graph.write().get_mut(target).opstate.last_outcome = Some(folded);
        Ok(folded)
    }

    // --- rule selection (§4.3) ---

    fn select_rule_locked(&self, action: Action, target: TargetId) -> Result<()> {
        let selected = {
            let graph = self.graph.read();
            self.select_rule_for(action, &graph, target)?
        };
        self.graph.write().get_mut(target).opstate.rule = Some(selected);
        Ok(())
    }

    /// Selects a rule for `target`, in priority order (§4.3 steps 1-6):
    /// inherit an ad hoc group's already-matched rule; try the target's own
    /// ad hoc rules; fall back to the type-keyed scope walk; finally an ad
    /// hoc rule that declared itself a `reverse_fallback` carrier.
    fn select_rule_for(&self, action: Action, graph: &crate::graph::TargetGraph, target: TargetId) -> Result<RuleId> {
        let t = graph.get(target);

        if let Some(group) = t.group {
            let group_t = graph.get(group);
            let see_through = t.key.kind.flags().see_through || group_t.key.kind.flags().dyn_members;
            if see_through && group_t.opstate.offset() >= Offset::Matched {
                if let Some(rid) = group_t.opstate.rule {
                    return Ok(rid);
                }
            }
        }

        let mut fallback: Option<RuleId> = None;
        for &rid in &t.adhoc_rules {
            let rule = self.registry.get(rid);
            if rule.matches(action, graph, target, t.hint.clone(), &t.opstate.match_extra) {
                return Ok(rid);
            }
            if fallback.is_none() && rule.reverse_fallback(action, target) {
                fallback = Some(rid);
            }
        }

        if let Some(selected) = self.registry.select_by_type(action, t.key.kind, &t.hint, self.base_scope)? {
            return Ok(selected.rule);
        }

        if let Some(rid) = fallback {
            return Ok(rid);
        }

        Err(Error::new(ErrorKind::NoMatchingRule, format!("no rule matches target '{}' under {action}", t.key.name)).with_target(target))
    }

    fn apply_locked(&self, action: Action, target: TargetId, new_options: MatchOptions) -> Result<()> {
        let prereq_ids: Vec<TargetId> = {
            self.graph
                .read()
                .get(target)
                .prerequisites
                .iter()
                .map(|p| p.literal)
                .collect()
        };
        for p in prereq_ids {
            self.match_target(action, p)?;
        }

        let rule_id = { self.graph.read().get(target).opstate.rule }
            .ok_or_else(|| Error::new(ErrorKind::NoMatchingRule, "apply called before rule selection").with_target(target))?;
        let match_extra = self.graph.read().get(target).opstate.match_extra;

        let recipe = {
            let mut graph = self.graph.write();
            let rule = self.registry.get(rule_id);
            rule.apply(action, &mut graph, target, &match_extra)?
        };
        let posthoc = {
            let graph = self.graph.read();
            let rule = self.registry.get(rule_id);
            rule.apply_posthoc(action, &graph, target)?
        };

        let mut graph = self.graph.write();
        let t = graph.get_mut(target);
        t.opstate.recipe = Some(recipe);
        t.opstate.posthoc_prerequisites = posthoc;
        t.opstate.match_extra.new_options = new_options;
        t.opstate.match_extra.commit();
        self.metrics.record_target_matched();
        Ok(())
    }

    fn reapply_locked(&self, action: Action, target: TargetId, new_options: MatchOptions) -> Result<()> {
        let rule_id = { self.graph.read().get(target).opstate.rule }
            .ok_or_else(|| Error::new(ErrorKind::NoMatchingRule, "reapply called before rule selection").with_target(target))?;
        let mut match_extra = self.graph.read().get(target).opstate.match_extra;
        match_extra.new_options = new_options;

        let recipe = {
            let mut graph = self.graph.write();
            let rule = self.registry.get(rule_id);
            if !rule.supports_reapply() {
                return Err(Error::new(ErrorKind::OptionsAfterExecute, "rule does not support reapply with new options").with_target(target));
            }
            rule.reapply(action, &mut graph, target, &match_extra)?
        };

        let mut graph = self.graph.write();
        let t = graph.get_mut(target);
        t.opstate.recipe = Some(recipe);
        t.opstate.match_extra.new_options = new_options;
        t.opstate.match_extra.commit();
        Ok(())
    }

    // --- last-execution-mode holdback for `clean` (§4.5) ---

    /// Pre-computes, for every target reachable from `roots`, how many
    /// in-graph dependents (targets that list it as a prerequisite) it has,
    /// so a directory-ish target's removal can be held back until its last
    /// dependent has executed. A simplified stand-in for a fully general
    /// per-rule "last" execution flag: the fsdir rule is the only consumer,
    /// and the filesystem itself already refuses to remove a non-empty
    /// directory, so this counter only avoids attempting that removal
    /// before it has any chance of succeeding.
    fn prepare_dependents_counters(&self, roots: &[TargetId]) {
        let graph = self.graph.read();
        let mut counts: DetHashMap<TargetId, usize> = DetHashMap::default();
        let mut seen = std::collections::HashSet::new();
        let mut stack: Vec<TargetId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let t = graph.get(id);
            for p in &t.prerequisites {
                *counts.entry(p.literal).or_insert(0) += 1;
                stack.push(p.literal);
            }
        }
        *self.dependents_pending.lock() = counts;
    }

    /// Returns `true` if `target` is a directory marker with remaining
    /// dependents: its recipe should not run yet.
    fn defer_for_dependents(&self, target: TargetId) -> bool {
        let is_dir = self.graph.read().get(target).key.kind == TargetKind::Dir;
        if !is_dir {
            return false;
        }
        let mut pending = self.dependents_pending.lock();
        match pending.get_mut(&target) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count > 0
            }
            _ => false,
        }
    }

    // --- shared lock/wait plumbing ---

    fn read_offset(&self, target: TargetId) -> Offset {
        self.graph.read().get(target).opstate.offset()
    }

    fn wants_rematch(&self, target: TargetId, new_options: MatchOptions) -> bool {
        if new_options.is_empty() {
            return false;
        }
        let graph = self.graph.read();
        graph.get(target).opstate.match_extra.cur_options.requests_new(new_options)
    }

    fn acquire(&self, target: TargetId, from: Offset) -> Result<LockOutcome> {
        let task = current_task();
        let lock_chain = task::current_context().lock_chain;
        task::push_lock(target);
        let graph = self.graph.read();
        let outcome = self.scheduler.locks.acquire(&graph.get(target).opstate, target, from, task, &lock_chain);
        if !matches!(outcome, Ok(LockOutcome::Acquired)) {
            task::pop_lock();
        }
        outcome
    }

    fn wait_for_release(&self, target: TargetId) -> Result<Offset> {
        let task = current_task();
        let lock_chain = task::current_context().lock_chain;
        let graph = self.graph.read();
        self.scheduler.locks.wait_for_release(&graph.get(target).opstate, target, task, &lock_chain)
    }

    /// Runs `body` while `target`'s lock is held (already CASed to `Busy`
    /// by the caller), releasing it to `to` on success or to `Failed` — with
    /// `cur_options` forced open — on error (§4.4: "On exception, the
    /// target's state becomes failed and cur_options is forced to all
    /// ones").
    fn guarded<T>(&self, target: TargetId, to: Offset, body: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let result = body(self);
        match &result {
            Ok(_) => {
                self.read_opstate_unlock(target, to);
            }
            Err(_) => {
                self.graph.write().get_mut(target).opstate.match_extra.cur_options = MatchOptions::ALL;
                self.read_opstate_unlock(target, Offset::Failed);
            }
        }
        self.scheduler.locks.release(target);
        task::pop_lock();
        result
    }

    fn read_opstate_unlock(&self, target: TargetId, to: Offset) {
        self.graph.read().get(target).opstate.unlock_to(to);
    }
}

fn current_task() -> TaskId {
    task::current_context().task.unwrap_or_else(TaskId::next)
}

// Only reachable via `Driver::acquire`/`wait_for_release` above, kept
// private so callers never touch `Opstate` directly.
#[allow(dead_code)]
fn _assert_opstate_is_used(_: &Opstate) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MetaOperationId;
    use crate::graph::{MatchExtra, Recipe, RecipeKind, TargetGraph, TargetKey};
    use crate::rules::Rule;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(kind: TargetKind, name: &str) -> TargetKey {
        TargetKey {
            kind,
            dir: "/src".into(),
            out: "/out".into(),
            name: name.to_string(),
            ext: None,
        }
    }

    struct NoopRule {
        runs: AtomicUsize,
    }

    impl Rule for NoopRule {
        fn matches(&self, _: Action, _: &crate::graph::TargetGraph, _: TargetId, _: MatchHint, _: &MatchExtra) -> bool {
            true
        }

        fn apply(&self, _: Action, _: &mut crate::graph::TargetGraph, _: TargetId, _: &MatchExtra) -> Result<Recipe> {
            Ok(Recipe {
                kind: RecipeKind::PerformUpdate,
                rule: RuleId::default(),
                match_data: None,
            })
        }

        fn perform(&self, _: Action, _: &crate::graph::TargetGraph, _: TargetId, _: &Recipe) -> Result<RecipeOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RecipeOutcome::Changed)
        }
    }

    fn build_driver(rule: Arc<NoopRule>) -> (Arc<Driver>, TargetId) {
        let mut registry = RuleRegistry::new();
        let scope = registry.global_scope();
        let rid = registry.insert("test.noop", rule);
        registry.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, rid);

        let mut graph = TargetGraph::new();
        let obj = graph.intern(key(TargetKind::Object, "a.o"));
        let graph: SharedGraph = Arc::new(RwLock::new(graph));

        let config = Config {
            jobs: 2,
            ..Config::default()
        };
        let driver = Driver::new(graph, Arc::new(registry), &config);
        (driver, obj)
    }

    #[test]
    fn cold_build_matches_and_executes_a_single_target() {
        let rule = Arc::new(NoopRule { runs: AtomicUsize::new(0) });
        let (driver, obj) = build_driver(Arc::clone(&rule));
        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);

        driver.run(action, &[obj]).unwrap();
        assert_eq!(rule.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_run_in_the_same_process_rematches_from_a_fresh_opstate() {
        let rule = Arc::new(NoopRule { runs: AtomicUsize::new(0) });
        let (driver, obj) = build_driver(Arc::clone(&rule));
        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);

        driver.run(action, &[obj]).unwrap();
        driver.run(action, &[obj]).unwrap();
        assert_eq!(rule.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unmatchable_target_surfaces_no_matching_rule() {
        let registry = RuleRegistry::new();
        let mut graph = TargetGraph::new();
        let obj = graph.intern(key(TargetKind::Object, "a.o"));
        let graph: SharedGraph = Arc::new(RwLock::new(graph));
        let driver = Driver::new(graph, Arc::new(registry), &Config::default());

        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        let err = driver.run(action, &[obj]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingRule);
    }

    #[test]
    fn self_dependent_target_is_reported_as_a_cycle() {
        let mut registry = RuleRegistry::new();
        let scope = registry.global_scope();
        let rule = Arc::new(NoopRule { runs: AtomicUsize::new(0) });
        let rid = registry.insert("test.noop", rule);
        registry.register(scope, OperationId::UPDATE, TargetKind::Object, MatchHint::NONE, rid);

        let mut graph = TargetGraph::new();
        let obj = graph.intern(key(TargetKind::Object, "a.o"));
        graph.get_mut(obj).prerequisites.push(Prerequisite { literal: obj, role: PrereqRole::Ordinary });
        let graph: SharedGraph = Arc::new(RwLock::new(graph));

        let driver = Driver::new(graph, Arc::new(registry), &Config { jobs: 1, ..Config::default() });
        let action = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        let err = driver.run(action, &[obj]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
    }
}
