//! Thin CLI front end (NEW §2a), gated behind the `cli` feature.
//!
//! Buildfile tokenization/evaluation and CLI option parsing *for a
//! buildfile language* are collaborators (§1 Non-goals); what lives here
//! is only enough `clap`-derived argument parsing to drive one
//! [`Action`] over a handful of root targets named directly on the
//! command line, with dependency edges declared inline
//! (`name:dep1,dep2`). It exists to exercise the driver's contract
//! end-to-end in integration tests and as a minimal demonstration
//! binary, not as a real build-system front end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::action::{Action, MetaOperationId, OperationId};
use crate::config::Config;
use crate::driver::Driver;
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{MatchExtra, Recipe, RecipeKind, RecipeOutcome, TargetGraph, TargetId, TargetKind};
use crate::observability::metrics::MetricsSnapshot;
use crate::rules::{MatchHint, Rule, RuleRegistry};
use crate::testkit::graph::GraphBuilder;

/// The operation the CLI drives (§3 "Action"; only the two operations a
/// demonstration front end needs are exposed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliOperation {
    /// The `update` operation: bring every root target up to date.
    Update,
    /// The `clean` operation.
    Clean,
}

/// `forgec`'s command-line surface.
#[derive(Debug, Parser)]
#[command(name = "forgec", about = "Parallel match/apply/execute build scheduler demonstration driver")]
pub struct Cli {
    /// Root targets to build, as `name` or `name:dep1,dep2` (dependency
    /// names are declared the first time they're mentioned anywhere on
    /// the command line and otherwise just referenced).
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Which operation to run.
    #[arg(long, value_enum, default_value = "update")]
    pub operation: CliOperation,

    /// Worker thread count, overriding `FORGEC_JOBS` / `forgec.toml`.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Continue independent subtrees after a failure (§5, §7).
    #[arg(long)]
    pub keep_going: bool,

    /// Path to an optional `forgec.toml` configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Parses one `name` or `name:dep1,dep2` command-line target spec.
fn parse_spec(spec: &str) -> (&str, Vec<&str>) {
    match spec.split_once(':') {
        Some((name, deps)) => (name, deps.split(',').filter(|d| !d.is_empty()).collect()),
        None => (spec, Vec::new()),
    }
}

/// A trivial built-in rule standing in for buildfile-driven rule
/// selection (out of scope, §1): every plain file target it matches
/// "builds" by logging that it ran, always reporting `Changed`.
#[derive(Default)]
struct DemoRule;

impl Rule for DemoRule {
    fn matches(&self, _action: Action, _graph: &TargetGraph, _target: TargetId, _hint: MatchHint, _match_extra: &MatchExtra) -> bool {
        true
    }

    fn apply(&self, _action: Action, graph: &mut TargetGraph, target: TargetId, _match_extra: &MatchExtra) -> Result<Recipe> {
        tracing::debug!(target = %graph.get(target).key.name, "cli demo rule: apply");
        Ok(Recipe {
            kind: RecipeKind::PerformUpdate,
            rule: crate::rules::RuleId::default(),
            match_data: None,
        })
    }

    fn perform(&self, action: Action, graph: &TargetGraph, target: TargetId, _recipe: &Recipe) -> Result<RecipeOutcome> {
        let name = &graph.get(target).key.name;
        if action.inner == OperationId::CLEAN {
            tracing::info!(target = %name, "clean");
        } else {
            tracing::info!(target = %name, "update");
        }
        Ok(RecipeOutcome::Changed)
    }
}

/// Builds an in-memory graph from the CLI's `name:dep1,dep2` specs,
/// registers [`DemoRule`] for every plain-file target under both
/// operations, and runs `action` to completion.
///
/// # Errors
///
/// Returns an error if a target spec is malformed, configuration
/// loading fails, or the driver reports a build failure (cycle, missing
/// rule, subprocess failure, …).
pub fn run(cli: &Cli) -> Result<MetricsSnapshot> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if cli.keep_going {
        config.keep_going = true;
    }

    let mut builder = GraphBuilder::new();
    let mut by_name: BTreeMap<String, TargetId> = BTreeMap::new();
    let mut intern = |builder: &mut GraphBuilder, by_name: &mut BTreeMap<String, TargetId>, name: &str| -> TargetId {
        *by_name
            .entry(name.to_string())
            .or_insert_with(|| builder.target(TargetKind::File, name))
    };

    let mut root_order: Vec<TargetId> = Vec::new();
    for spec in &cli.targets {
        let (name, _deps) = parse_spec(spec);
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Config, format!("empty target name in '{spec}'")));
        }
        let id = intern(&mut builder, &mut by_name, name);
        root_order.push(id);
    }
    for spec in &cli.targets {
        let (name, deps) = parse_spec(spec);
        let id = *by_name.get(name).expect("interned above");
        for dep in deps {
            let dep_id = intern(&mut builder, &mut by_name, dep);
            builder.depends_on(id, dep_id);
        }
    }

    let graph = builder.build();

    let mut registry = RuleRegistry::new();
    let scope = registry.global_scope();
    let rule_id = registry.insert("cli.demo", Arc::new(DemoRule));
    registry.register(scope, OperationId::UPDATE, TargetKind::File, MatchHint::NONE, rule_id);
    registry.register(scope, OperationId::CLEAN, TargetKind::File, MatchHint::NONE, rule_id);

    let driver = Driver::new(graph, Arc::new(registry), &config);
    let action = match cli.operation {
        CliOperation::Update => Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE),
        CliOperation::Clean => Action::simple(MetaOperationId::PERFORM, OperationId::CLEAN),
    };
    driver.run(action, &root_order)?;
    Ok(driver.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spec_splits_name_and_deps() {
        assert_eq!(parse_spec("a:b,c"), ("a", vec!["b", "c"]));
        assert_eq!(parse_spec("a"), ("a", vec![]));
    }

    #[test]
    fn run_builds_a_small_dependency_chain() {
        let cli = Cli {
            targets: vec!["app:main.o".to_string(), "main.o".to_string()],
            operation: CliOperation::Update,
            jobs: Some(2),
            keep_going: false,
            config: None,
        };
        let snapshot = run(&cli).unwrap();
        assert!(snapshot.targets_matched >= 2);
    }

    #[test]
    fn run_rejects_an_empty_target_name() {
        let cli = Cli {
            targets: vec![":dep".to_string()],
            operation: CliOperation::Update,
            jobs: Some(1),
            keep_going: false,
            config: None,
        };
        assert!(run(&cli).is_err());
    }
}
