//! The compile rule (§4.6): source → object/BMI, driving the header
//! extractor, the TU parser, and the module resolver, and recording their
//! outputs in the target's depdb.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::action::Action;
use crate::depdb::{Depdb, ExpectOutcome};
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{MatchExtra, PrereqRole, Prerequisite, Recipe, RecipeKind, RecipeOutcome, TargetGraph, TargetId, TargetKey, TargetKind};
use crate::rules::cc::header_extractor::{HeaderDependency, HeaderExtractor, HeaderSink};
use crate::rules::cc::modules::{self, BmiCandidate, ModuleImport, ModuleInfo, ModuleKind, ResolvedImport};
use crate::rules::cc::toolchain::{CompileRequest, Dialect, Toolchain};
use crate::rules::{MatchHint, Rule, RuleId};

/// The preprocessed-state hint a compile target may carry (§4.6 "Inputs"):
/// how much of the header/module extraction work can be skipped because a
/// prior stage (e.g. a distributed build coordinator) already did it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PreprocessedState {
    /// Nothing has been precomputed.
    #[default]
    None,
    /// Header dependencies are already known.
    Includes,
    /// Module dependencies are already known.
    Modules,
    /// Both headers and modules are already known.
    All,
}

impl PreprocessedState {
    fn needs_header_extraction(self) -> bool {
        self < Self::Includes
    }
}

/// Options affecting the depdb's "options checksum" line (§3 depdb line 3):
/// enabled preprocessor/compile options, extra system include directories,
/// PIC policy, and the `__symexport` flag.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Preprocessor options (`-D`, `-U`, plain `-I`).
    pub preprocessor_options: Vec<String>,
    /// Compile-proper options (`-O2`, `-std=`, warnings, …).
    pub compile_options: Vec<String>,
    /// Extra system include directories beyond the target's own.
    pub extra_system_includes: Vec<PathBuf>,
    /// Whether position-independent code is requested.
    pub pic: bool,
    /// Whether `__symexport`-style visibility annotation is active.
    pub symexport: bool,
}

impl CompileOptions {
    /// Hashes this option set into the depdb's options-checksum line.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for opt in &self.preprocessor_options {
            hasher.update(opt.as_bytes());
            hasher.update(b"\0");
        }
        for opt in &self.compile_options {
            hasher.update(opt.as_bytes());
            hasher.update(b"\0");
        }
        for dir in &self.extra_system_includes {
            hasher.update(dir.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        }
        hasher.update([u8::from(self.pic)]);
        hasher.update([u8::from(self.symexport)]);
        hex(&hasher.finalize())
    }
}

/// Calls `depdb.expect(line)`, following up with `depdb.write(line)` if
/// this call is the one that flips the db from reading into writing mode.
///
/// [`Depdb::expect`] only auto-records the compared line once the db is
/// already in writing mode (§4.8); the call that causes the *initial*
/// mismatch reports the superseded line via `ExpectOutcome::Mismatched`
/// but does not record its own freshly computed value, by design (the
/// caller may want to record something other than the compared line).
/// Every fixed depdb line this rule checks is always recorded verbatim,
/// so this wrapper replays it exactly once, right after the transition.
pub(crate) fn expect_recorded(depdb: &mut Depdb, line: impl Into<String>) -> ExpectOutcome {
    let line = line.into();
    let was_writing = depdb.writing();
    let outcome = depdb.expect(line.clone());
    if !was_writing && depdb.writing() {
        depdb.write(line);
    }
    outcome
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Derives the on-disk object-file extension for `dialect` (§4.6 step 1).
#[must_use]
pub fn obj_extension(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Gcc | Dialect::Clang => "o",
        Dialect::Msvc => "obj",
    }
}

/// A heuristic, line-oriented translation-unit parser (§4.6 step 6).
///
/// Full C++ tokenization is out of scope (§1 Non-goals: "buildfile
/// tokenization and evaluation" names the build-description language, but
/// the same collaborator boundary applies to the source language); this
/// recognizes the handful of module-declaration forms at statement start
/// that the compile rule needs: `module <name>;`, `export module <name>;`,
/// `import <name>;`, `export import <name>;`. Lines are matched after
/// trimming leading whitespace, which is sufficient for the well-formed,
/// single-declaration-per-line style every C++20 modules TU is written in.
#[must_use]
pub fn parse_translation_unit(text: &str) -> ModuleInfo {
    let mut info = ModuleInfo::default();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        let (exported, rest) = match line.strip_prefix("export ") {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };
        if let Some(rest) = rest.strip_prefix("module ") {
            let Some(name) = extract_name(rest) else { continue };
            info.kind = Some(if exported {
                ModuleKind::ModuleIface
            } else {
                ModuleKind::ModuleImpl
            });
            info.name = Some(name);
        } else if let Some(rest) = rest.strip_prefix("import ") {
            let Some(name) = extract_name(rest) else { continue };
            let kind = if name.starts_with('"') || name.starts_with('<') {
                ModuleKind::ModuleHeader
            } else {
                ModuleKind::ModuleImpl
            };
            info.imports.push(ModuleImport {
                kind,
                name: name.trim_matches(['"', '<', '>']).to_string(),
                exported,
            });
        }
    }
    if info.kind.is_none() && !info.imports.is_empty() {
        info.kind = Some(ModuleKind::NonModular);
    }
    info
}

fn extract_name(rest: &str) -> Option<String> {
    let end = rest.find(';')?;
    let name = rest[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Resolves and interns header targets discovered by the extractor,
/// applying the include-prefix map and the `-I`-pair src/out remap
/// (§4.6.1 step 2a).
struct GraphHeaderSink<'a> {
    graph: &'a mut TargetGraph,
    out_dir: PathBuf,
    src_remap: Vec<(PathBuf, PathBuf)>,
}

impl<'a> GraphHeaderSink<'a> {
    fn new(graph: &'a mut TargetGraph, out_dir: PathBuf, src_remap: Vec<(PathBuf, PathBuf)>) -> Self {
        Self { graph, out_dir, src_remap }
    }
}

impl HeaderSink for GraphHeaderSink<'_> {
    fn resolve(&mut self, raw: &Path) -> PathBuf {
        let realized = if crate::rules::cc::toolchain::should_realize_symlinks(raw) {
            std::fs::canonicalize(raw).unwrap_or_else(|_| raw.to_path_buf())
        } else {
            raw.to_path_buf()
        };
        for (src, out) in &self.src_remap {
            if let Ok(rel) = realized.strip_prefix(src) {
                let candidate = out.join(rel);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        realized
    }

    fn inject(&mut self, path: &Path) -> Result<HeaderDependency> {
        let key = TargetKey {
            kind: TargetKind::Header,
            dir: path.parent().unwrap_or(&self.out_dir).to_path_buf(),
            out: self.out_dir.clone(),
            name: path.file_name().map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned()),
            ext: None,
        };
        let id = self.graph.intern(key);
        self.graph.get_mut(id).path = Some(path.to_path_buf());
        Ok(HeaderDependency::Plain(path.to_path_buf()))
    }

    fn needs_restart(&self, _dep: &HeaderDependency) -> bool {
        // A freshly-interned header target never requires a restart in
        // this implementation: generated-header materialization is the
        // responsibility of that header's own rule, run as an ordinary
        // prerequisite before this target reaches `apply` (§4.6.1 step
        // 2b names the general policy; synthesizing on the fly is an
        // optimization this implementation does not need).
        false
    }
}

/// The compile rule (`cxx.compile`, generalized across C/C++ dialects).
pub struct CompileRule {
    toolchain: Arc<dyn Toolchain>,
    mg_oscillation_limit: usize,
    self_id: RuleId,
}

impl CompileRule {
    /// Creates a compile rule driving `toolchain`, registered under
    /// `self_id` (needed so produced [`Recipe`]s name their own rule).
    #[must_use]
    pub fn new(toolchain: Arc<dyn Toolchain>, mg_oscillation_limit: usize, self_id: RuleId) -> Self {
        Self {
            toolchain,
            mg_oscillation_limit,
            self_id,
        }
    }

    fn source_prerequisite(&self, graph: &TargetGraph, target: TargetId) -> Option<TargetId> {
        graph.get(target).prerequisites.iter().find_map(|p| {
            let kind = graph.get(p.literal).key.kind;
            matches!(kind, TargetKind::Source | TargetKind::ModuleInterfaceSource | TargetKind::Header).then_some(p.literal)
        })
    }

    fn library_prerequisites<'g>(&self, graph: &'g TargetGraph, target: TargetId) -> Vec<TargetId> {
        graph
            .get(target)
            .prerequisites
            .iter()
            .filter(|p| graph.get(p.literal).key.kind.is_library())
            .map(|p| p.literal)
            .collect()
    }

    fn sibling_bmi_candidates(&self, graph: &TargetGraph, target: TargetId) -> Vec<BmiCandidate> {
        graph
            .get(target)
            .prerequisites
            .iter()
            .filter_map(|p| {
                let sibling = graph.get(p.literal);
                if sibling.key.kind != TargetKind::Bmi {
                    return None;
                }
                Some(BmiCandidate {
                    target: p.literal,
                    leaf: sibling.key.name.clone(),
                    recorded_module_name: sibling.module_info.as_ref().and_then(|m| m.name.clone()),
                })
            })
            .collect()
    }

    fn library_bmi_names(&self, graph: &TargetGraph, libraries: &[TargetId]) -> Vec<(TargetId, String)> {
        let mut out = Vec::new();
        for &lib in libraries {
            for p in &graph.get(lib).prerequisites {
                let cand = graph.get(p.literal);
                if cand.key.kind == TargetKind::Bmi
                    && let Some(info) = &cand.module_info
                    && let Some(name) = &info.name
                {
                    out.push((p.literal, name.clone()));
                }
            }
        }
        out
    }
}

impl Rule for CompileRule {
    fn matches(&self, _action: Action, _graph: &TargetGraph, target: TargetId, _hint: MatchHint, _match_extra: &MatchExtra) -> bool {
        matches!(_graph.get(target).key.kind, TargetKind::Object | TargetKind::Bmi)
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&self, _action: Action, graph: &mut TargetGraph, target: TargetId, _match_extra: &MatchExtra) -> Result<Recipe> {
        // Step 1: classify and derive on-disk name.
        let (out_dir, is_bmi) = {
            let t = graph.get(target);
            (t.key.out.clone(), t.key.kind == TargetKind::Bmi)
        };
        let on_disk = if is_bmi {
            modules::bmi_path(&out_dir, &graph.get(target).key.name, self.toolchain.dialect())
        } else {
            out_dir.join(format!("{}.{}", graph.get(target).key.name, obj_extension(self.toolchain.dialect())))
        };
        graph.get_mut(target).path = Some(on_disk.clone());

        // Step 2: inject an fsdir{} ad hoc prerequisite for the output
        // directory, first in the list.
        let dir_key = TargetKey {
            kind: TargetKind::Dir,
            dir: out_dir.clone(),
            out: out_dir.clone(),
            name: String::new(),
            ext: None,
        };
        let dir_id = graph.intern(dir_key);
        let already_present = graph.get(target).prerequisites.iter().any(|p| p.literal == dir_id);
        if !already_present {
            graph.get_mut(target).prerequisites.insert(
                0,
                Prerequisite {
                    literal: dir_id,
                    role: PrereqRole::AdHoc,
                },
            );
        }

        // Step 3: prerequisite classification. Concurrent search-and-match
        // of prerequisites is the driver's responsibility (it owns the
        // scheduler); by the time `apply` runs here every prerequisite has
        // already been matched, including libraries match-only.
        let source_id = self
            .source_prerequisite(graph, target)
            .ok_or_else(|| Error::new(ErrorKind::NoMatchingRule, "compile target has no source prerequisite"))?;
        let source_path = graph
            .get(source_id)
            .path
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::Io, "source target has no resolved on-disk path"))?;
        let libraries = self.library_prerequisites(graph, target);

        // Step 4: open depdb, compare the fixed leading lines.
        let depdb_path = {
            let mut p = on_disk.clone();
            let mut name = p.file_name().unwrap_or_default().to_os_string();
            name.push(".d");
            p.set_file_name(name);
            p
        };
        let mut depdb = Depdb::open(&depdb_path)?;
        let rule_ident = "cxx.compile 4";
        let cc_checksum = self.toolchain.compiler_checksum().to_string();
        let options = CompileOptions::default();
        let opt_checksum = options.checksum();
        let src_abs = source_path.to_string_lossy().into_owned();

        let _ = expect_recorded(&mut depdb, rule_ident);
        let _ = expect_recorded(&mut depdb, cc_checksum);
        let _ = expect_recorded(&mut depdb, opt_checksum);
        let _ = expect_recorded(&mut depdb, src_abs);

        // Step 5: TU parser; content checksum + module info. These are
        // recorded before the header region so the depdb cursor stays
        // aligned with the fixed line order (rule, cc, opt, src, tu,
        // module, headers…, bmi): the header extractor's cache-drain
        // loop must start exactly at the first header line, not before.
        let source_text = std::fs::read_to_string(&source_path)?;
        let tu_hash = hex(&Sha256::digest(source_text.as_bytes()));
        let tu_outcome = expect_recorded(&mut depdb, tu_hash.as_str());
        let tu_unchanged = tu_outcome.matched();
        if tu_unchanged {
            depdb.request_touch();
        }
        let module_info = parse_translation_unit(&source_text);
        let _ = expect_recorded(&mut depdb, module_info.to_depdb_line());

        // Step 6: header extraction, unless already known. Headers are
        // interned into the graph, and recorded into the depdb, by the
        // extractor itself; the returned list is not needed further here.
        let preprocessed_state = PreprocessedState::default();
        if preprocessed_state.needs_header_extraction() {
            let extractor = HeaderExtractor::new(self.toolchain.as_ref(), self.mg_oscillation_limit);
            let mut sink = GraphHeaderSink::new(graph, out_dir.clone(), Vec::new());
            extractor.run(&source_path, &[], &mut depdb, &mut sink)?;
        }

        // Step 7: TU-type-vs-target-variant check.
        let expected_kind = if is_bmi { ModuleKind::ModuleIface } else { ModuleKind::NonModular };
        if is_bmi && !matches!(module_info.kind, Some(ModuleKind::ModuleIface | ModuleKind::ModuleHeader)) {
            return Err(Error::new(
                ErrorKind::NoMatchingRule,
                format!(
                    "'{}' does not define a module interface; use an obj*{{}} target instead of bmi*{{}}",
                    source_path.display()
                ),
            )
            .with_target(target));
        }
        if !is_bmi && matches!(module_info.kind, Some(ModuleKind::ModuleIface)) {
            return Err(Error::new(
                ErrorKind::NoMatchingRule,
                format!(
                    "'{}' defines a module interface; use a bmi*{{}} target instead of obj*{{}}",
                    source_path.display()
                ),
            )
            .with_target(target));
        }
        let _ = expected_kind;

        // Step 8: module resolver.
        let sibling_bmis = self.sibling_bmi_candidates(graph, target);
        let library_bmis = self.library_bmi_names(graph, &libraries);
        let mut resolved_bmi_paths = Vec::new();
        for import in &module_info.imports {
            if matches!(import.kind, ModuleKind::ModuleHeader) {
                continue;
            }
            match modules::resolve_import(&import.name, &library_bmis, &sibling_bmis)? {
                ResolvedImport::Bound(bmi_target) => {
                    if let Some(path) = &graph.get(bmi_target).path {
                        resolved_bmi_paths.push(path.to_string_lossy().into_owned());
                    }
                    if let Some(info) = &graph.get(bmi_target).module_info
                        && let Some(actual) = &info.name
                    {
                        modules::verify_guess(&import.name, actual)?;
                    }
                    modules::push_unique_tail(&mut graph.get_mut(target).opstate.prerequisite_targets, bmi_target);
                }
                ResolvedImport::AssumedPrebuilt => {}
            }
        }
        resolved_bmi_paths.sort();
        let bmi_hash = hex(&Sha256::digest(resolved_bmi_paths.join("\0").as_bytes()));
        let bmi_line_outcome = expect_recorded(&mut depdb, bmi_hash.as_str());

        graph.get_mut(target).module_info = Some(module_info);

        // Step 9: close depdb and decide the recipe. A depdb round-trip
        // alone is not enough: a deleted or stale object with an intact
        // depdb must still force a rebuild (§4.8, §3), so the output's
        // on-disk mtime is checked against the depdb's own mtime too.
        let writing = depdb.writing();
        let depdb_mtime = depdb.mtime();
        depdb.close()?;

        let object_mtime = std::fs::metadata(&on_disk).ok().and_then(|m| m.modified().ok());
        graph.get_mut(target).mtime = object_mtime;
        let object_up_to_date = match (depdb_mtime, object_mtime) {
            (Some(depdb_mtime), Some(object_mtime)) => crate::depdb::check_mtime(depdb_mtime, depdb_mtime, object_mtime, SystemTime::now()).is_ok(),
            _ => false,
        };

        if !writing && tu_unchanged && bmi_line_outcome.matched() && object_up_to_date {
            return Ok(Recipe {
                kind: RecipeKind::Noop,
                rule: self.self_id,
                match_data: None,
            });
        }
        Ok(Recipe {
            kind: RecipeKind::PerformUpdate,
            rule: self.self_id,
            match_data: Some(Box::new(CompileMatchData {
                source: source_path,
                output: on_disk,
            })),
        })
    }

    fn supports_reapply(&self) -> bool {
        true
    }

    fn perform(&self, _action: Action, _graph: &TargetGraph, _target: TargetId, recipe: &Recipe) -> Result<RecipeOutcome> {
        match recipe.kind {
            RecipeKind::Noop | RecipeKind::Group => Ok(RecipeOutcome::Unchanged),
            RecipeKind::PerformClean => Ok(RecipeOutcome::Unchanged),
            RecipeKind::PerformUpdate => {
                let data = recipe
                    .match_data
                    .as_ref()
                    .and_then(|d| d.downcast_ref::<CompileMatchData>())
                    .ok_or_else(|| Error::new(ErrorKind::Subprocess, "compile recipe missing match data"))?;
                perform_update(self.toolchain.as_ref(), data)?;
                Ok(RecipeOutcome::Changed)
            }
        }
    }
}

/// Data stashed in the recipe's `match_data` for execute to run the actual
/// compile (and for a later install rule to read back the output path).
pub struct CompileMatchData {
    /// The resolved source path.
    pub source: PathBuf,
    /// The resolved object/BMI output path.
    pub output: PathBuf,
}

/// Runs the actual compiler invocation for a [`RecipeKind::PerformUpdate`]
/// recipe produced by [`CompileRule::apply`] (§4.5 execute_impl: "run the
/// recipe").
pub fn perform_update(toolchain: &dyn Toolchain, data: &CompileMatchData) -> Result<()> {
    let raw = toolchain
        .compile(&CompileRequest {
            source: data.source.clone(),
            output: data.output.clone(),
            preprocessed: None,
        })
        .map_err(|e| Error::new(ErrorKind::Subprocess, e.to_string()))?;
    crate::rules::cc::toolchain::classify(&raw).map_err(|diagnostics| Error::new(ErrorKind::Subprocess, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::cc::toolchain::{CompileRequest as Req, LinkRequest, PreprocessRequest, RawProcessOutput, ToolchainError};

    struct FakeToolchain;
    impl Toolchain for FakeToolchain {
        fn dialect(&self) -> Dialect {
            Dialect::Gcc
        }
        fn compiler_checksum(&self) -> &str {
            "fake-gcc-14"
        }
        fn run_preprocess(&self, _req: &PreprocessRequest) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput::default())
        }
        fn compile(&self, _req: &Req) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput {
                exit_code: 0,
                ..Default::default()
            })
        }
        fn link(&self, _req: &LinkRequest) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput::default())
        }
    }

    fn make_source(dir: &std::path::Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn non_modular_parse_has_no_kind_marker() {
        let info = parse_translation_unit("#include <vector>\nint main() { return 0; }\n");
        assert!(info.kind.is_none());
        assert!(info.imports.is_empty());
    }

    #[test]
    fn parses_module_interface_and_imports() {
        let text = "export module foo.core;\nimport bar.util;\nexport import baz.iface;\n";
        let info = parse_translation_unit(text);
        assert_eq!(info.kind, Some(ModuleKind::ModuleIface));
        assert_eq!(info.name.as_deref(), Some("foo.core"));
        assert_eq!(info.imports.len(), 2);
        assert!(!info.imports[0].exported);
        assert!(info.imports[1].exported);
    }

    #[test]
    fn cold_build_produces_perform_update_then_noop() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let source = make_source(dir.path(), "foo.cxx", "int foo() { return 1; }\n");

        let mut graph = TargetGraph::new();
        struct Placeholder;
        impl Rule for Placeholder {
            fn matches(&self, _: Action, _: &TargetGraph, _: TargetId, _: MatchHint, _: &MatchExtra) -> bool {
                false
            }
            fn apply(&self, _: Action, _: &mut TargetGraph, _: TargetId, _: &MatchExtra) -> Result<Recipe> {
                unreachable!()
            }
        }
        let mut registry = crate::rules::RuleRegistry::new();
        let rule_id = registry.insert("cxx.compile", Arc::new(Placeholder));
        let rule = CompileRule::new(Arc::new(FakeToolchain), 1, rule_id);

        let src_key = TargetKey {
            kind: TargetKind::Source,
            dir: dir.path().to_path_buf(),
            out: out_dir.clone(),
            name: "foo".to_string(),
            ext: Some("cxx".to_string()),
        };
        let src_id = graph.intern(src_key);
        graph.get_mut(src_id).path = Some(source.clone());

        let obj_key = TargetKey {
            kind: TargetKind::Object,
            dir: dir.path().to_path_buf(),
            out: out_dir.clone(),
            name: "foo".to_string(),
            ext: None,
        };
        let obj_id = graph.intern(obj_key);
        graph.get_mut(obj_id).prerequisites.push(Prerequisite {
            literal: src_id,
            role: PrereqRole::Ordinary,
        });

        let action = Action::simple(crate::action::MetaOperationId::PERFORM, crate::action::OperationId::UPDATE);
        let match_extra = MatchExtra::default();

        let recipe = rule.apply(action, &mut graph, obj_id, &match_extra).unwrap();
        assert_eq!(recipe.kind, RecipeKind::PerformUpdate);

        // `apply` only decides what to do; simulate the recipe having
        // actually been performed (an object newer than the depdb it
        // was just recorded into) before asking again.
        std::fs::write(out_dir.join("foo.o"), b"").unwrap();

        // A second apply with nothing changed must observe a full depdb hit.
        let recipe2 = rule.apply(action, &mut graph, obj_id, &match_extra).unwrap();
        assert_eq!(recipe2.kind, RecipeKind::Noop);
    }
}
