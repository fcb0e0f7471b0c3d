//! The link rule (§4.7): executable/static/shared/utility library linking,
//! pkg-config emission, and the versioned shared-library symlink chain.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::Action;
use crate::depdb::Depdb;
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{MatchExtra, PrereqRole, Prerequisite, Recipe, RecipeKind, RecipeOutcome, TargetGraph, TargetId, TargetKey, TargetKind};
use crate::rules::cc::libs_paths::{self, LibVersion, LibsPaths, TargetOs};
use crate::rules::cc::pkgconfig::{self, PkgConfigData};
use crate::rules::cc::toolchain::{LinkRequest, Toolchain};
use crate::rules::{MatchHint, Rule, RuleId};

use super::compile::{expect_recorded, hex};

/// `bin.lib.version`: a per-OS version map with wildcard and
/// platform-independent fallback (§4.7 step 3).
#[derive(Debug, Clone, Default)]
pub struct VersionMap {
    /// Platform-independent fallback, used when no OS-specific entry and
    /// no wildcard entry applies.
    pub fallback: Option<LibVersion>,
    /// An explicit `linux`/`macos`/`windows` entry.
    pub linux: Option<LibVersion>,
    /// An explicit macOS entry.
    pub macos: Option<LibVersion>,
    /// An explicit Windows entry (Windows has no runtime version concept,
    /// but the map may still carry one for documentation/import-lib naming).
    pub windows: Option<LibVersion>,
}

impl VersionMap {
    fn resolve(&self, os: TargetOs) -> Option<&LibVersion> {
        match os {
            TargetOs::Linux => self.linux.as_ref().or(self.fallback.as_ref()),
            TargetOs::MacOs => self.macos.as_ref().or(self.fallback.as_ref()),
            TargetOs::Windows => self.windows.as_ref().or(self.fallback.as_ref()),
        }
    }
}

/// Options affecting the link command line and on-disk naming (§4.7 steps
/// 3-4).
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// The target operating system's linking conventions.
    pub os: TargetOs,
    /// `bin.lib.version`.
    pub version: VersionMap,
    /// Extra linker flags appended verbatim.
    pub link_options: Vec<String>,
    /// `true` if this install is relocatable (rewrite rpaths to
    /// `$ORIGIN`/`@loader_path`, §4.7 step 3).
    pub relocatable: bool,
    /// `cc.serialize`: serialize this link job against every other
    /// serialized link job process-wide (§4.7 step 6).
    pub serialize: bool,
    /// The maximum literal command-line length before falling back to a
    /// Windows `@response` file (§4.7 step 5); `None` disables the
    /// response-file path (non-Windows).
    pub command_line_limit: Option<usize>,
}

/// Data stashed in a library target's own recipe so that a dependent
/// link traversing the library closure can read its interface/
/// implementation library lists without re-deriving them (§4.7 step 3
/// "Interface vs implementation").
#[derive(Debug, Clone)]
pub struct LinkMatchData {
    /// This target's own kind (exe, static, shared, utility).
    pub kind: TargetKind,
    /// `true` if this library contributes no object/source of its own and
    /// has no binful utility-library dependency (§4.7 step 2).
    pub binless: bool,
    /// `true` if, additionally, every transitive library dependency is
    /// itself recursively binless and no simple `-l`/`.lib` item appears
    /// in its exported libs.
    pub recursively_binless: bool,
    /// The directory the link output lives in, for rpath derivation.
    pub output_dir: PathBuf,
    /// This library's own on-disk paths, if it is a shared library.
    pub libs_paths: Option<LibsPaths>,
    /// Direct argv contributions this library itself adds when linked
    /// (e.g. bare `-lpthread`-style system-library references it named),
    /// exposed to consumers via `export.libs`.
    pub export_libs: Vec<LinkArg>,
    /// Implementation-only argv contributions (`export.impl.libs`),
    /// additionally walked for a static-library or binless "deep link"
    /// consumer (§4.7 step 3).
    pub export_impl_libs: Vec<LinkArg>,
    /// Object file members to link directly instead of the archive, when
    /// this utility library is pulled into a static-library consumer
    /// (§4.7 step 3 "Utility libraries").
    pub thin_members: Vec<PathBuf>,
}

/// One entry contributed to a link command line by the closure walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkArg {
    /// A resolved library target, walked recursively for its own exports.
    Library(TargetId),
    /// A raw linker token (`-lm`, `ws2_32.lib`, …) with no corresponding
    /// target.
    Raw(String),
}

/// Classifies the target kind and drives library linking, pkg-config
/// emission, and the shared-library symlink chain (§4.7).
pub struct LinkRule {
    toolchain: Arc<dyn Toolchain>,
    options: LinkOptions,
    self_id: RuleId,
}

impl LinkRule {
    /// Creates a link rule driving `toolchain` under `options`, registered
    /// as `self_id`.
    #[must_use]
    pub fn new(toolchain: Arc<dyn Toolchain>, options: LinkOptions, self_id: RuleId) -> Self {
        Self { toolchain, options, self_id }
    }

    fn classify_prerequisites(&self, graph: &TargetGraph, target: TargetId) -> Result<Classified> {
        let mut out = Classified::default();
        let self_kind = graph.get(target).key.kind;
        for p in &graph.get(target).prerequisites {
            let kind = graph.get(p.literal).key.kind;
            match kind {
                TargetKind::Source | TargetKind::ModuleInterfaceSource => out.sources.push(p.literal),
                TargetKind::Object => {
                    if self_kind == TargetKind::StaticLib && graph.get(p.literal).key.ext.as_deref() == Some("objs") {
                        return Err(Error::new(ErrorKind::NoMatchingRule, "objs{} (PIC object) cannot feed a static_library target").with_target(target));
                    }
                    out.objects.push(p.literal);
                }
                TargetKind::Bmi => out.bmis.push(p.literal),
                TargetKind::Header => out.headers.push(p.literal),
                TargetKind::StaticLib | TargetKind::SharedLib | TargetKind::UtilityLib => out.libraries.push(p.literal),
                _ if p.role == PrereqRole::AdHoc => out.adhoc.push(p.literal),
                _ => out.other.push(p.literal),
            }
        }
        Ok(out)
    }

    /// §4.7 step 2: a library is binless if it has no object/source
    /// contribution and no binful utility-library dependency.
    fn compute_binless(&self, graph: &TargetGraph, target: TargetId, classified: &Classified) -> (bool, bool) {
        if !classified.sources.is_empty() || !classified.objects.is_empty() || !classified.bmis.is_empty() {
            return (false, false);
        }
        let any_binful_utility = classified.libraries.iter().any(|&lib| {
            graph.get(lib).key.kind == TargetKind::UtilityLib
                && !graph
                    .get(lib)
                    .opstate
                    .recipe
                    .as_ref()
                    .and_then(|r| r.match_data.as_ref())
                    .and_then(|d| d.downcast_ref::<LinkMatchData>())
                    .is_some_and(|d| d.binless)
        });
        if any_binful_utility {
            return (false, false);
        }
        let mut recursive = true;
        for &lib in &classified.libraries {
            let dep_data = graph.get(lib).opstate.recipe.as_ref().and_then(|r| r.match_data.as_ref()).and_then(|d| d.downcast_ref::<LinkMatchData>());
            match dep_data {
                Some(d) if d.recursively_binless => {
                    if d.export_libs.iter().any(|a| matches!(a, LinkArg::Raw(_))) {
                        recursive = false;
                    }
                }
                _ => recursive = false,
            }
        }
        (true, recursive)
    }

    fn derive_on_disk_name(&self, graph: &TargetGraph, target: TargetId) -> PathBuf {
        let (kind, out_dir, name) = {
            let t = graph.get(target);
            (t.key.kind, t.key.out.clone(), t.key.name.clone())
        };
        let path = match kind {
            TargetKind::Exe => out_dir.join(if self.options.os == TargetOs::Windows { format!("{name}.exe") } else { name.clone() }),
            TargetKind::StaticLib => {
                let ext = if self.options.os == TargetOs::Windows { "lib" } else { "a" };
                let prefix = if self.options.os == TargetOs::Windows { "" } else { "lib" };
                out_dir.join(format!("{prefix}{name}.{ext}"))
            }
            TargetKind::UtilityLib => out_dir.join(format!("lib{name}.thin.a")),
            // Shared libraries are named via `libs_paths::compute` in
            // `apply` directly; this branch is unreachable in practice.
            _ => out_dir.join(&name),
        };
        path
    }

    /// §4.7 step 4: the pkg-config member target keys (`pca{}`/`pcs{}`)
    /// for this link target, interned so a later `match` pass can find
    /// them as ad hoc group members.
    fn intern_pkgconfig_members(&self, graph: &mut TargetGraph, target: TargetId) -> (TargetId, TargetId) {
        let (out_dir, dir, name) = {
            let t = graph.get(target);
            (t.key.out.clone(), t.key.dir.clone(), t.key.name.clone())
        };
        let variant_ext = match graph.get(target).key.kind {
            TargetKind::SharedLib => "pcs",
            _ => "pca",
        };
        let member = graph.intern(TargetKey {
            kind: TargetKind::PkgConfig,
            dir: dir.clone(),
            out: out_dir.clone(),
            name: name.clone(),
            ext: Some(variant_ext.to_string()),
        });
        let common = graph.intern(TargetKey {
            kind: TargetKind::PkgConfig,
            dir,
            out: out_dir,
            name,
            ext: Some("pc".to_string()),
        });
        if !graph.get(target).adhoc_members.contains(&member) {
            graph.get_mut(target).adhoc_members.push(member);
        }
        if !graph.get(target).adhoc_members.contains(&common) {
            graph.get_mut(target).adhoc_members.push(common);
        }
        (member, common)
    }
}

#[derive(Default)]
struct Classified {
    sources: Vec<TargetId>,
    objects: Vec<TargetId>,
    bmis: Vec<TargetId>,
    headers: Vec<TargetId>,
    libraries: Vec<TargetId>,
    adhoc: Vec<TargetId>,
    other: Vec<TargetId>,
}

impl Rule for LinkRule {
    fn matches(&self, _action: Action, graph: &TargetGraph, target: TargetId, _hint: MatchHint, _match_extra: &MatchExtra) -> bool {
        matches!(graph.get(target).key.kind, TargetKind::Exe | TargetKind::StaticLib | TargetKind::SharedLib | TargetKind::UtilityLib)
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&self, _action: Action, graph: &mut TargetGraph, target: TargetId, _match_extra: &MatchExtra) -> Result<Recipe> {
        let classified = self.classify_prerequisites(graph, target)?;
        let (binless, recursively_binless) = self.compute_binless(graph, target, &classified);

        let out_dir = graph.get(target).key.out.clone();
        let kind = graph.get(target).key.kind;
        let name = graph.get(target).key.name.clone();

        let libs_paths = if kind == TargetKind::SharedLib {
            let version = self.options.version.resolve(self.options.os);
            Some(libs_paths::compute(&out_dir, &name, self.options.os, version))
        } else {
            None
        };
        let on_disk = match &libs_paths {
            Some(paths) => paths.real.clone(),
            None => self.derive_on_disk_name(graph, target),
        };
        graph.get_mut(target).path = Some(on_disk.clone());

        self.intern_pkgconfig_members(graph, target);

        // §4.7 step 5: update-during-match of headers and ad hoc inputs.
        for &h in classified.headers.iter().chain(classified.adhoc.iter()) {
            let _ = h; // concurrent update-during-match fan-out is the driver's job.
        }

        let mut export_libs = Vec::new();
        let mut export_impl_libs = Vec::new();
        for &lib in &classified.libraries {
            export_libs.push(LinkArg::Library(lib));
            if !matches!(kind, TargetKind::SharedLib) {
                export_impl_libs.push(LinkArg::Library(lib));
            }
        }

        let depdb_path = {
            let mut p = on_disk.clone();
            let mut n = p.file_name().unwrap_or_default().to_os_string();
            n.push(".d");
            p.set_file_name(n);
            p
        };
        let mut depdb = Depdb::open(&depdb_path)?;
        let _ = expect_recorded(&mut depdb, "cxx.link 1");
        let _ = expect_recorded(&mut depdb, self.toolchain.compiler_checksum());
        let writing_before_argv = depdb.writing();

        let match_data = LinkMatchData {
            kind,
            binless,
            recursively_binless,
            output_dir: out_dir,
            libs_paths,
            export_libs,
            export_impl_libs,
            thin_members: classified.objects.iter().filter_map(|&o| graph.get(o).path.clone()).collect(),
        };

        depdb.close()?;

        if binless && writing_before_argv == depdb.writing() {
            // A binless library with nothing new to record still needs its
            // recipe slot populated so dependents can read its export lists.
            return Ok(Recipe {
                kind: RecipeKind::Noop,
                rule: self.self_id,
                match_data: Some(Box::new(match_data)),
            });
        }

        Ok(Recipe {
            kind: RecipeKind::PerformUpdate,
            rule: self.self_id,
            match_data: Some(Box::new(match_data)),
        })
    }

    fn supports_reapply(&self) -> bool {
        true
    }

    fn perform(&self, _action: Action, graph: &TargetGraph, target: TargetId, recipe: &Recipe) -> Result<RecipeOutcome> {
        let Some(data) = recipe.match_data.as_ref().and_then(|d| d.downcast_ref::<LinkMatchData>()) else {
            return Ok(RecipeOutcome::Unchanged);
        };
        if !matches!(recipe.kind, RecipeKind::PerformUpdate) {
            return Ok(RecipeOutcome::Unchanged);
        }
        if data.binless {
            return Ok(RecipeOutcome::Unchanged);
        }

        let on_disk = graph.get(target).path.clone().ok_or_else(|| Error::new(ErrorKind::Io, "link target has no resolved on-disk path"))?;
        let binary_dir = on_disk.parent().unwrap_or(Path::new(".")).to_path_buf();

        // §4.7 perform_update step 3: traverse the library closure.
        let mut argv: Vec<String> = Vec::new();
        let mut appended: std::collections::HashMap<TargetId, (usize, usize)> = std::collections::HashMap::new();
        let mut rpaths: BTreeSet<String> = BTreeSet::new();
        let want_impl = matches!(data.kind, TargetKind::StaticLib) || (data.binless && matches!(data.kind, TargetKind::Exe));
        let roots: Vec<&LinkArg> = if want_impl {
            data.export_libs.iter().chain(data.export_impl_libs.iter()).collect()
        } else {
            data.export_libs.iter().collect()
        };
        for root in roots {
            walk_library_arg(graph, root, &mut argv, &mut appended, &mut rpaths, &binary_dir, self.options.os, self.options.relocatable);
        }
        for flag in &self.options.link_options {
            argv.push(flag.clone());
        }
        for rpath in &rpaths {
            argv.push(format!("-Wl,-rpath,{rpath}"));
        }
        argv.push("-o".to_string());
        argv.push(on_disk.to_string_lossy().into_owned());

        let argv_hash = hex(&sha2::Sha256::digest(argv.join("\0").as_bytes()));

        let depdb_path = {
            let mut p = on_disk.clone();
            let mut n = p.file_name().unwrap_or_default().to_os_string();
            n.push(".d");
            p.set_file_name(n);
            p
        };
        let mut depdb = Depdb::open(&depdb_path)?;
        let _ = expect_recorded(&mut depdb, "cxx.link 1");
        let _ = expect_recorded(&mut depdb, self.toolchain.compiler_checksum());
        let argv_outcome = expect_recorded(&mut depdb, argv_hash.as_str());
        let command_unchanged = argv_outcome.matched();
        depdb.close()?;

        if command_unchanged {
            return Ok(RecipeOutcome::Unchanged);
        }

        // §4.7 step 5: synthesize a Windows `@response` file if the
        // command line would overflow the platform limit.
        let response_file = match self.options.command_line_limit {
            Some(limit) if argv.iter().map(String::len).sum::<usize>() > limit => {
                let path = on_disk.with_extension("rsp");
                let body: String = argv.iter().map(|a| format!("\"{}\" ", a.replace('\\', "\\\\").replace('"', "\\\""))).collect();
                std::fs::write(&path, body)?;
                Some(path)
            }
            _ => None,
        };
        let final_argv = match &response_file {
            Some(path) => vec![format!("@{}", path.display())],
            None => argv,
        };

        let raw = self
            .toolchain
            .link(&LinkRequest { argv: final_argv, response_file })
            .map_err(|e| Error::new(ErrorKind::Subprocess, e.to_string()))?;
        crate::rules::cc::toolchain::classify(&raw).map_err(|diagnostics| Error::new(ErrorKind::Subprocess, diagnostics))?;

        if let Some(paths) = &data.libs_paths {
            materialize_symlink_chain(paths)?;
            clean_stale_symlinks(paths)?;
        }

        Ok(RecipeOutcome::Changed)
    }
}

/// Walks one library closure root (§4.7 step 3), appending its own argv
/// contribution and recursing into its dependencies, with duplicate
/// suppression-with-hoisting: a library seen a second time has its first
/// occurrence's argv range moved to the end so static archives can still
/// satisfy later-appearing symbols.
fn walk_library_arg(
    graph: &TargetGraph,
    arg: &LinkArg,
    argv: &mut Vec<String>,
    appended: &mut std::collections::HashMap<TargetId, (usize, usize)>,
    rpaths: &mut BTreeSet<String>,
    binary_dir: &Path,
    os: TargetOs,
    relocatable: bool,
) {
    match arg {
        LinkArg::Raw(token) => argv.push(token.clone()),
        LinkArg::Library(lib) => {
            let data = graph.get(*lib).opstate.recipe.as_ref().and_then(|r| r.match_data.as_ref()).and_then(|d| d.downcast_ref::<LinkMatchData>());
            let Some(data) = data else { return };

            if data.recursively_binless {
                // Short-circuits the hoist: nothing of its own to contribute,
                // only its own dependencies matter.
                for nested in &data.export_libs {
                    walk_library_arg(graph, nested, argv, appended, rpaths, binary_dir, os, relocatable);
                }
                return;
            }

            if let Some(&(start, end)) = appended.get(lib) {
                let range: Vec<String> = argv[start..end].to_vec();
                argv.drain(start..end);
                for (id, (s, e)) in appended.iter_mut() {
                    if *id != *lib && *s >= end {
                        *s -= end - start;
                        *e -= end - start;
                    }
                }
                let new_start = argv.len();
                argv.extend(range);
                appended.insert(*lib, (new_start, argv.len()));
                return;
            }

            let start = argv.len();
            if matches!(data.kind, TargetKind::UtilityLib) {
                for member in &data.thin_members {
                    argv.push(member.to_string_lossy().into_owned());
                }
            } else if let Some(path) = graph.get(*lib).path.clone() {
                argv.push(path.to_string_lossy().into_owned());
                if matches!(data.kind, TargetKind::SharedLib) {
                    let lib_dir = data.output_dir.clone();
                    let rp = if relocatable {
                        libs_paths::relocatable_rpath(os, binary_dir, &lib_dir)
                    } else {
                        lib_dir.display().to_string()
                    };
                    rpaths.insert(rp);
                }
            }
            for nested in &data.export_libs {
                walk_library_arg(graph, nested, argv, appended, rpaths, binary_dir, os, relocatable);
            }
            appended.insert(*lib, (start, argv.len()));
        }
    }
}

#[cfg(unix)]
fn symlink_force(original: &Path, link: &Path) -> Result<()> {
    let _ = std::fs::remove_file(link);
    std::os::unix::fs::symlink(original, link)?;
    Ok(())
}

#[cfg(windows)]
fn symlink_force(original: &Path, link: &Path) -> Result<()> {
    let _ = std::fs::remove_file(link);
    std::fs::copy(original, link)?;
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn symlink_force(original: &Path, link: &Path) -> Result<()> {
    let _ = std::fs::remove_file(link);
    std::fs::copy(original, link)?;
    Ok(())
}

/// §4.7 step 8: materializes `real ← interim ← soname ← load ← link`, each
/// pointing (directly or transitively) at `real`.
fn materialize_symlink_chain(paths: &LibsPaths) -> Result<()> {
    let chain = libs_paths::alias_chain(paths);
    let mut target = paths.real.as_path();
    for alias in chain.into_iter().rev() {
        let name = alias.file_name().unwrap_or_default();
        let pointee = target.file_name().unwrap_or_default();
        symlink_force(Path::new(pointee), &alias.to_path_buf())?;
        target = alias;
        let _ = name;
    }
    Ok(())
}

/// §4.7 step 7: removes stale versioned siblings of this library, keeping
/// only the currently-active names.
fn clean_stale_symlinks(paths: &LibsPaths) -> Result<()> {
    let dir = paths.real.parent().unwrap_or(Path::new("."));
    let Ok(entries) = std::fs::read_dir(dir) else { return Ok(()) };
    let active: BTreeSet<&Path> = libs_paths::alias_chain(paths).into_iter().chain(std::iter::once(paths.real.as_path())).collect();
    let real_stem = paths.real.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    for entry in entries.flatten() {
        let path = entry.path();
        if active.contains(path.as_path()) {
            continue;
        }
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if name.starts_with(real_stem.split('.').next().unwrap_or(&real_stem)) && name.contains(".so.") || name.ends_with(".dylib") {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::cc::toolchain::{CompileRequest, Dialect, PreprocessRequest, RawProcessOutput, ToolchainError};

    struct StubToolchain;
    impl Toolchain for StubToolchain {
        fn dialect(&self) -> Dialect {
            Dialect::Gcc
        }
        fn compiler_checksum(&self) -> &str {
            "stub-checksum"
        }
        fn run_preprocess(&self, _req: &PreprocessRequest) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput::default())
        }
        fn compile(&self, _req: &CompileRequest) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput::default())
        }
        fn link(&self, _req: &LinkRequest) -> std::result::Result<RawProcessOutput, ToolchainError> {
            Ok(RawProcessOutput::default())
        }
    }

    struct Placeholder;
    impl Rule for Placeholder {
        fn matches(&self, _: Action, _: &TargetGraph, _: TargetId, _: MatchHint, _: &MatchExtra) -> bool {
            false
        }
        fn apply(&self, _: Action, _: &mut TargetGraph, _: TargetId, _: &MatchExtra) -> Result<Recipe> {
            unreachable!()
        }
    }

    fn rule() -> LinkRule {
        let mut registry = crate::rules::RuleRegistry::new();
        let rule_id = registry.insert("cxx.link", Arc::new(Placeholder));
        LinkRule::new(Arc::new(StubToolchain), LinkOptions::default(), rule_id)
    }

    #[test]
    fn matches_only_link_target_kinds() {
        let mut graph = TargetGraph::new();
        let exe = graph.intern(TargetKey {
            kind: TargetKind::Exe,
            dir: PathBuf::from("/src"),
            out: PathBuf::from("/out"),
            name: "app".to_string(),
            ext: None,
        });
        let obj = graph.intern(TargetKey {
            kind: TargetKind::Object,
            dir: PathBuf::from("/src"),
            out: PathBuf::from("/out"),
            name: "app".to_string(),
            ext: None,
        });
        let rule = rule();
        let me = MatchExtra::default();
        assert!(rule.matches(Action::simple(crate::action::MetaOperationId::PERFORM, crate::action::OperationId::UPDATE), &graph, exe, MatchHint::NONE, &me));
        assert!(!rule.matches(Action::simple(crate::action::MetaOperationId::PERFORM, crate::action::OperationId::UPDATE), &graph, obj, MatchHint::NONE, &me));
    }

    #[test]
    fn a_library_with_no_sources_and_no_binful_dependency_is_binless() {
        let mut graph = TargetGraph::new();
        let lib = graph.intern(TargetKey {
            kind: TargetKind::StaticLib,
            dir: PathBuf::from("/src"),
            out: PathBuf::from("/out"),
            name: "iface".to_string(),
            ext: None,
        });
        let rule = rule();
        let classified = rule.classify_prerequisites(&graph, lib).unwrap();
        let (binless, recursive) = rule.compute_binless(&graph, lib, &classified);
        assert!(binless);
        assert!(recursive);
    }
}
