//! C++20 module classification and the BMI resolver (§4.6.2, §3 "Module
//! info").

use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::graph::TargetId;

/// A translation unit's module role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// An ordinary, non-modular translation unit.
    NonModular,
    /// A module implementation unit.
    ModuleImpl,
    /// A module interface unit.
    ModuleIface,
    /// A header unit (imported header, not a named module).
    ModuleHeader,
}

/// One `import` declaration inside a translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImport {
    /// The kind of thing imported.
    pub kind: ModuleKind,
    /// The module name, or (for header units) the absolute header path.
    pub name: String,
    /// `true` if this is an `export import`, re-exported to importers of
    /// the enclosing module (§4.6.2 step 5).
    pub exported: bool,
}

/// A translation unit's module classification, as derived by the TU
/// parser (§3 "Module info", §4.6 step 6/7).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInfo {
    /// This TU's own role.
    pub kind: Option<ModuleKind>,
    /// This TU's module name (interface/implementation only).
    pub name: Option<String>,
    /// Its `import` declarations, in source order.
    pub imports: Vec<ModuleImport>,
}

impl ModuleInfo {
    /// Renders this TU's depdb module-info line (§3 item 6): `"name+"` for
    /// an implementation unit, `"name!"` for an interface/header unit
    /// (`*` suffix per import marking re-export is carried on the import
    /// list, not this line), or an empty string for a non-modular TU.
    #[must_use]
    pub fn to_depdb_line(&self) -> String {
        match (self.kind, &self.name) {
            (Some(ModuleKind::ModuleImpl), Some(name)) => format!("{name}+"),
            (Some(ModuleKind::ModuleIface | ModuleKind::ModuleHeader), Some(name)) => {
                let mut line = format!("{name}!");
                for imp in &self.imports {
                    line.push(' ');
                    line.push_str(&imp.name);
                    if imp.exported {
                        line.push('*');
                    }
                }
                line
            }
            _ => String::new(),
        }
    }
}

/// A candidate BMI-producing sibling target considered by the resolver.
#[derive(Debug, Clone)]
pub struct BmiCandidate {
    /// The target producing this BMI.
    pub target: TargetId,
    /// The source file's leaf name (no directory), used for fuzzy
    /// scoring against the import name.
    pub leaf: String,
    /// The module name actually recorded on this BMI once built
    /// (`cc.module_name`), if already known.
    pub recorded_module_name: Option<String>,
}

const BOUNDARY_CHARS: [char; 4] = ['_', '-', '.', '/'];

fn is_boundary(c: char) -> bool {
    BOUNDARY_CHARS.contains(&c) || c == '\\'
}

/// Scores how well `leaf` (a source file's leaf name) matches `module_name`
/// (§4.6.2 step 2): walk both strings right-to-left, treating `_`, `-`,
/// `.`, path separators, and case transitions as equivalent word
/// boundaries; matching characters contribute 1 to the score; a boundary
/// present on only one side does not consume the other.
///
/// An exact `cc.module_name` match is scored separately at `len+1` by the
/// caller, which always beats any value this function can return (bounded
/// by `min(leaf.len(), module_name.len())`).
#[must_use]
pub fn fuzzy_score(leaf: &str, module_name: &str) -> u32 {
    let a: Vec<char> = leaf.chars().collect();
    let b: Vec<char> = module_name.chars().collect();
    let (mut i, mut j) = (a.len(), b.len());
    let mut score = 0u32;
    let mut a_right: Option<char> = None;
    let mut b_right: Option<char> = None;

    loop {
        let ac = (i > 0).then(|| a[i - 1]);
        let bc = (j > 0).then(|| b[j - 1]);
        if ac.is_none() && bc.is_none() {
            break;
        }

        let a_boundary = ac.is_some_and(|c| is_boundary(c) || is_case_transition(c, a_right));
        let b_boundary = bc.is_some_and(|c| is_boundary(c) || is_case_transition(c, b_right));

        match (ac, bc) {
            (Some(x), Some(y)) if !a_boundary && !b_boundary && x.eq_ignore_ascii_case(&y) => {
                score += 1;
                a_right = Some(x);
                b_right = Some(y);
                i -= 1;
                j -= 1;
            }
            (Some(x), _) if a_boundary => {
                a_right = Some(x);
                i -= 1;
            }
            (_, Some(y)) if b_boundary => {
                b_right = Some(y);
                j -= 1;
            }
            _ => break,
        }
    }
    score
}

/// `true` if `c` sits just left of a character (`right`) that starts a new
/// "word" relative to `c` in a camelCase-style identifier (a lower-to-upper
/// transition reading left to right).
fn is_case_transition(c: char, right: Option<char>) -> bool {
    matches!(right, Some(r) if c.is_lowercase() && r.is_uppercase())
}

/// A resolved or deferred outcome for one `import` (§4.6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImport {
    /// Bound to a sibling/library-supplied BMI target.
    Bound(TargetId),
    /// A `std.*` import assumed to be pre-built (no local prerequisite).
    AssumedPrebuilt,
}

/// Binds one `import` name to a candidate BMI target (§4.6.2 steps 1-4).
///
/// `library_bmis` are this TU's library prerequisites' own BMI
/// prerequisites carrying an exact `cc.module_name` (step 1);
/// `sibling_ifaces` are this TU's sibling module-interface prerequisites
/// scored fuzzily against the import's leaf name (step 2).
pub fn resolve_import(
    import_name: &str,
    library_bmis: &[(TargetId, String)],
    sibling_ifaces: &[BmiCandidate],
) -> Result<ResolvedImport> {
    for (target, module_name) in library_bmis {
        if module_name == import_name {
            return Ok(ResolvedImport::Bound(*target));
        }
    }

    let mut best: Option<(u32, TargetId)> = None;
    for candidate in sibling_ifaces {
        let score = match &candidate.recorded_module_name {
            Some(recorded) if recorded == import_name => import_name.len() as u32 + 1,
            _ => fuzzy_score(&candidate.leaf, import_name),
        };
        if score == 0 {
            continue;
        }
        match &best {
            Some((best_score, _)) if *best_score >= score => {}
            _ => best = Some((score, candidate.target)),
        }
    }

    if let Some((_, target)) = best {
        return Ok(ResolvedImport::Bound(target));
    }

    if import_name.starts_with("std.") || import_name == "std" {
        return Ok(ResolvedImport::AssumedPrebuilt);
    }

    Err(Error::new(
        ErrorKind::UnresolvedModule,
        format!("unresolved module import '{import_name}'"),
    ))
}

/// Verifies a fuzzy guess against the BMI's actual recorded
/// `cc.module_name` once the candidate has been matched and built
/// (§4.6.2 "Guess verification").
pub fn verify_guess(import_name: &str, actual_module_name: &str) -> Result<()> {
    if import_name == actual_module_name {
        return Ok(());
    }
    Err(Error::new(
        ErrorKind::UnresolvedModule,
        format!(
            "module '{import_name}' resolved to a BMI actually named '{actual_module_name}'; \
             rename the source or set an explicit cc.module_name"
        ),
    ))
}

/// The three prerequisite-list boundaries tracked while repositioning
/// re-exported imports (§4.6.2 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulePositions {
    /// Index where this TU's own prerequisite list began.
    pub start: usize,
    /// Index where re-exported imports were moved to (the "exported"
    /// boundary).
    pub exported: usize,
    /// Index after appended duplicate transitive BMIs from re-exports
    /// (the "copied" boundary).
    pub copied: usize,
}

/// Moves re-exported imports to the end of `prereqs` and appends their
/// transitive BMIs (already resolved, passed in `transitive_bmis`) as
/// duplicates, recording the three boundaries (§4.6.2 step 5).
pub fn reposition_reexports(
    prereqs: &mut Vec<TargetId>,
    imports: &[(TargetId, bool)],
    transitive_bmis: &[TargetId],
) -> ModulePositions {
    let start = prereqs.len() - imports.len();
    let (reexported, ordinary): (Vec<_>, Vec<_>) = imports.iter().partition(|(_, exported)| *exported);

    prereqs.truncate(start);
    prereqs.extend(ordinary.iter().map(|(t, _)| *t));
    let exported = prereqs.len();
    prereqs.extend(reexported.iter().map(|(t, _)| *t));

    let copied_start = prereqs.len();
    prereqs.extend_from_slice(transitive_bmis);
    let _ = copied_start;

    ModulePositions {
        start,
        exported,
        copied: prereqs.len(),
    }
}

/// Appends `id` to `list` unless it is already the last element (§4.6.1:
/// "A target is never re-added if it is already at the list's tail;
/// pathologically it may be added more than once, which is accepted").
pub fn push_unique_tail(list: &mut Vec<TargetId>, id: TargetId) {
    if list.last() != Some(&id) {
        list.push(id);
    }
}

/// Derives the on-disk BMI extension for a dialect, by compiler family
/// (§4.6 step 1): GCC `.gcm`, Clang `.pcm`, MSVC `.ifc`.
#[must_use]
pub fn bmi_extension(dialect: crate::rules::cc::toolchain::Dialect) -> &'static str {
    use crate::rules::cc::toolchain::Dialect;
    match dialect {
        Dialect::Gcc => "gcm",
        Dialect::Clang => "pcm",
        Dialect::Msvc => "ifc",
    }
}

/// Derives the on-disk BMI path for `source`'s module name under
/// `out_dir` (§4.6 step 1).
#[must_use]
pub fn bmi_path(out_dir: &Path, module_name: &str, dialect: crate::rules::cc::toolchain::Dialect) -> std::path::PathBuf {
    out_dir.join(format!("{module_name}.{}", bmi_extension(dialect)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_score_matches_tail_across_boundary() {
        // "core" vs "foo.core": the shared suffix "core" scores 4, the
        // boundary before "foo" does not penalize further matching.
        assert_eq!(fuzzy_score("core", "foo.core"), 4);
    }

    #[test]
    fn fuzzy_score_is_order_independent_in_its_boundary_handling() {
        let a = fuzzy_score("core", "foo.core");
        let b = fuzzy_score("foo.core", "core");
        assert_eq!(a, b);
    }

    #[test]
    fn exact_module_name_beats_any_fuzzy_score() {
        let candidates = [BmiCandidate {
            target: TargetId::from_raw(0),
            leaf: "totally_unrelated".to_string(),
            recorded_module_name: Some("foo.core".to_string()),
        }];
        let resolved = resolve_import("foo.core", &[], &candidates).unwrap();
        assert_eq!(resolved, ResolvedImport::Bound(TargetId::from_raw(0)));
    }

    #[test]
    fn unresolved_non_std_import_is_fatal() {
        let err = resolve_import("foo.core", &[], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedModule);
    }

    #[test]
    fn unresolved_std_import_is_assumed_prebuilt() {
        let resolved = resolve_import("std.core", &[], &[]).unwrap();
        assert_eq!(resolved, ResolvedImport::AssumedPrebuilt);
    }

    #[test]
    fn reposition_moves_exported_imports_to_tail() {
        let mut prereqs = vec![TargetId::from_raw(0), TargetId::from_raw(1), TargetId::from_raw(2)];
        let imports = vec![(TargetId::from_raw(1), true), (TargetId::from_raw(2), false)];
        let positions = reposition_reexports(&mut prereqs, &imports, &[TargetId::from_raw(3)]);
        assert_eq!(prereqs, vec![
            TargetId::from_raw(0),
            TargetId::from_raw(2),
            TargetId::from_raw(1),
            TargetId::from_raw(3),
        ]);
        assert_eq!(positions.start, 1);
        assert_eq!(positions.exported, 2);
        assert_eq!(positions.copied, 4);
    }

    #[test]
    fn push_unique_tail_dedupes_only_adjacent() {
        let mut list = vec![TargetId::from_raw(0)];
        push_unique_tail(&mut list, TargetId::from_raw(0));
        assert_eq!(list.len(), 1);
        push_unique_tail(&mut list, TargetId::from_raw(1));
        push_unique_tail(&mut list, TargetId::from_raw(0));
        assert_eq!(list.len(), 3);
    }
}
