//! The header-dependency extractor (§4.6.1): a restartable state machine
//! across GCC/Clang/MSVC dependency-output conventions, driving cache
//! consultation, compiler re-invocation, and `-MG`-retry oscillation
//! detection.

use std::path::{Path, PathBuf};

use crate::depdb::Depdb;
use crate::error::{Error, ErrorKind, Result};
use crate::rules::cc::toolchain::{Dialect, PreprocessRequest, RawProcessOutput, Toolchain};

/// One header dependency discovered by a scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDependency {
    /// A plain header, recorded as an absolute path (depdb line format:
    /// the bare path).
    Plain(PathBuf),
    /// A header resolved to a header-unit BMI (depdb line format:
    /// `@ '<header-path>' <bmi-path>`).
    HeaderUnit {
        /// The header's resolved path.
        header: PathBuf,
        /// The BMI synthesized for it.
        bmi: PathBuf,
    },
}

impl HeaderDependency {
    /// Renders this dependency as its depdb line.
    #[must_use]
    pub fn to_depdb_line(&self) -> String {
        match self {
            Self::Plain(p) => p.display().to_string(),
            Self::HeaderUnit { header, bmi } => {
                format!("@ '{}' {}", header.display(), bmi.display())
            }
        }
    }

    /// The header path this dependency concerns, regardless of variant.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Plain(p) => p,
            Self::HeaderUnit { header, .. } => header,
        }
    }
}

/// Parsed result of a single dependency-scan pass, before cache merging.
#[derive(Debug, Clone, Default)]
pub struct ParsedDeps {
    /// Headers discovered, in the order the compiler reported them.
    pub headers: Vec<PathBuf>,
    /// The name of a header the compiler could not find, if one surfaced
    /// this pass (GCC/Clang `-MG` unresolved name, or MSVC `C1083`).
    pub missing: Option<String>,
}

/// Parses a GCC/Clang `-M`/`-MD` Makefile-rule dependency listing.
///
/// The format is `target: dep1 dep2 \` with `\`-continued lines; the
/// first token (the rule's own target) is discarded.
#[must_use]
pub fn parse_make_deps(text: &str) -> ParsedDeps {
    let mut headers = Vec::new();
    let joined = text.replace("\\\n", " ");
    for (line_no, line) in joined.lines().enumerate() {
        let rest = if line_no == 0 {
            line.split_once(':').map_or(line, |(_, rest)| rest)
        } else {
            line
        };
        for tok in rest.split_whitespace() {
            headers.push(PathBuf::from(tok));
        }
    }
    // The rule's own target/source normally appears first; `run` filters
    // it back out by comparing against the source path it was given.
    ParsedDeps {
        headers,
        missing: None,
    }
}

/// Parses MSVC `/showIncludes` output, redirected to stdout.
///
/// `Note: including file:   <path>` lines (at any nesting depth) are
/// collected in order; a `C1083` error is the recoverable "missing
/// include" case, any other `error C\d+` is fatal (§4.6.1).
pub fn parse_msvc_show_includes(stderr: &str) -> Result<ParsedDeps> {
    let mut headers = Vec::new();
    let mut missing = None;
    for line in stderr.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("Note: including file:") {
            headers.push(PathBuf::from(rest.trim()));
            continue;
        }
        if let Some(idx) = line.find("C1083") {
            // `...: error C1083: Cannot open include file: 'bar.h': ...`
            let tail = &line[idx..];
            if let Some(start) = tail.find('\'') {
                if let Some(end) = tail[start + 1..].find('\'') {
                    missing = Some(tail[start + 1..start + 1 + end].to_string());
                }
            }
            continue;
        }
        if line.contains("error C") && !line.contains("C1083") {
            return Err(Error::new(
                ErrorKind::MissingHeader,
                format!("MSVC dependency scan reported a fatal error: {line}"),
            ));
        }
    }
    Ok(ParsedDeps {
        headers: headers.into_iter().map(PathBuf::from).collect(),
        missing,
    })
}

/// Parses one dependency-scan pass's raw output for `dialect`, applying
/// each dialect's diagnostics rule (§4.6.1 "Diagnostics"): for GCC/Clang
/// any stderr on the scan run means the preprocessed output must not be
/// reused for the subsequent compile (it may have swallowed warnings).
pub fn parse_pass(dialect: Dialect, raw: &RawProcessOutput) -> Result<(ParsedDeps, bool)> {
    match dialect {
        Dialect::Gcc | Dialect::Clang => {
            let deps = parse_make_deps(&raw.stdout);
            let reusable_preprocessed = raw.stderr.trim().is_empty();
            Ok((deps, reusable_preprocessed))
        }
        Dialect::Msvc => {
            let deps = parse_msvc_show_includes(&raw.stderr)?;
            Ok((deps, false))
        }
    }
}

/// Resolves and injects headers discovered by a scan pass into the
/// target graph; implemented by the compile rule so the extractor itself
/// stays free of [`crate::graph`] specifics.
pub trait HeaderSink {
    /// Normalizes a raw path reported by the compiler: realizes symlinks
    /// when it contains `..`, applies the include-prefix map, and applies
    /// the src/out remap built from `-I` pairs (§4.6.1 step 2a).
    fn resolve(&mut self, raw: &Path) -> PathBuf;

    /// Recursively updates (or synthesizes, for a generated header) the
    /// header target for `path`. Returns `true` if doing so changed the
    /// filesystem in a way that warrants restarting the scan (§4.6.1 step
    /// 2b).
    fn inject(&mut self, path: &Path) -> Result<HeaderDependency>;

    /// `true` if `inject`'s most recent call produced a dependency whose
    /// resolution requires a restart (a new generated header appeared, or
    /// a symlink got remapped).
    fn needs_restart(&self, dep: &HeaderDependency) -> bool;
}

/// Drives the restartable extraction loop for one translation unit
/// (§4.6.1 "Restart policy").
pub struct HeaderExtractor<'a> {
    toolchain: &'a dyn Toolchain,
    mg_oscillation_limit: usize,
}

impl<'a> HeaderExtractor<'a> {
    /// Creates an extractor bound to `toolchain`, tolerating up to
    /// `mg_oscillation_limit` successive no-progress forced-`-MG` passes
    /// before reporting "inconsistent compiler behavior" (§4.6.1, §4.9).
    #[must_use]
    pub fn new(toolchain: &'a dyn Toolchain, mg_oscillation_limit: usize) -> Self {
        Self {
            toolchain,
            mg_oscillation_limit,
        }
    }

    /// Runs the extraction loop, consulting `depdb`'s cached header lines
    /// first and falling back to the compiler, resolving/injecting each
    /// discovered path through `sink`.
    pub fn run(
        &self,
        source: &Path,
        include_dirs: &[PathBuf],
        depdb: &mut Depdb,
        sink: &mut dyn HeaderSink,
    ) -> Result<Vec<HeaderDependency>> {
        let mut results = Vec::new();
        let mut mg_mode = false;
        let mut no_progress_streak = 0usize;
        let mut last_skip_count: Option<usize> = None;

        // Step 1: drain the cache as long as each cached header still
        // exists and is not stale. The region is bounded: one cached
        // line always remains reserved for the trailing BMI-hash line,
        // which is not a header and belongs to the caller.
        loop {
            if depdb.cached_remaining() <= 1 {
                break;
            }
            let Some(cached) = depdb.read() else { break };
            let path = PathBuf::from(&cached);
            if path.exists() {
                depdb.record_unchanged(cached);
                results.push(HeaderDependency::Plain(path));
            } else {
                // Stop draining the cache; the compiler must run to
                // rediscover from here. `depdb.read()` already advanced
                // past this line, which is fine: once a rerun is needed
                // every subsequent line is re-derived anyway.
                depdb.force_writing();
                break;
            }
        }
        let skip_count = results.len();

        if !depdb.writing() {
            // Full cache hit: nothing more to do.
            return Ok(results);
        }

        // Step 2+: run the compiler, looping on restart/MG-retry.
        loop {
            let req = PreprocessRequest {
                source: source.to_path_buf(),
                mg_mode,
                include_dirs: include_dirs.to_vec(),
                module_mapper: false,
            };
            let raw = self
                .toolchain
                .run_preprocess(&req)
                .map_err(|e| Error::new(ErrorKind::Subprocess, e.to_string()))?;
            let (deps, _reusable) = parse_pass(self.toolchain.dialect(), &raw)?;

            let mut restart = false;
            for raw_path in &deps.headers {
                // The rule's own source normally appears as the first
                // dependency token; it is not a header.
                if raw_path == source {
                    continue;
                }
                let resolved = sink.resolve(raw_path);
                let dep = sink.inject(&resolved)?;
                // Freshly discovered here, so the db is already in
                // writing mode (guaranteed by the early return above);
                // record it now rather than leaving it to the caller.
                depdb.write(dep.to_depdb_line());
                if sink.needs_restart(&dep) {
                    restart = true;
                }
                results.push(dep);
            }

            if let Some(missing) = &deps.missing {
                if mg_mode {
                    // A second consecutive forced-`-MG` pass that made no
                    // progress (same skip-count as last time) is fatal.
                    if last_skip_count == Some(skip_count) {
                        no_progress_streak += 1;
                    } else {
                        no_progress_streak = 0;
                    }
                    last_skip_count = Some(skip_count);
                    if no_progress_streak >= self.mg_oscillation_limit {
                        return Err(Error::new(
                            ErrorKind::OscillatingMg,
                            format!(
                                "inconsistent compiler behavior: two consecutive -MG passes made no progress resolving '{missing}'"
                            ),
                        ));
                    }
                    restart = true;
                } else {
                    mg_mode = true;
                    restart = true;
                }
            }

            if !restart {
                break;
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_make_rule() {
        let text = "foo.o: foo.cxx bar.hxx \\\n baz.hxx\n";
        let deps = parse_make_deps(text);
        assert_eq!(
            deps.headers,
            vec![PathBuf::from("foo.cxx"), PathBuf::from("bar.hxx"), PathBuf::from("baz.hxx")]
        );
    }

    #[test]
    fn parses_msvc_show_includes_and_c1083() {
        let stderr = "Note: including file:   C:\\inc\\bar.h\nfoo.cxx(3): error C1083: Cannot open include file: 'missing.h': No such file or directory\n";
        let deps = parse_msvc_show_includes(stderr).unwrap();
        assert_eq!(deps.headers, vec![PathBuf::from("C:\\inc\\bar.h")]);
        assert_eq!(deps.missing.as_deref(), Some("missing.h"));
    }

    #[test]
    fn other_msvc_error_codes_are_fatal() {
        let stderr = "foo.cxx(3): error C2065: undeclared identifier\n";
        assert!(parse_msvc_show_includes(stderr).is_err());
    }
}
