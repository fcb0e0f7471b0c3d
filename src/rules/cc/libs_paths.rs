//! Shared-library on-disk naming and versioned symlink chains (§3 "Libs
//! paths", §4.7 step 3 & step 8, §8 scenario 4).

use std::path::{Path, PathBuf};

/// The target OS family a shared library is being named for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetOs {
    /// Linux/BSD: `.so`, `$ORIGIN`-relative rpaths.
    #[default]
    Linux,
    /// macOS: `.dylib`, `@loader_path`-relative rpaths, `@rpath` install
    /// names.
    MacOs,
    /// Windows: `.dll` plus a separate `.lib`/`.dll.a` import library.
    Windows,
}

/// A shared library's version string, e.g. `1.2.3`, split on `.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibVersion(pub String);

/// The full set of on-disk paths a versioned shared library occupies (§3
/// "Libs paths"): only `real` is mandatory, the rest are symlink (or copy,
/// on Windows) aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibsPaths {
    /// The unversioned name used at link time (`-lfoo`/`libfoo.so`).
    pub link: PathBuf,
    /// The name the dynamic loader searches for at runtime.
    pub load: PathBuf,
    /// The `DT_SONAME`-recorded name.
    pub soname: PathBuf,
    /// An intermediate major.minor alias.
    pub interim: Option<PathBuf>,
    /// The fully versioned real file.
    pub real: PathBuf,
    /// A glob pattern matching every versioned sibling of this library,
    /// for stale-symlink cleanup (§4.7 step 7).
    pub clean_load_pattern: String,
    /// A glob-ish pattern over just the version suffix, for
    /// version-aware cleanup without disturbing unrelated libraries.
    pub clean_version_pattern: String,
}

/// Derives the platform-specific basename parts: `bin.lib.prefix`
/// (`"lib"` on Linux/macOS, `""` on Windows) and extension.
#[must_use]
pub fn lib_prefix(os: TargetOs) -> &'static str {
    match os {
        TargetOs::Linux | TargetOs::MacOs => "lib",
        TargetOs::Windows => "",
    }
}

/// The shared-library extension for `os` (without the leading dot).
#[must_use]
pub fn shared_extension(os: TargetOs) -> &'static str {
    match os {
        TargetOs::Linux => "so",
        TargetOs::MacOs => "dylib",
        TargetOs::Windows => "dll",
    }
}

/// Computes the full [`LibsPaths`] for a shared library named `name`
/// (without prefix/extension) in `dir`, given an optional version string
/// (§8 scenario 4: `bin.lib.version={linux: 1.2.3}` on Linux yields the
/// real file `libfoo.so.1.2.3` with `libfoo.so.1`/`libfoo.so.1.2`/
/// `libfoo.so` symlinks).
#[must_use]
pub fn compute(dir: &Path, name: &str, os: TargetOs, version: Option<&LibVersion>) -> LibsPaths {
    let prefix = lib_prefix(os);
    let ext = shared_extension(os);
    let base = format!("{prefix}{name}.{ext}");
    let link = dir.join(&base);

    let Some(version) = version else {
        return LibsPaths {
            link: link.clone(),
            load: link.clone(),
            soname: link.clone(),
            interim: None,
            real: link,
            clean_load_pattern: format!("{base}.*"),
            clean_version_pattern: String::new(),
        };
    };

    let parts: Vec<&str> = version.0.split('.').collect();
    match os {
        TargetOs::MacOs => {
            // macOS conventionally versions the *stem*:
            // libfoo.1.2.3.dylib, libfoo.1.dylib (soname/load), libfoo.dylib (link).
            let major = parts.first().copied().unwrap_or("0");
            let real = dir.join(format!("{prefix}{name}.{}.{ext}", version.0));
            let soname = dir.join(format!("{prefix}{name}.{major}.{ext}"));
            LibsPaths {
                link: link.clone(),
                load: soname.clone(),
                soname: soname.clone(),
                interim: None,
                real,
                clean_load_pattern: format!("{prefix}{name}.*.{ext}"),
                clean_version_pattern: format!("{prefix}{name}.[0-9]*.{ext}"),
            }
        }
        _ => {
            // Linux/BSD: libfoo.so.1.2.3 (real), libfoo.so.1 (soname),
            // libfoo.so.1.2 (interim), libfoo.so (link).
            let real = dir.join(format!("{base}.{}", version.0));
            let major = parts.first().copied().unwrap_or("0");
            let soname = dir.join(format!("{base}.{major}"));
            let interim = if parts.len() > 2 {
                Some(dir.join(format!("{base}.{major}.{}", parts[1])))
            } else {
                None
            };
            LibsPaths {
                link: link.clone(),
                load: soname.clone(),
                soname,
                interim,
                real,
                clean_load_pattern: format!("{base}.[0-9]*"),
                clean_version_pattern: format!("{base}.{major}.*"),
            }
        }
    }
}

/// Returns every alias path that should point at `real`, outermost
/// (`link`) first, matching the chain order used for materialization
/// (§4.7 step 8: "`real ← interim ← soname ← load ← link`").
#[must_use]
pub fn alias_chain(paths: &LibsPaths) -> Vec<&Path> {
    let mut chain = vec![paths.link.as_path()];
    if paths.load != paths.link {
        chain.push(paths.load.as_path());
    }
    if paths.soname != paths.load {
        chain.push(paths.soname.as_path());
    }
    if let Some(interim) = &paths.interim {
        chain.push(interim.as_path());
    }
    chain
}

/// Rewrites an absolute rpath entry to be relocatable, per §4.7 step 3:
/// `$ORIGIN`-relative on Linux/BSD, `@loader_path`-relative on macOS.
/// Windows has no rpath concept and is passed through unchanged.
#[must_use]
pub fn relocatable_rpath(os: TargetOs, binary_dir: &Path, lib_dir: &Path) -> String {
    match os {
        TargetOs::Windows => lib_dir.display().to_string(),
        TargetOs::Linux | TargetOs::MacOs => {
            let token = if os == TargetOs::MacOs { "@loader_path" } else { "$ORIGIN" };
            match pathdiff(lib_dir, binary_dir) {
                Some(rel) if !rel.as_os_str().is_empty() => format!("{token}/{}", rel.display()),
                _ => token.to_string(),
            }
        }
    }
}

/// A minimal relative-path diff, sufficient for the common case of both
/// paths sharing a root.
fn pathdiff(target: &Path, base: &Path) -> Option<PathBuf> {
    let mut t = target.components();
    let mut b = base.components();
    loop {
        match (t.clone().next(), b.clone().next()) {
            (Some(tc), Some(bc)) if tc == bc => {
                t.next();
                b.next();
            }
            _ => break,
        }
    }
    let ups = b.count();
    let mut result = PathBuf::new();
    for _ in 0..ups {
        result.push("..");
    }
    for c in t {
        result.push(c.as_os_str());
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_version_chain_matches_scenario_4() {
        let paths = compute(
            Path::new("/out"),
            "foo",
            TargetOs::Linux,
            Some(&LibVersion("1.2.3".to_string())),
        );
        assert_eq!(paths.real, PathBuf::from("/out/libfoo.so.1.2.3"));
        assert_eq!(paths.soname, PathBuf::from("/out/libfoo.so.1"));
        assert_eq!(paths.interim, Some(PathBuf::from("/out/libfoo.so.1.2")));
        assert_eq!(paths.link, PathBuf::from("/out/libfoo.so"));
        assert_eq!(paths.clean_load_pattern, "libfoo.so.[0-9]*");
    }

    #[test]
    fn unversioned_library_has_a_single_real_path() {
        let paths = compute(Path::new("/out"), "foo", TargetOs::Linux, None);
        assert_eq!(paths.real, paths.link);
        assert!(paths.interim.is_none());
    }

    #[test]
    fn relocatable_rpath_uses_origin_on_linux() {
        let r = relocatable_rpath(TargetOs::Linux, Path::new("/out/bin"), Path::new("/out/lib"));
        assert_eq!(r, "$ORIGIN/../lib");
    }

    #[test]
    fn relocatable_rpath_same_dir_is_bare_token() {
        let r = relocatable_rpath(TargetOs::Linux, Path::new("/out/lib"), Path::new("/out/lib"));
        assert_eq!(r, "$ORIGIN");
    }
}
