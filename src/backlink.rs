//! Backlink machinery (§4.9): forwarded-project out-tree to src-tree
//! mirroring.
//!
//! A forwarded project (root-scope `forwarded=true`) builds into an
//! out-of-source tree but wants certain out-tree artifacts to also appear
//! next to the src-tree file that "naturally" produced them (a `.hxx`
//! that got regenerated by a code generator, a DLL a Windows executable
//! needs sitting alongside it to run in place). `update` creates that
//! link/copy for any out-tree file target whose `backlink` mode is one of
//! [`BacklinkMode`]'s non-`Group` variants; `Group` delegates to the
//! enclosing ad hoc group's own backlink instead of linking the member
//! directly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// How an out-tree file is mirrored back into the src tree (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BacklinkMode {
    /// Use the platform's preferred mechanism: a symlink on Unix, a copy
    /// on Windows (junctions are refused for DLL assemblies, §4.9).
    True,
    /// Force a symbolic link.
    Symbolic,
    /// Force a hard link.
    Hard,
    /// Force a byte copy.
    Copy,
    /// Like `True`, but replace a pre-existing, non-matching entry rather
    /// than failing.
    Overwrite,
    /// Not a link target of its own: inherit the enclosing ad hoc group's
    /// backlink (e.g. a per-member default rolled into a `dlls/{}`
    /// assembly directory).
    Group,
}

impl BacklinkMode {
    /// Resolves `self` to the mode that actually performs a link,
    /// substituting `group_mode` for [`Self::Group`] and the platform
    /// default for [`Self::True`] (§4.9: "each member's backlink mode is
    /// inherited from the group unless overridden").
    #[must_use]
    pub const fn resolve(self, group_mode: Option<Self>) -> Self {
        match self {
            Self::Group => match group_mode {
                Some(m) => m,
                None => Self::True,
            },
            other => other,
        }
    }
}

/// The platform a backlink is being materialized for, since `True`'s
/// default mechanism and junction refusal are platform-specific (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetPlatform {
    /// POSIX: symlinks are cheap and the natural default for `True`.
    #[default]
    Posix,
    /// Windows: symlinks require elevated privileges in the common case,
    /// and junctions cannot stand in for a DLL assembly directory, so
    /// `True` degrades to a copy.
    Windows,
}

/// What a completed backlink actually did, for logging/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklinkAction {
    /// A fresh link/copy was created.
    Created,
    /// An existing link/copy already pointed at the right place; nothing
    /// was done.
    AlreadyCurrent,
    /// An existing, non-matching entry was replaced (`Overwrite` only).
    Replaced,
}

/// Maps an out-tree path to its corresponding src-tree path by replacing
/// the project's `out_root` prefix with `src_root`.
///
/// This is the backlink subsystem's own, narrower notion of the src/out
/// split than the header extractor's `-I`-pair remap (§4.6.1 step 2a):
/// backlink only ever needs "the src path this out-tree path mirrors",
/// never header-unit or auto-generated-header classification.
#[derive(Debug, Clone)]
pub struct OutSrcLayout {
    out_root: PathBuf,
    src_root: PathBuf,
}

impl OutSrcLayout {
    /// Creates a layout mapping paths under `out_root` to the
    /// corresponding path under `src_root`.
    #[must_use]
    pub fn new(out_root: impl Into<PathBuf>, src_root: impl Into<PathBuf>) -> Self {
        Self {
            out_root: out_root.into(),
            src_root: src_root.into(),
        }
    }

    /// Returns the src-tree counterpart of `out_path`, or `None` if
    /// `out_path` does not live under this layout's `out_root`.
    #[must_use]
    pub fn src_path_for(&self, out_path: &Path) -> Option<PathBuf> {
        let rel = out_path.strip_prefix(&self.out_root).ok()?;
        Some(self.src_root.join(rel))
    }
}

/// Performs (or verifies) the backlink from `out_path` to `src_path` per
/// `mode`, already resolved via [`BacklinkMode::resolve`] (never `Group`).
///
/// # Errors
///
/// Returns [`ErrorKind::Io`] if the filesystem operation fails, or if
/// `mode` is [`BacklinkMode::Group`] (a caller bug: the group delegation
/// must be resolved before calling this).
pub fn create_backlink(
    out_path: &Path,
    src_path: &Path,
    mode: BacklinkMode,
    platform: TargetPlatform,
) -> Result<BacklinkAction> {
    if mode == BacklinkMode::Group {
        return Err(Error::new(
            ErrorKind::Io,
            "BacklinkMode::Group must be resolved via BacklinkMode::resolve before linking",
        ));
    }

    if let Some(parent) = src_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if already_current(out_path, src_path, mode, platform)? {
        return Ok(BacklinkAction::AlreadyCurrent);
    }

    let existed = src_path.symlink_metadata().is_ok();
    if existed {
        if mode != BacklinkMode::Overwrite {
            return Err(Error::new(
                ErrorKind::Io,
                format!(
                    "backlink target '{}' already exists and does not match (use overwrite)",
                    src_path.display()
                ),
            ));
        }
        remove_existing(src_path)?;
    }

    link_or_copy(out_path, src_path, mode, platform)?;
    Ok(if existed {
        BacklinkAction::Replaced
    } else {
        BacklinkAction::Created
    })
}

fn already_current(out_path: &Path, src_path: &Path, mode: BacklinkMode, platform: TargetPlatform) -> Result<bool> {
    let Ok(meta) = src_path.symlink_metadata() else {
        return Ok(false);
    };
    match effective_mechanism(mode, platform) {
        Mechanism::Symlink => Ok(meta.file_type().is_symlink()
            && fs::read_link(src_path).ok().as_deref() == Some(out_path)),
        Mechanism::Hardlink => {
            let (Ok(a), Ok(b)) = (fs::metadata(src_path), fs::metadata(out_path)) else {
                return Ok(false);
            };
            Ok(same_file(&a, &b))
        }
        Mechanism::Copy => {
            if meta.file_type().is_symlink() {
                return Ok(false);
            }
            Ok(fs::read(src_path).ok() == fs::read(out_path).ok())
        }
    }
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.ino() == b.ino() && a.dev() == b.dev()
}

#[cfg(not(unix))]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

fn remove_existing(path: &Path) -> io::Result<()> {
    let meta = path.symlink_metadata()?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mechanism {
    Symlink,
    Hardlink,
    Copy,
}

/// Resolves `True`/`Overwrite` to the platform default (symlink on
/// POSIX, copy on Windows, §4.9), leaving an explicit mode as-is.
fn effective_mechanism(mode: BacklinkMode, platform: TargetPlatform) -> Mechanism {
    match mode {
        BacklinkMode::Symbolic => Mechanism::Symlink,
        BacklinkMode::Hard => Mechanism::Hardlink,
        BacklinkMode::Copy => Mechanism::Copy,
        BacklinkMode::True | BacklinkMode::Overwrite => match platform {
            TargetPlatform::Posix => Mechanism::Symlink,
            TargetPlatform::Windows => Mechanism::Copy,
        },
        BacklinkMode::Group => unreachable!("resolved by the caller"),
    }
}

fn link_or_copy(out_path: &Path, src_path: &Path, mode: BacklinkMode, platform: TargetPlatform) -> Result<()> {
    match effective_mechanism(mode, platform) {
        Mechanism::Symlink => make_symlink(out_path, src_path),
        Mechanism::Hardlink => fs::hard_link(out_path, src_path).map_err(Into::into),
        Mechanism::Copy => fs::copy(out_path, src_path).map(|_| ()).map_err(Into::into),
    }
}

#[cfg(unix)]
fn make_symlink(out_path: &Path, src_path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(out_path, src_path).map_err(Into::into)
}

#[cfg(windows)]
fn make_symlink(out_path: &Path, src_path: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(out_path, src_path).map_err(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(out_path: &Path, src_path: &Path) -> Result<()> {
    fs::copy(out_path, src_path).map(|_| ()).map_err(Into::into)
}

/// Synthesizes the ad hoc `fsdir{…dlls/}` member for Windows `bin.rpath`
/// auto-assembly (§4.9: "explicit `bin.rpath` auto-assembly on Windows is
/// represented by an `fsdir{…dlls/}` ad hoc member that is copy-linked,
/// Windows refuses junctions as DLL assemblies").
///
/// Returns the directory's path and the forced mode every member placed
/// under it must use, regardless of its own declared mode.
#[must_use]
pub fn windows_dll_assembly_dir(exe_dir: &Path) -> (PathBuf, BacklinkMode) {
    (exe_dir.join("dlls"), BacklinkMode::Copy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_mode_resolves_to_the_group_s_mode() {
        assert_eq!(BacklinkMode::Group.resolve(Some(BacklinkMode::Hard)), BacklinkMode::Hard);
    }

    #[test]
    fn group_mode_with_no_group_falls_back_to_true() {
        assert_eq!(BacklinkMode::Group.resolve(None), BacklinkMode::True);
    }

    #[test]
    fn non_group_mode_is_unaffected_by_resolve() {
        assert_eq!(BacklinkMode::Hard.resolve(Some(BacklinkMode::Copy)), BacklinkMode::Hard);
    }

    #[test]
    fn layout_maps_out_path_to_src_path() {
        let layout = OutSrcLayout::new("/proj/out", "/proj/src");
        let out_path = Path::new("/proj/out/sub/gen.hxx");
        assert_eq!(layout.src_path_for(out_path), Some(PathBuf::from("/proj/src/sub/gen.hxx")));
    }

    #[test]
    fn layout_returns_none_for_paths_outside_out_root() {
        let layout = OutSrcLayout::new("/proj/out", "/proj/src");
        assert_eq!(layout.src_path_for(Path::new("/elsewhere/x")), None);
    }

    #[test]
    #[cfg(unix)]
    fn symbolic_backlink_creates_a_symlink_pointing_at_the_out_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out").join("gen.hxx");
        let src_path = dir.path().join("src").join("gen.hxx");
        fs::create_dir_all(out_path.parent().unwrap()).unwrap();
        fs::write(&out_path, b"content").unwrap();

        let action = create_backlink(&out_path, &src_path, BacklinkMode::Symbolic, TargetPlatform::Posix).unwrap();
        assert_eq!(action, BacklinkAction::Created);
        assert!(src_path.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&src_path).unwrap(), out_path);
    }

    #[test]
    #[cfg(unix)]
    fn repeating_a_symbolic_backlink_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out").join("gen.hxx");
        let src_path = dir.path().join("src").join("gen.hxx");
        fs::create_dir_all(out_path.parent().unwrap()).unwrap();
        fs::write(&out_path, b"content").unwrap();

        create_backlink(&out_path, &src_path, BacklinkMode::Symbolic, TargetPlatform::Posix).unwrap();
        let second = create_backlink(&out_path, &src_path, BacklinkMode::Symbolic, TargetPlatform::Posix).unwrap();
        assert_eq!(second, BacklinkAction::AlreadyCurrent);
    }

    #[test]
    #[cfg(unix)]
    fn copy_backlink_without_overwrite_fails_on_existing_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out").join("gen.hxx");
        let src_path = dir.path().join("src").join("gen.hxx");
        fs::create_dir_all(out_path.parent().unwrap()).unwrap();
        fs::write(&out_path, b"new content").unwrap();
        fs::create_dir_all(src_path.parent().unwrap()).unwrap();
        fs::write(&src_path, b"stale content").unwrap();

        let err = create_backlink(&out_path, &src_path, BacklinkMode::Copy, TargetPlatform::Posix).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    #[cfg(unix)]
    fn overwrite_backlink_replaces_a_stale_copy() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out").join("gen.hxx");
        let src_path = dir.path().join("src").join("gen.hxx");
        fs::create_dir_all(out_path.parent().unwrap()).unwrap();
        fs::write(&out_path, b"new content").unwrap();
        fs::create_dir_all(src_path.parent().unwrap()).unwrap();
        fs::write(&src_path, b"stale content").unwrap();

        let action = create_backlink(&out_path, &src_path, BacklinkMode::Overwrite, TargetPlatform::Posix).unwrap();
        assert_eq!(action, BacklinkAction::Replaced);
        assert!(src_path.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn windows_dll_assembly_dir_forces_copy_mode() {
        let (dir, mode) = windows_dll_assembly_dir(Path::new("/proj/out/exe"));
        assert_eq!(dir, PathBuf::from("/proj/out/exe/dlls"));
        assert_eq!(mode, BacklinkMode::Copy);
    }
}
