//! The dependency-database (`depdb`) engine (§3 "depdb", §4.8).
//!
//! `depdb` is an append-line file colocated with a target as `<target>.d`.
//! It is not a general key-value cache: it is read and written strictly in
//! order, one logical line at a time, by the compile rule's `apply` (§4.6).
//! The contract is intentionally narrow:
//!
//! - [`Depdb::expect`] compares the next cached line against a freshly
//!   computed value. While they agree the db stays in *reading* mode and
//!   cursor advances. The first disagreement switches the db to *writing*
//!   mode and discards every cached line from that point on (§4.8: "The
//!   first mismatching line triggers re-derivation from that point; any
//!   subsequent valid lines are truncated").
//! - [`Depdb::read`] returns the next cached line verbatim (used by the
//!   header extractor to pull a cached header path without recomputing
//!   it, §4.6.1 step 1) and is only meaningful in reading mode.
//! - [`Depdb::write`] appends a freshly computed line once in writing mode.
//! - [`Depdb::close`] finalizes the file: in writing mode it rewrites the
//!   matched prefix plus every written line plus a terminating blank line;
//!   in reading mode (full cache hit) it leaves the file untouched unless
//!   `touch` is requested (§3: "Line... terminating blank line" / "a
//!   blank terminator distinguishes a clean close from an interrupted
//!   write").

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, ErrorKind, Result};

/// Whether a [`Depdb`] is still validating cached lines or has switched to
/// recording freshly computed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Comparing freshly computed lines against the cache.
    Reading,
    /// Recording newly computed lines; the cache is no longer consulted.
    Writing,
}

/// The outcome of [`Depdb::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// The freshly computed line equaled the cached one; the cursor
    /// advanced and the db is still (or remains) in reading mode.
    Matched,
    /// The freshly computed line disagreed with the cache (or there was no
    /// cached line left). The db has switched to writing mode; the caller
    /// must follow up with [`Depdb::write`] to record the corrected value.
    Mismatched {
        /// The cached value that was superseded, if one existed.
        old: Option<String>,
    },
}

impl ExpectOutcome {
    /// Returns `true` for [`Self::Matched`].
    #[must_use]
    pub const fn matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// A dependency-database handle opened for one compile target.
pub struct Depdb {
    path: PathBuf,
    mode: Mode,
    /// Cached lines read from disk at open, excluding the terminating
    /// blank line (or empty if the previous close was not clean).
    cached: Vec<String>,
    /// Read cursor into `cached`.
    cursor: usize,
    /// The finalized line sequence: matched prefix plus freshly written
    /// lines, accumulated as `expect`/`write` run.
    recorded: Vec<String>,
    /// The file's mtime at open, if it existed.
    mtime: Option<SystemTime>,
    /// Whether to bump the file's mtime on close even with no content
    /// change (§3: "`touch=true` updates the file mtime on close even if
    /// no content changed, used when re-validation succeeded but the
    /// compiler was invoked").
    touch: bool,
}

impl Depdb {
    /// Opens (or creates fresh) the depdb file at `path`.
    ///
    /// A missing file, or one whose previous close was not clean (no
    /// terminating blank line), opens with an empty cache: every
    /// subsequent `expect` call mismatches immediately, forcing a full
    /// re-derivation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (cached, mtime) = match fs::read_to_string(&path) {
            Ok(text) => {
                let mtime = fs::metadata(&path).ok().and_then(|m| m.modified().ok());
                (parse_clean_lines(&text), mtime)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), None),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            mode: Mode::Reading,
            cached,
            cursor: 0,
            recorded: Vec::new(),
            mtime,
            touch: false,
        })
    }

    /// The depdb file's mtime at open, or `None` if it did not exist.
    #[must_use]
    pub const fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Returns `true` if the db has switched to writing mode.
    #[must_use]
    pub const fn writing(&self) -> bool {
        matches!(self.mode, Mode::Writing)
    }

    /// Cached lines not yet consumed by `expect`/`read`, or `0` once the
    /// db has switched to writing mode. Lets a caller bound how many
    /// trailing cached lines a variable-length region (e.g. the header
    /// lines between the module-info line and the BMI-hash line) may
    /// drain, so it cannot run past lines it does not own.
    #[must_use]
    pub fn cached_remaining(&self) -> usize {
        if self.writing() {
            0
        } else {
            self.cached.len().saturating_sub(self.cursor)
        }
    }

    /// Requests that [`Self::close`] bump the file's mtime even if no
    /// content ultimately changes.
    pub fn request_touch(&mut self) {
        self.touch = true;
    }

    /// Compares `line` with the next cached line and advances, or switches
    /// to writing mode on the first disagreement (§4.8).
    pub fn expect(&mut self, line: impl Into<String>) -> ExpectOutcome {
        let line = line.into();
        if self.mode == Mode::Reading {
            let cached_line = self.cached.get(self.cursor).cloned();
            if cached_line.as_deref() == Some(line.as_str()) {
                self.cursor += 1;
                self.recorded.push(line);
                return ExpectOutcome::Matched;
            }
            self.mode = Mode::Writing;
            return ExpectOutcome::Mismatched { old: cached_line };
        }
        self.recorded.push(line);
        ExpectOutcome::Mismatched { old: None }
    }

    /// Returns the next cached line without comparison, or `None` if the
    /// db has switched to writing mode or the cache is exhausted.
    ///
    /// Used by the header extractor to pull a cached header path (§4.6.1
    /// step 1): the caller decides separately whether the file still
    /// exists and is not stale, and if so records it itself via
    /// [`Self::record_unchanged`] rather than [`Self::write`].
    pub fn read(&mut self) -> Option<String> {
        if self.mode == Mode::Writing {
            return None;
        }
        let line = self.cached.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(line)
    }

    /// Records a line that was read via [`Self::read`] and accepted
    /// unchanged (so it survives into the finalized sequence without
    /// forcing writing mode).
    pub fn record_unchanged(&mut self, line: impl Into<String>) {
        self.recorded.push(line.into());
    }

    /// Appends a freshly computed line. Valid only once the db is in
    /// writing mode.
    pub fn write(&mut self, line: impl Into<String>) {
        debug_assert!(self.writing(), "write() called while depdb is still in reading mode");
        self.recorded.push(line.into());
    }

    /// Forces the db into writing mode without a mismatch, e.g. when the
    /// caller already knows from other evidence (mtime, compiler
    /// checksum) that a rebuild is required (§4.6 step 4: "mismatch ⇒
    /// force update and invalidate downstream lines").
    pub fn force_writing(&mut self) {
        self.mode = Mode::Writing;
    }

    /// Finalizes the file: writes the recorded line sequence plus a
    /// terminating blank line if writing mode was ever entered; otherwise
    /// leaves the file untouched unless `touch` was requested.
    pub fn close(self) -> Result<()> {
        if self.mode == Mode::Writing {
            let mut text = String::new();
            for line in &self.recorded {
                text.push_str(line);
                text.push('\n');
            }
            text.push('\n');
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&self.path, text)?;
        } else if self.touch {
            let text = fs::read_to_string(&self.path).unwrap_or_default();
            fs::write(&self.path, text)?;
        }
        Ok(())
    }
}

/// Parses a depdb file's text into its cached line sequence, honoring the
/// "clean close" contract: only a file whose last line is blank (the
/// terminator) yields a usable cache; anything else (including an empty
/// file) is treated as an interrupted write and yields no cached lines.
fn parse_clean_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split('\n').collect();
    // `split` on a trailing '\n' leaves one empty trailing element; a
    // *clean* close has exactly one more than that (the real terminator).
    if lines.last() == Some(&"") {
        lines.pop();
    }
    if lines.last() != Some(&"") {
        return Vec::new();
    }
    lines.pop();
    lines.into_iter().map(str::to_owned).collect()
}

/// Verifies the chronology `depdb_mtime <= target_mtime <= now` (§4.8,
/// §7 "depdb skew"). `start` is the time the current action began, used
/// only to decide whether `now` itself looks skewed relative to the
/// action (a defensive check against a `now` read off a backwards clock).
pub fn check_mtime(
    start: SystemTime,
    depdb_mtime: SystemTime,
    target_mtime: SystemTime,
    now: SystemTime,
) -> Result<()> {
    if now < start {
        return Err(Error::new(
            ErrorKind::DepdbSkew,
            "system clock went backwards during this action",
        ));
    }
    if depdb_mtime > target_mtime {
        return Err(Error::new(
            ErrorKind::DepdbSkew,
            "depdb is newer than its target (filesystem clock skew)",
        ));
    }
    if target_mtime > now {
        return Err(Error::new(
            ErrorKind::DepdbSkew,
            "target mtime is in the future relative to the build clock",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_depdb(path: &Path, lines: &[&str]) {
        let mut text = String::new();
        for l in lines {
            text.push_str(l);
            text.push('\n');
        }
        text.push('\n');
        fs::write(path, text).unwrap();
    }

    #[test]
    fn round_trip_full_cache_hit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.o.d");
        write_depdb(&path, &["cxx.compile 4", "ccksum", "optsum", "/abs/foo.cxx", "tuhash", "", "/abs/bar.hxx"]);
        let before = fs::metadata(&path).unwrap().modified().unwrap();

        let mut db = Depdb::open(&path).unwrap();
        for l in ["cxx.compile 4", "ccksum", "optsum", "/abs/foo.cxx", "tuhash", ""] {
            assert!(db.expect(l).matched());
        }
        assert_eq!(db.read(), Some("/abs/bar.hxx".to_string()));
        db.record_unchanged("/abs/bar.hxx");
        assert!(!db.writing());
        db.close().unwrap();

        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn mismatch_switches_to_writing_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.o.d");
        write_depdb(&path, &["cxx.compile 4", "oldccksum", "optsum", "/abs/foo.cxx", "tuhash"]);

        let mut db = Depdb::open(&path).unwrap();
        assert!(db.expect("cxx.compile 4").matched());
        let outcome = db.expect("newccksum");
        assert_eq!(outcome, ExpectOutcome::Mismatched { old: Some("oldccksum".to_string()) });
        assert!(db.writing());
        db.write("newccksum");
        db.write("optsum2");
        db.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "cxx.compile 4\nnewccksum\noptsum2\n\n");
    }

    #[test]
    fn interrupted_write_has_no_usable_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.o.d");
        fs::write(&path, "cxx.compile 4\nccksum\n").unwrap(); // no blank terminator

        let mut db = Depdb::open(&path).unwrap();
        let outcome = db.expect("cxx.compile 4");
        assert_eq!(outcome, ExpectOutcome::Mismatched { old: None });
    }

    #[test]
    fn missing_file_has_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.o.d");
        let mut db = Depdb::open(&path).unwrap();
        assert_eq!(db.mtime(), None);
        assert_eq!(db.expect("cxx.compile 4"), ExpectOutcome::Mismatched { old: None });
    }

    #[test]
    fn touch_bumps_mtime_on_full_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.o.d");
        write_depdb(&path, &["cxx.compile 4"]);
        std::thread::sleep(Duration::from_millis(10));

        let mut db = Depdb::open(&path).unwrap();
        assert!(db.expect("cxx.compile 4").matched());
        db.request_touch();
        db.close().unwrap();
    }

    #[test]
    fn check_mtime_flags_depdb_newer_than_target() {
        let now = SystemTime::now();
        let target = now - Duration::from_secs(10);
        let depdb = now; // depdb newer than target: skew
        assert!(check_mtime(now - Duration::from_secs(20), depdb, target, now).is_err());
    }

    #[test]
    fn check_mtime_accepts_sane_chronology() {
        let now = SystemTime::now();
        let depdb = now - Duration::from_secs(5);
        let target = now - Duration::from_secs(1);
        assert!(check_mtime(now - Duration::from_secs(20), depdb, target, now).is_ok());
    }
}
