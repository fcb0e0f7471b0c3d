//! Process-wide configuration (NEW §2c).
//!
//! Loaded in increasing-precedence order: built-in defaults, an optional
//! `forgec.toml`, environment variables, then CLI flags (highest).

use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::error::{Error, ErrorKind, Result};

/// Which toolchain backend the compile/link rules should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeProfile {
    /// Spawn real compiler/linker subprocesses.
    #[default]
    Native,
    /// Drive the in-process [`crate::testkit::fake_cc::FakeCompiler`]
    /// instead, for deterministic tests.
    Lab,
}

/// Process-wide tunables for a single driver run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads. Defaults to available parallelism.
    pub jobs: usize,
    /// If `true`, independent subtrees continue after a failure (§5, §7).
    pub keep_going: bool,
    /// Number of successive no-progress forced-`-MG` passes tolerated
    /// before the header extractor reports "inconsistent compiler
    /// behavior" (§4.6.1). The default of `1` means the *second*
    /// no-progress pass is fatal, matching the spec's "equal skip-counts
    /// ⇒ fatal" wording.
    pub mg_oscillation_limit: usize,
    /// Windows link command-line length threshold before a response file
    /// is synthesized (§4.7 step 5).
    pub link_command_line_limit: usize,
    /// Which toolchain backend to drive.
    pub profile: RuntimeProfile,
    /// The root-scope `forwarded=true` variable (§4.9): when set, out-tree
    /// file targets with a `backlink` mode get mirrored back into the src
    /// tree after `update`.
    pub forwarded: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            keep_going: false,
            mg_oscillation_limit: 1,
            link_command_line_limit: 32_766,
            profile: RuntimeProfile::Native,
            forwarded: false,
        }
    }
}

impl Config {
    /// Loads configuration following the documented precedence chain.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = toml_path
            && path.exists()
        {
            let text = std::fs::read_to_string(path)?;
            cfg = toml::from_str(&text)
                .map_err(|e| Error::new(ErrorKind::Config, e.to_string()))?;
        }

        if let Ok(jobs) = env::var("FORGEC_JOBS") {
            cfg.jobs = jobs
                .parse()
                .map_err(|_| Error::new(ErrorKind::Config, "FORGEC_JOBS must be a positive integer"))?;
        }
        if let Ok(kg) = env::var("FORGEC_KEEP_GOING") {
            cfg.keep_going = kg == "1" || kg.eq_ignore_ascii_case("true");
        }
        if let Ok(fwd) = env::var("FORGEC_FORWARDED") {
            cfg.forwarded = fwd == "1" || fwd.eq_ignore_ascii_case("true");
        }

        if cfg.jobs == 0 {
            return Err(Error::new(ErrorKind::Config, "jobs must be >= 1"));
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_jobs_is_nonzero() {
        assert!(Config::default().jobs >= 1);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forgec.toml");
        std::fs::write(&path, "jobs = 4\nkeep_going = true\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.jobs, 4);
        assert!(cfg.keep_going);
    }

    #[test]
    fn rejects_zero_jobs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forgec.toml");
        std::fs::write(&path, "jobs = 0\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
