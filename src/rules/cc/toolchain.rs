//! The `Toolchain` collaborator: spawning, pipe plumbing, and argv
//! construction are explicitly out of scope (§1); this trait is the seam
//! between that collaborator and the in-scope state machines
//! ([`super::header_extractor`], [`super::modules`], [`super::compile`],
//! [`super::link`]) so they can be driven against
//! [`crate::testkit::fake_cc::FakeCompiler`] in tests without spawning a
//! real `cc1`/`clang`/`cl.exe`.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which compiler family's conventions a [`Toolchain`] speaks (§4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// GCC: `-M -MD -MG`, optional `-fdirectives-only`, module mapper.
    Gcc,
    /// Clang: `-M -MD -MG`, `-frewrite-includes`.
    Clang,
    /// MSVC: `/showIncludes` parsed from stderr.
    Msvc,
}

/// Errors a [`Toolchain`] call can fail with.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// The subprocess could not be spawned at all.
    #[error("failed to spawn {argv0}: {source}")]
    Spawn {
        /// `argv[0]` of the attempted spawn, for the §7 "Subprocess
        /// failure" diagnostic ("fatal naming argv[0]").
        argv0: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The subprocess exited non-zero.
    #[error("{argv0} exited with status {code}")]
    NonZeroExit {
        /// `argv[0]`.
        argv0: String,
        /// The process exit code.
        code: i32,
        /// Captured stderr, if any (propagated as the child's diagnostics
        /// per §7).
        stderr: String,
    },
}

/// A request to run a dependency-scanning pass (§4.6.1 step 2).
#[derive(Debug, Clone)]
pub struct PreprocessRequest {
    /// The translation unit being scanned.
    pub source: PathBuf,
    /// `true` if `-MG` (or the MSVC equivalent posture) should be passed
    /// this run, asking the compiler to emit the would-be name of a
    /// missing header rather than failing outright (§4.6.1 step 3).
    pub mg_mode: bool,
    /// Extra `-I`-style include search directories.
    pub include_dirs: Vec<PathBuf>,
    /// `true` if a GCC module mapper pipe should be wired up for this
    /// invocation (§4.6.1 "GCC module-mapper protocol").
    pub module_mapper: bool,
}

/// Raw captured subprocess output, before dialect-specific parsing.
#[derive(Debug, Clone, Default)]
pub struct RawProcessOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Process exit code.
    pub exit_code: i32,
    /// The preprocessed translation unit text, if this dialect/run
    /// produces one as a side effect reusable for the subsequent compile
    /// (§4.6.1: GCC `-fdirectives-only`, Clang `-frewrite-includes`).
    pub preprocessed: Option<String>,
}

/// A request to compile a (possibly already-preprocessed) translation
/// unit into an object file and/or BMI.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// The source path.
    pub source: PathBuf,
    /// The object/BMI output path.
    pub output: PathBuf,
    /// Reuse of a preprocessed unit from the dependency-scan pass, if the
    /// scan run produced no stderr (§4.6.1 "Diagnostics").
    pub preprocessed: Option<String>,
}

/// A request to run the linker.
#[derive(Debug, Clone)]
pub struct LinkRequest {
    /// The fully composed argv, or a reference to a response file if the
    /// Windows command-line-length threshold was exceeded (§4.7 step 5).
    pub argv: Vec<String>,
    /// A synthesized `@response` file, if one was written.
    pub response_file: Option<PathBuf>,
}

/// The collaborator seam between the in-scope compile/link state machines
/// and actual subprocess spawning (§9 design notes: "avoid async because
/// the compiler expects prompt, ordered replies" — implementations are
/// expected to run dependency-scan and module-mapper I/O on a dedicated
/// blocking thread per compiler process).
pub trait Toolchain: Send + Sync {
    /// Which dialect this toolchain speaks.
    fn dialect(&self) -> Dialect;

    /// The compiler-identity checksum to record on depdb line 2 (compiler
    /// identity guessing itself is out of scope, §1; this is the already-
    /// resolved value).
    fn compiler_checksum(&self) -> &str;

    /// Runs one dependency-scanning pass.
    fn run_preprocess(&self, req: &PreprocessRequest) -> Result<RawProcessOutput, ToolchainError>;

    /// Compiles a translation unit.
    fn compile(&self, req: &CompileRequest) -> Result<RawProcessOutput, ToolchainError>;

    /// Runs the linker.
    fn link(&self, req: &LinkRequest) -> Result<RawProcessOutput, ToolchainError>;
}

/// The outcome of a [`Toolchain::compile`] call, normalized from
/// [`RawProcessOutput`] (§4.6 step 9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Compilation succeeded.
    Ok,
    /// Compilation failed; diagnostics are the child's stderr.
    Failed {
        /// Captured diagnostics.
        diagnostics: String,
    },
}

/// The outcome of a [`Toolchain::link`] call (§4.7 "On perform_update").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Linking succeeded.
    Ok,
    /// Linking failed; diagnostics are the child's stderr.
    Failed {
        /// Captured diagnostics.
        diagnostics: String,
    },
}

/// Classifies a raw exit into the normalized outcome, propagating stderr
/// as the §7 "Subprocess failure" diagnostic.
#[must_use]
pub fn classify(raw: &RawProcessOutput) -> Result<(), String> {
    if raw.exit_code == 0 {
        Ok(())
    } else {
        Err(raw.stderr.clone())
    }
}

/// A real toolchain backed by [`std::process::Command`].
///
/// Argv construction beyond the bare input/output paths, and compiler
/// identity resolution, are out of scope (§1) and supplied by the caller
/// via `extra_args`.
pub struct NativeToolchain {
    dialect: Dialect,
    compiler: PathBuf,
    checksum: String,
    extra_args: Vec<String>,
}

impl NativeToolchain {
    /// Creates a native toolchain invoking `compiler` with `extra_args`
    /// appended to every invocation, identified by the already-resolved
    /// `checksum`.
    #[must_use]
    pub fn new(
        dialect: Dialect,
        compiler: impl Into<PathBuf>,
        checksum: impl Into<String>,
        extra_args: Vec<String>,
    ) -> Self {
        Self {
            dialect,
            compiler: compiler.into(),
            checksum: checksum.into(),
            extra_args,
        }
    }

    fn run(&self, args: &[String]) -> Result<RawProcessOutput, ToolchainError> {
        let argv0 = self.compiler.to_string_lossy().into_owned();
        let output = std::process::Command::new(&self.compiler)
            .args(&self.extra_args)
            .args(args)
            .output()
            .map_err(|source| ToolchainError::Spawn {
                argv0: argv0.clone(),
                source,
            })?;
        Ok(RawProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            preprocessed: None,
        })
    }
}

impl Toolchain for NativeToolchain {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn compiler_checksum(&self) -> &str {
        &self.checksum
    }

    fn run_preprocess(&self, req: &PreprocessRequest) -> Result<RawProcessOutput, ToolchainError> {
        let mut args = Vec::new();
        match self.dialect {
            Dialect::Gcc | Dialect::Clang => {
                args.push("-M".to_string());
                args.push("-MD".to_string());
                if req.mg_mode {
                    args.push("-MG".to_string());
                }
            }
            Dialect::Msvc => {
                args.push("/showIncludes".to_string());
                args.push("/Zs".to_string());
            }
        }
        for dir in &req.include_dirs {
            args.push(format!("-I{}", dir.display()));
        }
        args.push(req.source.to_string_lossy().into_owned());
        self.run(&args)
    }

    fn compile(&self, req: &CompileRequest) -> Result<RawProcessOutput, ToolchainError> {
        let args = vec![
            "-c".to_string(),
            req.source.to_string_lossy().into_owned(),
            "-o".to_string(),
            req.output.to_string_lossy().into_owned(),
        ];
        self.run(&args)
    }

    fn link(&self, req: &LinkRequest) -> Result<RawProcessOutput, ToolchainError> {
        self.run(&req.argv)
    }
}

/// Returns `true` if `path` should have symlinks realized before identity
/// comparison (§4.6.1 step 2a: "optionally realizes symlinks if and only
/// if the path contains `..`").
#[must_use]
pub fn should_realize_symlinks(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}
