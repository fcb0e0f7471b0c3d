//! An in-process stand-in for GCC/Clang/MSVC (`testkit::fake_cc`, NEW
//! §2e), implementing [`Toolchain`] against scripted responses queued by
//! the test rather than a real spawned process.
//!
//! Each of the three [`Toolchain`] methods pulls the next response off
//! its own FIFO queue, recording the request it was called with so tests
//! can assert on what the header extractor, module resolver, or link
//! rule actually asked for. Calling a method with an empty queue is a
//! test-authoring bug, surfaced as a [`ToolchainError::Spawn`] rather
//! than a panic, so a misconfigured script fails the same way a real
//! compiler that can't be found would.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::rules::cc::toolchain::{
    CompileRequest, Dialect, LinkRequest, PreprocessRequest, RawProcessOutput, Toolchain, ToolchainError,
};

/// Builds a [`RawProcessOutput`] with exit code 0 and no preprocessed
/// text — the common case for a scripted success.
#[must_use]
pub fn ok_output(stdout: impl Into<String>) -> RawProcessOutput {
    RawProcessOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        exit_code: 0,
        preprocessed: None,
    }
}

/// Builds a [`RawProcessOutput`] representing a nonzero exit with
/// `stderr` as the captured diagnostics (§7 "Subprocess failure").
#[must_use]
pub fn failed_output(stderr: impl Into<String>) -> RawProcessOutput {
    RawProcessOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code: 1,
        preprocessed: None,
    }
}

/// A scripted, in-process [`Toolchain`] (NEW §2e).
pub struct FakeCompiler {
    dialect: Dialect,
    checksum: String,
    preprocess_responses: Mutex<VecDeque<RawProcessOutput>>,
    compile_responses: Mutex<VecDeque<RawProcessOutput>>,
    link_responses: Mutex<VecDeque<RawProcessOutput>>,
    preprocess_calls: Mutex<Vec<PreprocessRequest>>,
    compile_calls: Mutex<Vec<CompileRequest>>,
    link_calls: Mutex<Vec<LinkRequest>>,
}

impl FakeCompiler {
    /// Creates a fake toolchain speaking `dialect`, reporting
    /// `checksum` as its depdb compiler-identity line.
    #[must_use]
    pub fn new(dialect: Dialect, checksum: impl Into<String>) -> Self {
        Self {
            dialect,
            checksum: checksum.into(),
            preprocess_responses: Mutex::new(VecDeque::new()),
            compile_responses: Mutex::new(VecDeque::new()),
            link_responses: Mutex::new(VecDeque::new()),
            preprocess_calls: Mutex::new(Vec::new()),
            compile_calls: Mutex::new(Vec::new()),
            link_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the next [`Toolchain::run_preprocess`] response.
    pub fn script_preprocess(&self, output: RawProcessOutput) {
        self.preprocess_responses.lock().unwrap().push_back(output);
    }

    /// Queues the next [`Toolchain::compile`] response.
    pub fn script_compile(&self, output: RawProcessOutput) {
        self.compile_responses.lock().unwrap().push_back(output);
    }

    /// Queues the next [`Toolchain::link`] response.
    pub fn script_link(&self, output: RawProcessOutput) {
        self.link_responses.lock().unwrap().push_back(output);
    }

    /// Every [`PreprocessRequest`] received so far, in call order.
    #[must_use]
    pub fn preprocess_calls(&self) -> Vec<PreprocessRequest> {
        self.preprocess_calls.lock().unwrap().clone()
    }

    /// Every [`CompileRequest`] received so far, in call order.
    #[must_use]
    pub fn compile_calls(&self) -> Vec<CompileRequest> {
        self.compile_calls.lock().unwrap().clone()
    }

    /// Every [`LinkRequest`] received so far, in call order.
    #[must_use]
    pub fn link_calls(&self) -> Vec<LinkRequest> {
        self.link_calls.lock().unwrap().clone()
    }

    fn empty_queue_error(what: &str) -> ToolchainError {
        ToolchainError::Spawn {
            argv0: format!("fake-cc ({what})"),
            source: std::io::Error::other(format!("no scripted {what} response remains")),
        }
    }
}

impl Toolchain for FakeCompiler {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn compiler_checksum(&self) -> &str {
        &self.checksum
    }

    fn run_preprocess(&self, req: &PreprocessRequest) -> Result<RawProcessOutput, ToolchainError> {
        self.preprocess_calls.lock().unwrap().push(req.clone());
        self.preprocess_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::empty_queue_error("preprocess"))
    }

    fn compile(&self, req: &CompileRequest) -> Result<RawProcessOutput, ToolchainError> {
        self.compile_calls.lock().unwrap().push(req.clone());
        let output = self
            .compile_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::empty_queue_error("compile"))?;
        if output.exit_code == 0 {
            // A real compiler's main observable side effect is the output
            // file landing on disk; reproduce that so mtime-based
            // out-of-date checks against `req.output` see something real.
            if let Some(dir) = req.output.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let _ = std::fs::write(&req.output, b"");
        }
        Ok(output)
    }

    fn link(&self, req: &LinkRequest) -> Result<RawProcessOutput, ToolchainError> {
        self.link_calls.lock().unwrap().push(req.clone());
        self.link_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::empty_queue_error("link"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn run_preprocess_returns_scripted_response_in_fifo_order() {
        let fake = FakeCompiler::new(Dialect::Gcc, "ccksum");
        fake.script_preprocess(ok_output("foo.o: foo.cxx bar.hxx\n"));
        fake.script_preprocess(ok_output("foo.o: foo.cxx baz.hxx\n"));

        let req = PreprocessRequest {
            source: PathBuf::from("foo.cxx"),
            mg_mode: false,
            include_dirs: Vec::new(),
            module_mapper: false,
        };
        let first = fake.run_preprocess(&req).unwrap();
        assert!(first.stdout.contains("bar.hxx"));
        let second = fake.run_preprocess(&req).unwrap();
        assert!(second.stdout.contains("baz.hxx"));
        assert_eq!(fake.preprocess_calls().len(), 2);
    }

    #[test]
    fn exhausted_script_surfaces_as_spawn_error() {
        let fake = FakeCompiler::new(Dialect::Clang, "ccksum");
        let req = PreprocessRequest {
            source: PathBuf::from("foo.cxx"),
            mg_mode: false,
            include_dirs: Vec::new(),
            module_mapper: false,
        };
        let err = fake.run_preprocess(&req).unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }

    #[test]
    fn compiler_checksum_is_reported_verbatim() {
        let fake = FakeCompiler::new(Dialect::Msvc, "msvc-19.40");
        assert_eq!(fake.compiler_checksum(), "msvc-19.40");
        assert_eq!(fake.dialect(), Dialect::Msvc);
    }
}
