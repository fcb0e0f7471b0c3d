//! Crate-wide error type.
//!
//! Every `Result` that crosses a module boundary in this crate resolves to
//! [`Error`]. Leaf modules that need a richer `std::error::Error` (the
//! module resolver, the depdb engine, the rule registry) define their own
//! `thiserror`-derived error enum and convert into [`Error`] with `From`,
//! in the same shape as an ordinary error-kind wrapper.

use std::borrow::Cow;
use std::fmt;

use crate::graph::TargetId;

/// The kind of error, matching the §7 error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A dependency cycle was detected at target-lock acquisition.
    Cycle,
    /// No rule matched a target for the current action.
    NoMatchingRule,
    /// Two or more rules matched at the same priority.
    AmbiguousRule,
    /// A target already executed was re-locked with new match options.
    OptionsAfterExecute,
    /// The header extractor could not materialize a required header.
    MissingHeader,
    /// The module resolver could not bind an `import` to a BMI target.
    UnresolvedModule,
    /// depdb's mtime is newer than the target it describes after a build.
    DepdbSkew,
    /// Two consecutive forced-`-MG` passes made no progress.
    OscillatingMg,
    /// A spawned subprocess exited with a non-zero status.
    Subprocess,
    /// The composed link command line exceeded the platform limit.
    ///
    /// This variant exists to keep the taxonomy complete; per §7 it is
    /// handled (response file synthesis), never surfaced as a failure.
    CommandLineTooLong,
    /// An I/O operation failed.
    Io,
    /// Configuration was invalid or could not be loaded.
    Config,
}

impl ErrorKind {
    /// A short, stable label for structured logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::NoMatchingRule => "no-matching-rule",
            Self::AmbiguousRule => "ambiguous-rule",
            Self::OptionsAfterExecute => "options-after-execute",
            Self::MissingHeader => "missing-header",
            Self::UnresolvedModule => "unresolved-module",
            Self::DepdbSkew => "depdb-skew",
            Self::OscillatingMg => "oscillating-mg",
            Self::Subprocess => "subprocess",
            Self::CommandLineTooLong => "command-line-too-long",
            Self::Io => "io",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate-wide error type.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    target: Option<TargetId>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error of the given kind with a static or owned message.
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            target: None,
            source: None,
        }
    }

    /// Attaches the target this error concerns.
    #[must_use]
    pub const fn with_target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the target this error concerns, if any.
    #[must_use]
    pub const fn target(&self) -> Option<TargetId> {
        self.target
    }

    /// Convenience constructor for a dependency cycle.
    #[must_use]
    pub fn cycle(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Cycle, message)
    }

    /// Convenience constructor for rule ambiguity.
    #[must_use]
    pub fn ambiguous_rule(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::AmbiguousRule, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(t) = self.target {
            write!(f, " (target {t:?})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string()).with_source(e)
    }
}

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::Cycle, "a -> b -> a");
        let s = err.to_string();
        assert!(s.contains("cycle"));
        assert!(s.contains("a -> b -> a"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::other("boom");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
