//! Diagnostics data model (NEW §2a).
//!
//! A [`Diag`] is a structured record, not formatted text — turning it into
//! terminal output is the (out-of-scope, §1) diagnostics-formatting
//! collaborator's job. Each worker task carries a [`DiagFrame`] stack so a
//! diagnostic raised deep in a recursive `apply` call can be re-attributed
//! to the task ultimately responsible for it, mirroring the teacher's
//! `observability::context` trace-context propagation.

use crate::graph::TargetId;
use crate::observability::LogLevel;

/// A single structured diagnostic record.
#[derive(Debug, Clone)]
pub struct Diag {
    /// Severity.
    pub level: LogLevel,
    /// Human-readable (but not yet formatted-for-a-terminal) message.
    pub message: String,
    /// The target this diagnostic concerns, if any.
    pub target: Option<TargetId>,
}

impl Diag {
    /// Creates a new diagnostic.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            target: None,
        }
    }

    /// Attaches a target.
    #[must_use]
    pub const fn with_target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }
}

/// A per-task stack of "what am I doing" frames, captured at task
/// submission time and restored by the worker that runs the task — even
/// if work-stealing moves the task to a different thread — so diagnostics
/// and cycle detection behave as though the task ran inline on the
/// submitter (§4.1).
#[derive(Debug, Clone, Default)]
pub struct DiagFrame {
    frames: Vec<String>,
}

impl DiagFrame {
    /// Creates an empty frame stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a description of the operation now being entered (e.g.
    /// `"match obj{foo}"`).
    pub fn push(&mut self, frame: impl Into<String>) {
        self.frames.push(frame.into());
    }

    /// Pops the most recently pushed frame.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Renders the frame stack as a `->`-joined trace, outermost first.
    #[must_use]
    pub fn trace(&self) -> String {
        self.frames.join(" -> ")
    }

    /// Returns `true` if no frames are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_joins_frames_in_push_order() {
        let mut f = DiagFrame::new();
        f.push("match exe{app}");
        f.push("match obj{main}");
        assert_eq!(f.trace(), "match exe{app} -> match obj{main}");
        f.pop();
        assert_eq!(f.trace(), "match exe{app}");
    }
}
