//! Action: the `(meta_operation, operation)` pair that drives a pass (§3).

use std::fmt;

/// Identifies a meta-operation (`perform`, `configure`, `dist`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaOperationId(pub u16);

/// Identifies an operation (`update`, `clean`, `test`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub u16);

impl MetaOperationId {
    /// The `perform` meta-operation, the default driving ordinary builds.
    pub const PERFORM: Self = Self(0);
    /// The `configure` meta-operation.
    pub const CONFIGURE: Self = Self(1);
    /// The `dist` meta-operation.
    pub const DIST: Self = Self(2);
}

impl OperationId {
    /// The `update` operation.
    pub const UPDATE: Self = Self(0);
    /// The `clean` operation.
    pub const CLEAN: Self = Self(1);
    /// The `test` operation.
    pub const TEST: Self = Self(2);
    /// A wildcard operation entry, used as a fallback carrier in the rule
    /// map (§4.3 step 4).
    pub const WILDCARD: Self = Self(u16::MAX);
}

/// An action: the pair driving rule selection and recipe execution.
///
/// `inner` is the action whose recipe actually runs (e.g. the `update`
/// inner of the `test` outer action runs `update`'s recipe to bring the
/// test executable up to date before invoking it); `outer` participates in
/// rule selection so a target can customize behavior per outer operation
/// without changing what gets executed (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    /// The meta-operation.
    pub meta_operation: MetaOperationId,
    /// The outer operation driving rule selection.
    pub outer: OperationId,
    /// The inner operation whose recipe the scheduler runs.
    pub inner: OperationId,
}

impl Action {
    /// Creates an action where `inner == outer` (the common case: a plain
    /// `update` or `clean` action with no operation nesting).
    #[must_use]
    pub const fn simple(meta_operation: MetaOperationId, operation: OperationId) -> Self {
        Self {
            meta_operation,
            outer: operation,
            inner: operation,
        }
    }

    /// Creates an action with distinct inner/outer operations (e.g. `test`
    /// outer driving an `update` inner).
    #[must_use]
    pub const fn nested(
        meta_operation: MetaOperationId,
        outer: OperationId,
        inner: OperationId,
    ) -> Self {
        Self {
            meta_operation,
            outer,
            inner,
        }
    }

    /// Returns `true` if this meta-operation should fall back to
    /// `perform`'s rules when the target has no custom rule for it (§4.3
    /// step 6: `configure` and `dist` inherit from `perform`).
    #[must_use]
    pub const fn inherits_from_perform(self) -> bool {
        matches!(
            self.meta_operation,
            MetaOperationId::CONFIGURE | MetaOperationId::DIST
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner == self.outer {
            write!(f, "({:?},{:?})", self.meta_operation, self.outer)
        } else {
            write!(
                f,
                "({:?},{:?}/{:?})",
                self.meta_operation, self.outer, self.inner
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_action_has_equal_inner_outer() {
        let a = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        assert_eq!(a.inner, a.outer);
    }

    #[test]
    fn configure_inherits_from_perform() {
        let a = Action::simple(MetaOperationId::CONFIGURE, OperationId::UPDATE);
        assert!(a.inherits_from_perform());
        let b = Action::simple(MetaOperationId::PERFORM, OperationId::UPDATE);
        assert!(!b.inherits_from_perform());
    }
}
