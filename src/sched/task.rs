//! Scheduler tasks (§4.1, §9 "Task"): a unit of work bundled with the
//! diagnostic-frame stack and target-lock chain it was submitted under, so
//! a worker that picks it up — possibly via work-stealing, on a different
//! thread than the submitter — observes the same cycle-detection and
//! diagnostic-attribution context the submitter would have if it had run
//! the work inline.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::diag::DiagFrame;
use crate::graph::TargetId;

/// A stable handle to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocates a fresh, process-unique task id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id, for tests.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

/// Per-task captured state carried across a work-stealing boundary.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// This task's own id.
    pub task: Option<TaskId>,
    /// The diagnostic-frame stack active when the task was created.
    pub diag: DiagFrame,
    /// The chain of targets the submitting task's own ancestry currently
    /// holds locked, consulted by [`super::lock::LockRegistry::acquire`]
    /// for cycle detection (§4.2).
    pub lock_chain: Vec<TargetId>,
}

impl TaskContext {
    /// Creates a fresh, empty context for a root task (no ancestor).
    #[must_use]
    pub fn root(task: TaskId) -> Self {
        Self {
            task: Some(task),
            diag: DiagFrame::new(),
            lock_chain: Vec::new(),
        }
    }

    /// Derives a child context for a task submitted while this context is
    /// active: the diag frame and lock chain are inherited so the child
    /// observes the same cycle-detection view its parent would (§4.1).
    #[must_use]
    pub fn derive_child(&self, task: TaskId) -> Self {
        Self {
            task: Some(task),
            diag: self.diag.clone(),
            lock_chain: self.lock_chain.clone(),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<TaskContext>> = const { RefCell::new(None) };
}

/// Runs `f` with `ctx` installed as the calling thread's current task
/// context, restoring whatever was there before on return.
pub fn with_context<R>(ctx: TaskContext, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|c| c.replace(Some(ctx)));
    let result = f();
    CURRENT.with(|c| *c.borrow_mut() = previous);
    result
}

/// Returns a clone of the calling thread's current task context, or a
/// fresh root context if none is active (e.g. the driver's own thread
/// before the first task is submitted).
#[must_use]
pub fn current_context() -> TaskContext {
    CURRENT.with(|c| c.borrow().clone().unwrap_or_else(|| TaskContext::root(TaskId::next())))
}

/// Pushes `frame` onto the calling thread's active diag stack, if any task
/// context is installed.
pub fn push_diag_frame(frame: impl Into<String>) {
    CURRENT.with(|c| {
        if let Some(ctx) = c.borrow_mut().as_mut() {
            ctx.diag.push(frame);
        }
    });
}

/// Pops the most recently pushed diag frame.
pub fn pop_diag_frame() {
    CURRENT.with(|c| {
        if let Some(ctx) = c.borrow_mut().as_mut() {
            ctx.diag.pop();
        }
    });
}

/// Pushes `target` onto the calling thread's active lock chain, for the
/// duration of holding that target's lock.
pub fn push_lock(target: TargetId) {
    CURRENT.with(|c| {
        if let Some(ctx) = c.borrow_mut().as_mut() {
            ctx.lock_chain.push(target);
        }
    });
}

/// Pops the most recently pushed lock-chain entry.
pub fn pop_lock() {
    CURRENT.with(|c| {
        if let Some(ctx) = c.borrow_mut().as_mut() {
            ctx.lock_chain.pop();
        }
    });
}

/// A unit of scheduled work: the closure to run plus the context it
/// carries across a possible thread hop.
pub struct Task {
    /// The task's id.
    pub id: TaskId,
    /// The captured context (diag frames, lock chain) it runs under.
    pub context: TaskContext,
    body: Box<dyn FnOnce() + Send>,
}

impl Task {
    /// Creates a task running `body` under `context`.
    pub fn new(context: TaskContext, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: context.task.unwrap_or_else(TaskId::next),
            context,
            body: Box::new(body),
        }
    }

    /// Runs the task's body with its context installed.
    pub fn run(self) {
        let ctx = self.context;
        with_context(ctx, self.body);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_distinct() {
        assert_ne!(TaskId::next(), TaskId::next());
    }

    #[test]
    fn child_context_inherits_diag_and_lock_chain() {
        let mut root = TaskContext::root(TaskId::next());
        root.diag.push("match exe{app}");
        root.lock_chain.push(TargetId::from_raw(1));

        let child = root.derive_child(TaskId::next());
        assert_eq!(child.diag.trace(), "match exe{app}");
        assert_eq!(child.lock_chain, vec![TargetId::from_raw(1)]);
        assert_ne!(child.task, root.task);
    }

    #[test]
    fn with_context_installs_and_restores() {
        assert!(current_context().diag.is_empty());
        let ctx = TaskContext::root(TaskId::next());
        with_context(ctx, || {
            push_diag_frame("inside");
            assert_eq!(current_context().diag.trace(), "inside");
        });
        assert!(current_context().diag.is_empty());
    }
}
