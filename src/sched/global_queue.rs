//! The global injector queue (§4.1): tasks submitted from a thread that
//! owns no local queue of its own (the initial root-target submissions
//! from the driver's calling thread) land here instead. Mirrors the
//! teacher's `runtime::scheduler::global_queue::GlobalQueue`, a thin
//! `SegQueue` wrapper.

use crossbeam_queue::SegQueue;

use super::task::Task;

/// A thread-safe unbounded queue for tasks with no home local queue.
#[derive(Default)]
pub struct GlobalQueue {
    inner: SegQueue<Task>,
}

impl GlobalQueue {
    /// Creates an empty global queue.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: SegQueue::new() }
    }

    /// Pushes a task.
    pub fn push(&self, task: Task) {
        self.inner.push(task);
    }

    /// Pops the next task, if any.
    pub fn pop(&self) -> Option<Task> {
        self.inner.pop()
    }

    /// Number of queued tasks. Racy under concurrent access; used only for
    /// diagnostics and tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::TaskContext;

    #[test]
    fn push_pop_roundtrip() {
        let q = GlobalQueue::new();
        assert!(q.is_empty());
        q.push(Task::new(TaskContext::default(), || {}));
        assert_eq!(q.len(), 1);
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
    }
}
