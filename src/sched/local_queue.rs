//! A worker's own end of its local work-stealing deque, backed by
//! `crossbeam-deque` (teacher's `runtime::scheduler::global_queue`/
//! `stealing` pattern, generalized with a local push/pop side).

use crossbeam_deque::{Steal, Stealer as CbStealer, Worker as CbWorker};

use super::task::Task;

/// The owning end of a per-worker deque: push/pop are only ever called
/// from the thread that owns this queue.
pub struct LocalQueue {
    inner: CbWorker<Task>,
}

impl LocalQueue {
    /// Creates an empty FIFO-ordered local queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: CbWorker::new_fifo(),
        }
    }

    /// Pushes a task onto this worker's own queue.
    pub fn push(&self, task: Task) {
        self.inner.push(task);
    }

    /// Pops the next task from this worker's own queue, if any.
    pub fn pop(&self) -> Option<Task> {
        self.inner.pop()
    }

    /// Returns a cloneable handle siblings can steal from.
    #[must_use]
    pub fn stealer(&self) -> Stealer {
        Stealer {
            inner: self.inner.stealer(),
        }
    }

    /// Number of tasks currently queued locally.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the local queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A sibling worker's stealer end, consulted by
/// [`super::stealing::steal_task`].
#[derive(Clone)]
pub struct Stealer {
    inner: CbStealer<Task>,
}

impl Stealer {
    /// Attempts to steal one task, retrying internally on a spurious
    /// contention failure and reporting only genuine emptiness to the
    /// caller.
    pub fn steal(&self) -> Option<Task> {
        loop {
            match self.inner.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::TaskContext;

    #[test]
    fn push_then_pop_is_fifo() {
        let q = LocalQueue::new();
        q.push(Task::new(TaskContext::default(), || {}));
        q.push(Task::new(TaskContext::default(), || {}));
        assert_eq!(q.len(), 2);
        assert!(q.pop().is_some());
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
    }

    #[test]
    fn stealer_observes_pushed_task() {
        let q = LocalQueue::new();
        q.push(Task::new(TaskContext::default(), || {}));
        let stealer = q.stealer();
        assert!(stealer.steal().is_some());
    }
}
