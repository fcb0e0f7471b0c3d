//! Work-stealing policy (§4.1, §5 "reproducible under a fixed seed"):
//! a deterministic-RNG-seeded random start index scanned round-robin
//! across sibling stealers, closely modeled on the teacher's
//! `runtime::scheduler::stealing::steal_task`.

use crate::util::DetRng;

use super::local_queue::Stealer;
use super::task::Task;

/// Tries to steal a task from `stealers`, starting at a random index and
/// scanning round-robin through every sibling exactly once.
pub fn steal_task(stealers: &[Stealer], rng: &mut DetRng) -> Option<Task> {
    if stealers.is_empty() {
        return None;
    }
    let len = stealers.len();
    let start = rng.next_usize(len);
    for i in 0..len {
        let idx = (start + i) % len;
        if let Some(task) = stealers[idx].steal() {
            return Some(task);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::local_queue::LocalQueue;
    use crate::sched::task::TaskContext;

    #[test]
    fn steals_from_whichever_sibling_has_work() {
        let a = LocalQueue::new();
        let b = LocalQueue::new();
        b.push(Task::new(TaskContext::default(), || {}));

        let stealers = vec![a.stealer(), b.stealer()];
        let mut rng = DetRng::new(1);
        assert!(steal_task(&stealers, &mut rng).is_some());
    }

    #[test]
    fn empty_siblings_yield_nothing() {
        let mut rng = DetRng::new(1);
        assert!(steal_task(&[], &mut rng).is_none());
    }
}
