//! Target-lock acquisition and dependency-cycle detection (§4.2).
//!
//! Acquiring a target for match or execute is a CAS on its `opstate` task
//! count ([`Opstate::try_lock`]). When the CAS fails because the target is
//! already `Busy`, the caller must decide between two outcomes: the
//! contested target is reachable, through the chain of who-is-waiting-for-
//! whom, from a target the calling task's own ancestry already holds (a
//! cycle) — or it genuinely belongs to an unrelated, eventually-finishing
//! holder, in which case the caller suspends without holding any phase
//! lock so phase switches can still proceed (§4.2).

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::graph::{Opstate, TargetId};
use crate::types::Offset;
use crate::util::det_hash::DetHashMap;

use super::task::TaskId;

/// The outcome of a successful [`LockRegistry::acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was freshly acquired (CASed from the requested offset to
    /// `Busy`).
    Acquired,
    /// The target was already at or past the requested offset; no lock
    /// was taken and the caller has nothing further to do this phase.
    AlreadyAt(Offset),
}

/// Tracks, process-wide, which task holds each busy target and which
/// target each task is currently blocked waiting on, so a cycle can be
/// detected by walking the wait-for chain instead of blocking forever
/// (§4.2, Testable Property 3).
#[derive(Default)]
pub struct LockRegistry {
    holders: Mutex<DetHashMap<TargetId, TaskId>>,
    waiting_for: Mutex<DetHashMap<TaskId, TargetId>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire `target` for `task`, moving its `opstate` from
    /// `from` to `Busy`. Suspends the calling thread, without holding the
    /// phase lock, until either the lock is acquired or a cycle involving
    /// `task`'s own lock chain is detected.
    pub fn acquire(&self, opstate: &Opstate, target: TargetId, from: Offset, task: TaskId, lock_chain: &[TargetId]) -> Result<LockOutcome> {
        loop {
            match opstate.try_lock(from) {
                Ok(()) => {
                    self.holders.lock().insert(target, task);
                    return Ok(LockOutcome::Acquired);
                }
                Err(Offset::Busy) => {
                    if let Some(chain) = self.detect_cycle(target, lock_chain) {
                        return Err(Error::cycle(format_cycle(&chain)));
                    }
                    self.waiting_for.lock().insert(task, target);
                    let observed = opstate.wait_while_busy();
                    self.waiting_for.lock().remove(&task);
                    if observed != Offset::Busy {
                        return Ok(LockOutcome::AlreadyAt(observed));
                    }
                    // A different waiter's release raced with our wake;
                    // the target is busy again under a new holder. Retry.
                }
                Err(actual) => return Ok(LockOutcome::AlreadyAt(actual)),
            }
        }
    }

    /// Blocks the calling task until `target`'s `opstate` leaves `Busy`,
    /// without attempting to acquire it. Used by callers that have
    /// observed `Busy` but have not yet decided which offset they would
    /// claim to move from, so they still need cycle-safe suspension
    /// (§4.2) before re-reading the target's state.
    pub fn wait_for_release(&self, opstate: &Opstate, target: TargetId, task: TaskId, lock_chain: &[TargetId]) -> Result<Offset> {
        loop {
            let observed = opstate.offset();
            if observed != Offset::Busy {
                return Ok(observed);
            }
            if let Some(chain) = self.detect_cycle(target, lock_chain) {
                return Err(Error::cycle(format_cycle(&chain)));
            }
            self.waiting_for.lock().insert(task, target);
            let observed = opstate.wait_while_busy();
            self.waiting_for.lock().remove(&task);
            if observed != Offset::Busy {
                return Ok(observed);
            }
        }
    }

    /// Releases a previously acquired lock's holder record. Does not
    /// itself touch the target's `opstate`; the caller still calls
    /// [`Opstate::unlock_to`] separately.
    pub fn release(&self, target: TargetId) {
        self.holders.lock().remove(&target);
    }

    /// Walks the wait-for chain starting from `target`'s current holder;
    /// if it ever reaches a target already in `lock_chain` (one the
    /// calling task's own ancestry holds), or loops back to `target`
    /// itself, a cycle exists.
    fn detect_cycle(&self, target: TargetId, lock_chain: &[TargetId]) -> Option<Vec<TargetId>> {
        if lock_chain.contains(&target) {
            return Some(vec![target]);
        }
        let holders = self.holders.lock();
        let waiting = self.waiting_for.lock();
        let mut chain = vec![target];
        let mut cur = target;
        let bound = holders.len() + waiting.len() + 1;
        for _ in 0..bound {
            let Some(&holder_task) = holders.get(&cur) else {
                return None;
            };
            let Some(&waited_on) = waiting.get(&holder_task) else {
                return None;
            };
            chain.push(waited_on);
            if lock_chain.contains(&waited_on) || waited_on == target {
                return Some(chain);
            }
            cur = waited_on;
        }
        None
    }
}

fn format_cycle(chain: &[TargetId]) -> String {
    let parts: Vec<String> = chain.iter().map(|t| format!("{t:?}")).collect();
    format!("dependency cycle detected: {}", parts.join(" -> "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_fresh_target() {
        let reg = LockRegistry::new();
        let op = Opstate::new();
        let outcome = reg.acquire(&op, TargetId::from_raw(0), Offset::Tried, TaskId::from_raw(1), &[]).unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
    }

    #[test]
    fn already_advanced_target_reports_offset_without_locking() {
        let reg = LockRegistry::new();
        let op = Opstate::new();
        op.try_lock(Offset::Tried).unwrap();
        op.unlock_to(Offset::Matched);
        let outcome = reg.acquire(&op, TargetId::from_raw(0), Offset::Tried, TaskId::from_raw(1), &[]).unwrap();
        assert_eq!(outcome, LockOutcome::AlreadyAt(Offset::Matched));
    }

    #[test]
    fn self_reachable_contested_target_is_a_cycle() {
        let reg = LockRegistry::new();
        let op = Opstate::new();
        op.try_lock(Offset::Tried).unwrap();
        let target = TargetId::from_raw(5);
        let lock_chain = vec![target];
        let err = reg.acquire(&op, target, Offset::Tried, TaskId::from_raw(9), &lock_chain).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cycle);
    }
}
