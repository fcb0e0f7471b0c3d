//! Process-wide phase exclusivity (§4.1, §9 glossary "Phase", Testable
//! Property 1): `load` is serial — at most one worker, no other phase
//! active; `match` and `execute` are parallel and may re-enter each other,
//! but switching away from whichever parallel phase is currently active
//! only completes once every worker that entered under the old phase has
//! left (a drain).

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One of the three process-wide phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Serial: loading the buildfile graph. At most one active worker.
    Load,
    /// Parallel: target matching. May re-enter `Execute`.
    Match,
    /// Parallel: recipe execution. May re-enter `Match`.
    Execute,
}

struct State {
    phase: Phase,
    active_workers: u32,
}

/// Coordinates phase exclusivity and phase switches.
pub struct PhaseController {
    state: Mutex<State>,
    drained: Condvar,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    /// Creates a controller starting in `Load` with no active workers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Load,
                active_workers: 0,
            }),
            drained: Condvar::new(),
        }
    }

    /// The current phase.
    #[must_use]
    pub fn current(&self) -> Phase {
        self.state.lock().phase
    }

    /// Enters `phase`, blocking until doing so is legal.
    ///
    /// A worker may join `phase` immediately if the process is already in
    /// `phase` (and, for `Load`, no other worker holds it — `Load` is
    /// strictly serial even with itself). Otherwise it must wait until the
    /// currently active phase has drained to zero active workers, at
    /// which point it switches the process into `phase` and proceeds.
    pub fn enter(&self, phase: Phase) -> PhaseGuard<'_> {
        let mut state = self.state.lock();
        loop {
            let can_join = state.phase == phase && (phase != Phase::Load || state.active_workers == 0);
            if can_join {
                break;
            }
            if state.active_workers == 0 {
                state.phase = phase;
                break;
            }
            self.drained.wait(&mut state);
        }
        state.active_workers += 1;
        PhaseGuard { controller: self }
    }

    /// Like [`Self::enter`] but gives up after `timeout` instead of
    /// waiting forever, returning `None`. Used by a worker that wants to
    /// help run other ready work while a phase switch is pending rather
    /// than blocking indefinitely.
    pub fn try_enter_for(&self, phase: Phase, timeout: Duration) -> Option<PhaseGuard<'_>> {
        let mut state = self.state.lock();
        loop {
            let can_join = state.phase == phase && (phase != Phase::Load || state.active_workers == 0);
            if can_join {
                break;
            }
            if state.active_workers == 0 {
                state.phase = phase;
                break;
            }
            let timed_out = self.drained.wait_for(&mut state, timeout).timed_out();
            if timed_out {
                return None;
            }
        }
        state.active_workers += 1;
        Some(PhaseGuard { controller: self })
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        state.active_workers -= 1;
        if state.active_workers == 0 {
            self.drained.notify_all();
        }
    }
}

/// An RAII guard marking one worker active in a phase; dropping it
/// signals drain waiters once the last active worker in that phase
/// leaves.
pub struct PhaseGuard<'a> {
    controller: &'a PhaseController,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.controller.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_load() {
        let pc = PhaseController::new();
        assert_eq!(pc.current(), Phase::Load);
    }

    #[test]
    fn load_is_serial_with_itself() {
        let pc = PhaseController::new();
        let guard = pc.enter(Phase::Load);
        let second = pc.try_enter_for(Phase::Load, Duration::from_millis(20));
        assert!(second.is_none());
        drop(guard);
        assert!(pc.try_enter_for(Phase::Load, Duration::from_millis(20)).is_some());
    }

    #[test]
    fn match_and_execute_can_both_be_active_in_sequence() {
        let pc = PhaseController::new();
        {
            let _g = pc.enter(Phase::Load);
        }
        let m = pc.enter(Phase::Match);
        assert_eq!(pc.current(), Phase::Match);
        drop(m);
        let e = pc.enter(Phase::Execute);
        assert_eq!(pc.current(), Phase::Execute);
        drop(e);
    }

    #[test]
    fn match_allows_multiple_concurrent_workers() {
        let pc = PhaseController::new();
        {
            let _g = pc.enter(Phase::Load);
        }
        let a = pc.enter(Phase::Match);
        let b = pc.try_enter_for(Phase::Match, Duration::from_millis(20));
        assert!(b.is_some());
        drop(a);
        drop(b);
    }
}
