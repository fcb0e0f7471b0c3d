//! The worker pool (§4.1, §5): a fixed set of OS threads, each owning a
//! local work-stealing deque, draining a shared global injector queue and
//! stealing from siblings when their own queue runs dry. Tasks submitted
//! from inside a running task land on that worker's own local queue;
//! tasks submitted from any other thread (the initial root submissions)
//! land on the global queue.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::util::DetRng;

use super::global_queue::GlobalQueue;
use super::local_queue::{LocalQueue, Stealer};
use super::lock::LockRegistry;
use super::phase::PhaseController;
use super::stealing::steal_task;
use super::task::{self, Task, TaskId};

/// Tunables for a [`Scheduler`] instance (§2c: sourced from [`crate::Config`]).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Number of worker threads to run.
    pub jobs: usize,
    /// If `true`, a failed task does not stop workers processing unrelated
    /// already-queued tasks (§5, §7).
    pub keep_going: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { jobs: 1, keep_going: false }
    }
}

const IDLE_BACKOFF: Duration = Duration::from_micros(100);

struct Shared {
    global: GlobalQueue,
    stealers: Vec<Stealer>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    done: (Mutex<()>, Condvar),
    keep_going: bool,
    failed: Mutex<Option<crate::error::Error>>,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalQueue>> = const { RefCell::new(None) };
}

/// The scheduler: phase controller, lock registry, and worker pool
/// together drive match/execute (§4.1).
pub struct Scheduler {
    shared: Arc<Shared>,
    /// The process-wide phase controller (§4.1).
    pub phase: Arc<PhaseController>,
    /// The process-wide target-lock registry (§4.2).
    pub locks: Arc<LockRegistry>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Builds a scheduler with `config.jobs` worker threads already
    /// spawned and running.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let jobs = config.jobs.max(1);
        let locals: Vec<LocalQueue> = (0..jobs).map(|_| LocalQueue::new()).collect();
        let stealers: Vec<Stealer> = locals.iter().map(LocalQueue::stealer).collect();

        let shared = Arc::new(Shared {
            global: GlobalQueue::new(),
            stealers,
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            done: (Mutex::new(()), Condvar::new()),
            keep_going: config.keep_going,
            failed: Mutex::new(None),
        });

        let this = Arc::new(Self {
            shared: Arc::clone(&shared),
            phase: Arc::new(PhaseController::new()),
            locks: Arc::new(LockRegistry::new()),
            handles: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(jobs);
        for (idx, local) in locals.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("forgec-worker-{idx}"))
                    .spawn(move || worker_loop(idx, local, shared))
                    .expect("failed to spawn scheduler worker thread"),
            );
        }
        *this.handles.lock() = handles;
        this
    }

    /// Submits `body` to run on the scheduler. If the calling thread is
    /// itself a worker, the task lands on that worker's own local queue;
    /// otherwise it lands on the global injector queue.
    pub fn submit(&self, body: impl FnOnce() + Send + 'static) {
        let parent = task::current_context();
        let child = parent.derive_child(TaskId::next());
        let t = Task::new(child, body);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        let leftover = LOCAL.with(|l| match l.borrow().as_ref() {
            Some(q) => {
                q.push(t);
                None
            }
            None => Some(t),
        });
        if let Some(t) = leftover {
            self.shared.global.push(t);
        }
    }

    /// Records the first failure seen by any task, for [`Self::drain`] to
    /// surface once every submitted task has run (fail-fast unless
    /// `keep_going`, §5, §7).
    pub fn report_failure(&self, err: crate::error::Error) {
        let mut slot = self.shared.failed.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// `true` once a failure has been reported and `keep_going` is not
    /// set: callers should stop submitting new independent root work.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        !self.shared.keep_going && self.shared.failed.lock().is_some()
    }

    /// Blocks the calling thread until every submitted task (transitively,
    /// including tasks submitted by other tasks) has completed, then
    /// returns the first reported failure, if any.
    pub fn drain(&self) -> Result<(), crate::error::Error> {
        let (mutex, cv) = &self.shared.done;
        loop {
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                break;
            }
            let mut guard = mutex.lock();
            if self.shared.pending.load(Ordering::Acquire) != 0 {
                cv.wait_for(&mut guard, Duration::from_millis(20));
            }
        }
        match self.shared.failed.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(idx: usize, local: LocalQueue, shared: Arc<Shared>) {
    let mut rng = DetRng::new(idx as u64);
    LOCAL.with(|l| *l.borrow_mut() = Some(local));

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let next = LOCAL.with(|l| l.borrow().as_ref().and_then(LocalQueue::pop)).or_else(|| shared.global.pop()).or_else(|| {
            let siblings: Vec<Stealer> = shared.stealers.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, s)| s.clone()).collect();
            steal_task(&siblings, &mut rng)
        });

        match next {
            Some(t) => {
                t.run();
                if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let (mutex, cv) = &shared.done;
                    let _guard = mutex.lock();
                    cv.notify_all();
                }
            }
            None => {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(IDLE_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn submitted_tasks_all_run() {
        let scheduler = Scheduler::new(SchedulerConfig { jobs: 4, keep_going: false });
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            scheduler.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        scheduler.drain().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn nested_submissions_are_awaited_too() {
        let scheduler = Scheduler::new(SchedulerConfig { jobs: 2, keep_going: false });
        let counter = Arc::new(AtomicU32::new(0));
        let inner_counter = Arc::clone(&counter);
        let sched_for_task = Arc::clone(&scheduler);
        scheduler.submit(move || {
            inner_counter.fetch_add(1, Ordering::Relaxed);
            let c2 = Arc::clone(&inner_counter);
            sched_for_task.submit(move || {
                c2.fetch_add(1, Ordering::Relaxed);
            });
        });
        scheduler.drain().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn failure_is_surfaced_by_drain() {
        let scheduler = Scheduler::new(SchedulerConfig { jobs: 2, keep_going: false });
        let sched = Arc::clone(&scheduler);
        scheduler.submit(move || {
            sched.report_failure(crate::error::Error::new(crate::error::ErrorKind::Io, "boom"));
        });
        let err = scheduler.drain().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
