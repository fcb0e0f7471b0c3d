//! Phase & scheduler machinery (§4.1, §4.2, §5).

pub mod global_queue;
pub mod lock;
pub mod local_queue;
pub mod phase;
pub mod scheduler;
pub mod stealing;
pub mod task;

pub use global_queue::GlobalQueue;
pub use lock::{LockOutcome, LockRegistry};
pub use phase::{Phase, PhaseController};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{TaskContext, TaskId};
