//! Blocking synchronization primitives.
//!
//! Mutex, semaphore and wait queue, built directly on the scheduler's
//! block/wake paths. None of them spin on the protected resource: a
//! contended acquirer transitions to a blocked state, stays linked on its
//! run queue where the pick loop skips it, and is handed the resource by
//! the releaser before being woken. Hand-off is strictly FIFO, so no
//! acquirer can barge past an older waiter.
//!
//! ## Module Organization
//!
//! - `mutex`: ownership-checked blocking mutex with direct hand-off
//! - `semaphore`: counting semaphore
//! - `waitqueue`: condition wait queue with exclusive/non-exclusive
//!   entries and custom wake functions

mod mutex;
mod semaphore;
mod waitqueue;

pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use waitqueue::{default_wake_function, WaitEntry, WaitQueue, WakeFn};

use core::sync::atomic::{AtomicBool, Ordering};

use crate::scheduler::{Scheduler, TaskId, TaskState};

/// One blocked acquirer, shared between the sleeper and the releaser that
/// will grant it the resource.
pub(crate) struct Waiter {
    pub(crate) task: TaskId,
    /// Set by the releaser once the resource belongs to this waiter.
    pub(crate) granted: AtomicBool,
}

impl Waiter {
    pub(crate) fn new(task: TaskId) -> Self {
        Self {
            task,
            granted: AtomicBool::new(false),
        }
    }
}

/// Park `me` until `granted` is raised. The task blocks in `state` and
/// yields the CPU through `schedule()` on every pass, so the queue keeps
/// running other work while this one waits.
pub(crate) fn block_until_granted(
    sched: &Scheduler,
    me: TaskId,
    granted: &AtomicBool,
    state: TaskState,
) {
    let cpu = sched.task_cpu(me).unwrap_or(0);
    while !granted.load(Ordering::Acquire) {
        sched.block_task(me, state);
        // Recheck after blocking: the grant may have raced the transition.
        if granted.load(Ordering::Acquire) {
            break;
        }
        sched.schedule(cpu);
        core::hint::spin_loop();
    }
    sched.set_task_state(me, TaskState::Running);
}
