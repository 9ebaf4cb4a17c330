//! Counting semaphore.
//!
//! The count and the waiter queue live under one spinlock, so the
//! decrement-and-block decision is atomic. A negative count is the number
//! of blocked waiters; `post` on a negative count hands the unit straight
//! to the oldest waiter instead of raising the count past it.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::posix::Errno;
use crate::scheduler::{Scheduler, TaskId, TaskState};

use super::{block_until_granted, Waiter};

struct SemInner {
    value: i32,
    waiters: VecDeque<Arc<Waiter>>,
}

pub struct Semaphore {
    inner: spin::Mutex<SemInner>,
}

impl Semaphore {
    pub const fn new(value: i32) -> Self {
        Self {
            inner: spin::Mutex::new(SemInner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire one unit, blocking `me` when none is available.
    pub fn wait(&self, sched: &Scheduler, me: TaskId) {
        let waiter = {
            let mut inner = self.inner.lock();
            inner.value -= 1;
            if inner.value >= 0 {
                return;
            }
            let waiter = Arc::new(Waiter::new(me));
            inner.waiters.push_back(Arc::clone(&waiter));
            waiter
        };
        block_until_granted(sched, me, &waiter.granted, TaskState::Uninterruptible);
    }

    /// Acquire one unit without blocking; `EAGAIN` when none is available.
    pub fn try_wait(&self) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            Ok(())
        } else {
            Err(Errno::EAGAIN)
        }
    }

    /// Release one unit. With waiters blocked, the unit goes to the
    /// oldest one.
    pub fn post(&self, sched: &Scheduler) {
        let next = {
            let mut inner = self.inner.lock();
            inner.value += 1;
            if inner.value <= 0 {
                inner.waiters.pop_front()
            } else {
                None
            }
        };
        if let Some(waiter) = next {
            waiter.granted.store(true, core::sync::atomic::Ordering::Release);
            sched.wake_up(waiter.task);
        }
    }

    /// Current count. Negative values count blocked waiters.
    pub fn value(&self) -> i32 {
        self.inner.lock().value
    }
}
