//! Blocking mutex with ownership tracking and direct hand-off.
//!
//! The owner word is a single atomic, so the uncontended paths are one
//! compare-exchange. Contended acquirers queue FIFO and block; `unlock`
//! transfers ownership to the oldest waiter *before* waking it, so the
//! lock is never observably free while someone is queued and no acquirer
//! can barge past the queue.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::posix::Errno;
use crate::scheduler::{Pid, Scheduler, TaskId, TaskState};

use super::{block_until_granted, Waiter};

/// Owner word: 0 is unlocked, otherwise the owner's pid. Pids start at 1
/// and are never reused, so a task in a recycled arena slot cannot pass
/// for a dead owner.
const UNOWNED: usize = 0;

fn encode(id: TaskId) -> usize {
    id.pid() as usize
}

pub struct Mutex {
    owner: AtomicUsize,
    waiters: spin::Mutex<VecDeque<Arc<Waiter>>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(UNOWNED),
            waiters: spin::Mutex::new(VecDeque::new()),
        }
    }

    /// Acquire the mutex, blocking `me` until it is handed over.
    /// Re-acquiring a mutex the caller already holds is `EDEADLK`.
    pub fn lock(&self, sched: &Scheduler, me: TaskId) -> Result<(), Errno> {
        let claim = encode(me);
        if self
            .owner
            .compare_exchange(UNOWNED, claim, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(());
        }
        if self.owner.load(Ordering::Acquire) == claim {
            return Err(Errno::EDEADLK);
        }

        let waiter = {
            let mut waiters = self.waiters.lock();
            // The holder may have released while we took the queue lock;
            // retry under it so the release cannot slip between the check
            // and the enqueue.
            if self
                .owner
                .compare_exchange(UNOWNED, claim, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
            if self.owner.load(Ordering::Acquire) == claim {
                return Err(Errno::EDEADLK);
            }
            let waiter = Arc::new(Waiter::new(me));
            waiters.push_back(Arc::clone(&waiter));
            waiter
        };

        block_until_granted(sched, me, &waiter.granted, TaskState::Uninterruptible);
        // Ownership was transferred by the releaser before the grant.
        debug_assert_eq!(self.owner.load(Ordering::Acquire), claim);
        Ok(())
    }

    /// Acquire without blocking. A held mutex is `EBUSY`, except when the
    /// caller itself holds it, which stays `EDEADLK`.
    pub fn try_lock(&self, _sched: &Scheduler, me: TaskId) -> Result<(), Errno> {
        let claim = encode(me);
        match self
            .owner
            .compare_exchange(UNOWNED, claim, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) if current == claim => Err(Errno::EDEADLK),
            Err(_) => Err(Errno::EBUSY),
        }
    }

    /// Release the mutex. Only the owner may unlock; anyone else gets
    /// `EPERM`. With waiters queued, ownership moves to the oldest one.
    pub fn unlock(&self, sched: &Scheduler, me: TaskId) -> Result<(), Errno> {
        let claim = encode(me);
        if self.owner.load(Ordering::Acquire) != claim {
            return Err(Errno::EPERM);
        }
        // The pop and the owner transition stay under the waiters lock,
        // mirroring lock()'s enqueue-under-lock: a contender cannot slip
        // between an empty pop and the UNOWNED store and strand itself on
        // the queue. Hand-off order matters: the new owner must be
        // visible before the grant, the grant before the wakeup.
        let handoff = {
            let mut waiters = self.waiters.lock();
            match waiters.pop_front() {
                Some(waiter) => {
                    self.owner.store(encode(waiter.task), Ordering::Release);
                    waiter.granted.store(true, Ordering::Release);
                    Some(waiter.task)
                }
                None => {
                    self.owner.store(UNOWNED, Ordering::Release);
                    None
                }
            }
        };
        if let Some(task) = handoff {
            sched.wake_up(task);
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != UNOWNED
    }

    /// Current owner's pid, for diagnostics.
    pub fn owner_pid(&self) -> Option<Pid> {
        match self.owner.load(Ordering::Acquire) {
            UNOWNED => None,
            encoded => Some(encoded as Pid),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
