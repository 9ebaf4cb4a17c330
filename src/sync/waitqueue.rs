//! Condition wait queue.
//!
//! Entries carry a wake function and an exclusivity flag. Non-exclusive
//! entries sit at the head and are all woken; exclusive entries sit at the
//! tail and a wakeup consumes at most `nr_exclusive` of them, which is the
//! thundering-herd control of the original design. The wake function
//! decides whether the entry actually consumed the wakeup, so custom
//! wakers can filter.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::posix::Errno;
use crate::scheduler::{Scheduler, TaskId, TaskState};

/// Per-entry wake callback. Returns whether the wakeup took effect
/// (a woken task that was already runnable does not count).
pub type WakeFn = fn(sched: &Scheduler, entry: &WaitEntry) -> bool;

/// Wake the entry's task through the scheduler. The standard wake
/// function for plain sleepers.
pub fn default_wake_function(sched: &Scheduler, entry: &WaitEntry) -> bool {
    entry.triggered.store(true, Ordering::Release);
    sched.wake_up(entry.task)
}

/// One queued waiter.
pub struct WaitEntry {
    pub task: TaskId,
    /// Exclusive entries are woken one per wakeup, not en masse.
    pub exclusive: bool,
    pub func: WakeFn,
    /// Raised by the wake function; the sleeper's loop exit condition.
    pub triggered: AtomicBool,
}

pub struct WaitQueue {
    entries: spin::Mutex<VecDeque<Arc<WaitEntry>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            entries: spin::Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Queue an entry for `task`. Non-exclusive waiters go to the head,
    /// exclusive ones to the tail, so a partial wakeup reaches every
    /// non-exclusive waiter before it starts consuming exclusive ones.
    pub fn prepare_to_wait(&self, task: TaskId, exclusive: bool, func: WakeFn) -> Arc<WaitEntry> {
        let entry = Arc::new(WaitEntry {
            task,
            exclusive,
            func,
            triggered: AtomicBool::new(false),
        });
        let mut entries = self.entries.lock();
        if exclusive {
            entries.push_back(Arc::clone(&entry));
        } else {
            entries.push_front(Arc::clone(&entry));
        }
        entry
    }

    /// Remove an entry. Idempotent: removing an entry that was never
    /// queued, or was already removed, is a no-op.
    pub fn finish_wait(&self, entry: &Arc<WaitEntry>) {
        self.entries.lock().retain(|e| !Arc::ptr_eq(e, entry));
    }

    /// Wake the queue: every non-exclusive entry, plus up to
    /// `nr_exclusive` exclusive ones. An exclusive entry consumes budget
    /// once its `triggered` flag is up, whether or not the task needed a
    /// state change: a raised flag releases the sleeper's loop either
    /// way, so charging only "effective" wakes would let one wakeup
    /// release several exclusive waiters. The returned count is the
    /// number of actual state changes.
    pub fn wake_up(&self, sched: &Scheduler, nr_exclusive: usize) -> usize {
        // Snapshot so the wake functions run outside the queue lock.
        let snapshot: Vec<Arc<WaitEntry>> = self.entries.lock().iter().cloned().collect();
        let mut woken = 0;
        let mut budget = nr_exclusive;
        for entry in snapshot {
            if (entry.func)(sched, &entry) {
                woken += 1;
            }
            if entry.exclusive && entry.triggered.load(Ordering::Acquire) {
                budget = budget.saturating_sub(1);
                if budget == 0 {
                    break;
                }
            }
        }
        woken
    }

    /// Wake every waiter regardless of exclusivity.
    pub fn wake_up_all(&self, sched: &Scheduler) -> usize {
        self.wake_up(sched, usize::MAX)
    }

    /// Sleep `me` until `cond` holds. Uninterruptible.
    pub fn wait_event<F: Fn() -> bool>(&self, sched: &Scheduler, me: TaskId, cond: F) {
        let cpu = sched.task_cpu(me).unwrap_or(0);
        while !cond() {
            let entry = self.prepare_to_wait(me, false, default_wake_function);
            while !entry.triggered.load(Ordering::Acquire) && !cond() {
                sched.block_task(me, TaskState::Uninterruptible);
                sched.schedule(cpu);
                core::hint::spin_loop();
            }
            self.finish_wait(&entry);
        }
        sched.set_task_state(me, TaskState::Running);
    }

    /// Sleep `me` until `cond` holds or a signal arrives. A pending
    /// signal aborts the wait with `ERESTARTSYS`.
    pub fn wait_event_interruptible<F: Fn() -> bool>(
        &self,
        sched: &Scheduler,
        me: TaskId,
        cond: F,
    ) -> Result<(), Errno> {
        let cpu = sched.task_cpu(me).unwrap_or(0);
        while !cond() {
            if sched.signal_pending(me) {
                sched.set_task_state(me, TaskState::Running);
                return Err(Errno::ERESTARTSYS);
            }
            let entry = self.prepare_to_wait(me, false, default_wake_function);
            while !entry.triggered.load(Ordering::Acquire) && !cond() {
                if sched.signal_pending(me) {
                    break;
                }
                sched.block_task(me, TaskState::Interruptible);
                sched.schedule(cpu);
                core::hint::spin_loop();
            }
            self.finish_wait(&entry);
        }
        sched.set_task_state(me, TaskState::Running);
        Ok(())
    }

    /// `wait_event` with a deadline. Returns the ticks left on the clock
    /// when the condition came true (at least 1), or 0 on timeout.
    pub fn wait_event_timeout<F: Fn() -> bool>(
        &self,
        sched: &Scheduler,
        me: TaskId,
        cond: F,
        timeout: u64,
    ) -> u64 {
        let cpu = sched.task_cpu(me).unwrap_or(0);
        let deadline = sched.clock().now_ticks().saturating_add(timeout);
        loop {
            if cond() {
                sched.set_task_state(me, TaskState::Running);
                let now = sched.clock().now_ticks();
                return deadline.saturating_sub(now).max(1);
            }
            if sched.clock().now_ticks() >= deadline {
                sched.set_task_state(me, TaskState::Running);
                return 0;
            }
            let entry = self.prepare_to_wait(me, false, default_wake_function);
            while !entry.triggered.load(Ordering::Acquire)
                && !cond()
                && sched.clock().now_ticks() < deadline
            {
                sched.block_task(me, TaskState::Interruptible);
                sched.schedule(cpu);
                core::hint::spin_loop();
            }
            self.finish_wait(&entry);
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskFlags;
    use crate::time::ManualClock;

    fn nop(_arg: usize) {}

    fn fixture(n: usize) -> (Scheduler, Vec<TaskId>) {
        let sched = Scheduler::new(1, Arc::new(ManualClock::new()));
        let tasks = (0..n)
            .map(|_| sched.create_task("w", nop, TaskFlags::KTHREAD).unwrap())
            .collect();
        (sched, tasks)
    }

    #[test]
    fn nonexclusive_entries_wake_before_exclusive() {
        let (sched, tasks) = fixture(3);
        let wq = WaitQueue::new();

        // Queued in this order: e1 (exclusive), then e2 (non-exclusive).
        let e1 = wq.prepare_to_wait(tasks[0], true, default_wake_function);
        let e2 = wq.prepare_to_wait(tasks[1], false, default_wake_function);
        sched.block_task(tasks[0], TaskState::Interruptible);
        sched.block_task(tasks[1], TaskState::Interruptible);

        let woken = wq.wake_up(&sched, 1);
        assert_eq!(woken, 2);
        // Head-first walk: the non-exclusive entry went first.
        assert!(e2.triggered.load(Ordering::Acquire));
        assert!(e1.triggered.load(Ordering::Acquire));
    }

    #[test]
    fn exclusive_budget_limits_wakeups() {
        let (sched, tasks) = fixture(3);
        let wq = WaitQueue::new();
        let entries: Vec<_> = tasks
            .iter()
            .map(|&t| {
                sched.block_task(t, TaskState::Interruptible);
                wq.prepare_to_wait(t, true, default_wake_function)
            })
            .collect();

        assert_eq!(wq.wake_up(&sched, 1), 1);
        // FIFO among exclusive entries.
        assert!(entries[0].triggered.load(Ordering::Acquire));
        assert!(!entries[1].triggered.load(Ordering::Acquire));

        assert_eq!(wq.wake_up_all(&sched), 2);
        assert!(entries.iter().all(|e| e.triggered.load(Ordering::Acquire)));
    }

    #[test]
    fn one_wakeup_releases_exactly_one_exclusive_sleeper() {
        let (sched, tasks) = fixture(2);
        let wq = WaitQueue::new();
        let e1 = wq.prepare_to_wait(tasks[0], true, default_wake_function);
        let e2 = wq.prepare_to_wait(tasks[1], true, default_wake_function);
        sched.block_task(tasks[0], TaskState::Interruptible);
        sched.block_task(tasks[1], TaskState::Interruptible);
        sched.schedule(0);

        assert_eq!(wq.wake_up(&sched, 1), 1);
        assert!(e1.triggered.load(Ordering::Acquire));
        assert!(!e2.triggered.load(Ordering::Acquire));
        assert_eq!(sched.task_state(tasks[1]), Some(TaskState::Interruptible));
    }

    #[test]
    fn momentarily_running_waiter_still_consumes_budget() {
        let (sched, tasks) = fixture(2);
        let wq = WaitQueue::new();
        // First entry's task has not blocked yet. Its raised flag will
        // keep it from ever blocking, so it consumed the event and the
        // budget all the same; releasing the second one too would turn a
        // single wakeup into two.
        let e1 = wq.prepare_to_wait(tasks[0], true, default_wake_function);
        let e2 = wq.prepare_to_wait(tasks[1], true, default_wake_function);
        sched.block_task(tasks[1], TaskState::Interruptible);

        assert_eq!(wq.wake_up(&sched, 1), 0);
        assert!(e1.triggered.load(Ordering::Acquire));
        assert!(!e2.triggered.load(Ordering::Acquire));
    }

    #[test]
    fn finish_wait_is_idempotent() {
        let (_sched, tasks) = fixture(1);
        let wq = WaitQueue::new();
        let entry = wq.prepare_to_wait(tasks[0], false, default_wake_function);
        assert_eq!(wq.len(), 1);
        wq.finish_wait(&entry);
        wq.finish_wait(&entry);
        assert!(wq.is_empty());
    }

    #[test]
    fn wait_event_returns_immediately_when_condition_holds() {
        let (sched, tasks) = fixture(1);
        let wq = WaitQueue::new();
        wq.wait_event(&sched, tasks[0], || true);
        assert!(wq.is_empty());
    }

    #[test]
    fn pending_signal_aborts_interruptible_wait() {
        let (sched, tasks) = fixture(1);
        let wq = WaitQueue::new();
        sched.set_signal_pending(tasks[0], true);
        assert_eq!(
            wq.wait_event_interruptible(&sched, tasks[0], || false),
            Err(Errno::ERESTARTSYS)
        );
    }

    #[test]
    fn timeout_expires_against_the_clock() {
        let clock = Arc::new(ManualClock::auto(1));
        let sched = Scheduler::new(1, clock);
        let t = sched.create_task("t", nop, TaskFlags::KTHREAD).unwrap();
        let wq = WaitQueue::new();
        assert_eq!(wq.wait_event_timeout(&sched, t, || false, 50), 0);
    }

    #[test]
    fn satisfied_timeout_reports_remaining_ticks() {
        let (sched, tasks) = fixture(1);
        let wq = WaitQueue::new();
        let left = wq.wait_event_timeout(&sched, tasks[0], || true, 50);
        assert!(left >= 1);
    }
}
