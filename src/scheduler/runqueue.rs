//! Per-CPU run queue.
//!
//! The run queue is an intrusive doubly-linked list threaded through the
//! task arena (`rq_next`/`rq_prev` indices), so insert and unlink are O(1).
//! Blocked and sleeping tasks stay linked; the pick loop skips anything
//! whose state is not `Running`. The idle task is never linked — it is the
//! permanent fallback held in `idle`.

use super::task::{TaskArena, TaskId};
use super::types::CpuId;

pub struct RunQueue {
    pub cpu: CpuId,
    /// Number of tasks currently linked into the list.
    pub nr_running: usize,
    /// Committed context switches on this CPU.
    pub nr_switches: u64,
    /// Tick timestamp of the last committed switch.
    pub clock_ts: u64,
    /// Task currently executing on this CPU. Always valid once initialized.
    pub curr: TaskId,
    /// Per-CPU idle task. Never absent, never in the list.
    pub idle: TaskId,
    head: Option<TaskId>,
    tail: Option<TaskId>,
}

impl RunQueue {
    pub fn new(cpu: CpuId, idle: TaskId) -> Self {
        Self {
            cpu,
            nr_running: 0,
            nr_switches: 0,
            clock_ts: 0,
            curr: idle,
            idle,
            head: None,
            tail: None,
        }
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskId> {
        self.tail
    }

    /// Link a task at the tail. The task must not be on any queue.
    pub fn enqueue_tail(&mut self, tasks: &mut TaskArena, id: TaskId) {
        debug_assert!(!tasks.get(id).map_or(false, |t| t.on_rq));
        let old_tail = self.tail;
        {
            let task = tasks.get_mut(id).expect("enqueue of a freed task");
            task.rq_prev = old_tail;
            task.rq_next = None;
            task.on_rq = true;
            task.cpu = self.cpu;
        }
        match old_tail {
            Some(tail) => tasks.get_mut(tail).expect("corrupt rq tail").rq_next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.nr_running += 1;
    }

    /// Link a task at the head.
    pub fn enqueue_head(&mut self, tasks: &mut TaskArena, id: TaskId) {
        debug_assert!(!tasks.get(id).map_or(false, |t| t.on_rq));
        let old_head = self.head;
        {
            let task = tasks.get_mut(id).expect("enqueue of a freed task");
            task.rq_next = old_head;
            task.rq_prev = None;
            task.on_rq = true;
            task.cpu = self.cpu;
        }
        match old_head {
            Some(head) => tasks.get_mut(head).expect("corrupt rq head").rq_prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.nr_running += 1;
    }

    /// Unlink a task. Idempotent: a task that is not linked is left alone.
    pub fn unlink(&mut self, tasks: &mut TaskArena, id: TaskId) {
        let (prev, next, linked) = match tasks.get(id) {
            Some(t) if t.on_rq => (t.rq_prev, t.rq_next, true),
            _ => (None, None, false),
        };
        if !linked {
            return;
        }
        match prev {
            Some(p) => tasks.get_mut(p).expect("corrupt rq link").rq_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => tasks.get_mut(n).expect("corrupt rq link").rq_prev = prev,
            None => self.tail = prev,
        }
        let task = tasks.get_mut(id).expect("unlink of a freed task");
        task.rq_next = None;
        task.rq_prev = None;
        task.on_rq = false;
        self.nr_running -= 1;
    }

    /// Move an already-linked task to the tail (round-robin rotation).
    pub fn requeue_tail(&mut self, tasks: &mut TaskArena, id: TaskId) {
        if tasks.get(id).map_or(false, |t| t.on_rq) {
            self.unlink(tasks, id);
            self.enqueue_tail(tasks, id);
        }
    }

    /// Successor of `id` in the list, wrapping to the head.
    pub fn next_circular(&self, tasks: &TaskArena, id: TaskId) -> Option<TaskId> {
        match tasks.get(id).and_then(|t| t.rq_next) {
            some @ Some(_) => some,
            None => self.head,
        }
    }

    /// Whether `id` is linked into this queue.
    pub fn contains(&self, tasks: &TaskArena, id: TaskId) -> bool {
        tasks.get(id).map_or(false, |t| t.on_rq && t.cpu == self.cpu)
    }

    /// Iterate the list from the head, bounded by `nr_running`.
    pub fn iter<'a>(&'a self, tasks: &'a TaskArena) -> RunQueueIter<'a> {
        RunQueueIter {
            tasks,
            cursor: self.head,
            remaining: self.nr_running,
        }
    }
}

pub struct RunQueueIter<'a> {
    tasks: &'a TaskArena,
    cursor: Option<TaskId>,
    remaining: usize,
}

impl<'a> Iterator for RunQueueIter<'a> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.cursor?;
        self.remaining -= 1;
        self.cursor = self.tasks.get(id).and_then(|t| t.rq_next);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::TaskFlags;

    fn nop(_arg: usize) {}

    fn setup() -> (TaskArena, RunQueue) {
        let mut arena = TaskArena::new();
        let idle = arena.insert("idle/0", nop, TaskFlags::IDLE).unwrap();
        (arena, RunQueue::new(0, idle))
    }

    #[test]
    fn nr_running_tracks_membership() {
        let (mut arena, mut rq) = setup();
        let a = arena.insert("a", nop, TaskFlags::KTHREAD).unwrap();
        let b = arena.insert("b", nop, TaskFlags::KTHREAD).unwrap();
        rq.enqueue_tail(&mut arena, a);
        rq.enqueue_tail(&mut arena, b);
        assert_eq!(rq.nr_running, 2);
        rq.unlink(&mut arena, a);
        assert_eq!(rq.nr_running, 1);
        // Removal is idempotent.
        rq.unlink(&mut arena, a);
        assert_eq!(rq.nr_running, 1);
    }

    #[test]
    fn head_insert_orders_before_tail_insert() {
        let (mut arena, mut rq) = setup();
        let a = arena.insert("a", nop, TaskFlags::KTHREAD).unwrap();
        let b = arena.insert("b", nop, TaskFlags::KTHREAD).unwrap();
        rq.enqueue_tail(&mut arena, a);
        rq.enqueue_head(&mut arena, b);
        let order: Vec<TaskId> = rq.iter(&arena).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn requeue_tail_rotates() {
        let (mut arena, mut rq) = setup();
        let a = arena.insert("a", nop, TaskFlags::KTHREAD).unwrap();
        let b = arena.insert("b", nop, TaskFlags::KTHREAD).unwrap();
        rq.enqueue_tail(&mut arena, a);
        rq.enqueue_tail(&mut arena, b);
        rq.requeue_tail(&mut arena, a);
        let order: Vec<TaskId> = rq.iter(&arena).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn circular_successor_wraps() {
        let (mut arena, mut rq) = setup();
        let a = arena.insert("a", nop, TaskFlags::KTHREAD).unwrap();
        let b = arena.insert("b", nop, TaskFlags::KTHREAD).unwrap();
        rq.enqueue_tail(&mut arena, a);
        rq.enqueue_tail(&mut arena, b);
        assert_eq!(rq.next_circular(&arena, a), Some(b));
        assert_eq!(rq.next_circular(&arena, b), Some(a));
    }
}
