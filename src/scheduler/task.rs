//! Task entity and arena.
//!
//! Tasks live in a fixed-capacity slab arena; the slab key is the stable
//! [`TaskId`] handle every scheduler operation is written against. The
//! run-queue and hierarchy links are arena indices, giving the intrusive
//! doubly-linked lists of the original design without raw-pointer aliasing.

use alloc::string::String;
use slab::Slab;

use crate::posix::Errno;

use super::types::{CpuId, CpuMask, SchedPolicy, TaskFlags, TaskState, MAX_TASKS};
use super::types::{DEFAULT_PRIO, DEFAULT_TIME_SLICE};

/// Process/thread identifier, monotonically assigned and never reused.
pub type Pid = u32;

/// Stable handle to a task: the arena slot paired with the owning pid.
/// Slots are recycled after a task dies; the pid check on every lookup
/// keeps a stale handle from reaching whatever task inherits the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) slot: usize,
    pub(crate) pid: Pid,
}

impl TaskId {
    pub const fn index(self) -> usize {
        self.slot
    }

    pub const fn pid(self) -> Pid {
        self.pid
    }
}

/// Entry point of a kernel task.
pub type TaskEntry = fn(arg: usize);

/// One schedulable thread of execution.
pub struct Task {
    pub pid: Pid,
    pub name: String,
    pub state: TaskState,
    pub policy: SchedPolicy,
    pub flags: TaskFlags,

    /// Static priority as requested, clamped to [0, MAX_PRIO].
    pub static_prio: u8,
    /// Priority derived from (policy, static_prio).
    pub normal_prio: u16,
    /// Effective priority used for selection. Always equals `normal_prio`.
    pub prio: u16,

    /// Remaining time slice in ticks.
    pub time_slice: u64,
    /// Absolute tick at which a timed sleep expires. `None` whenever the
    /// task is not in a timed sleep; a task blocked on a primitive waits
    /// for an explicit wakeup, not for the clock.
    pub wake_time: Option<u64>,
    /// Total ticks of CPU time consumed.
    pub sum_exec_runtime: u64,
    /// Tick at which the task last went on CPU.
    pub last_ran: u64,
    pub preempt_count: u64,
    pub voluntary_switches: u64,

    /// CPUs this task may run on.
    pub affinity: CpuMask,
    /// Run queue the task is assigned to.
    pub cpu: CpuId,
    /// Whether the task is the `curr` of its CPU.
    pub on_cpu: bool,

    pub entry: TaskEntry,
    pub entry_arg: usize,
    pub exit_code: i32,
    pub signal_pending: bool,

    // Run-queue list linkage (arena indices).
    pub(crate) rq_next: Option<TaskId>,
    pub(crate) rq_prev: Option<TaskId>,
    pub(crate) on_rq: bool,

    // Process hierarchy linkage.
    pub parent: Option<TaskId>,
    pub first_child: Option<TaskId>,
    pub sibling: Option<TaskId>,
}

impl Task {
    pub(crate) fn new(pid: Pid, name: &str, entry: TaskEntry, flags: TaskFlags) -> Self {
        Self {
            pid,
            name: String::from(name),
            state: TaskState::Running,
            policy: SchedPolicy::Normal,
            flags,
            static_prio: DEFAULT_PRIO,
            normal_prio: DEFAULT_PRIO as u16,
            prio: DEFAULT_PRIO as u16,
            time_slice: DEFAULT_TIME_SLICE,
            wake_time: None,
            sum_exec_runtime: 0,
            last_ran: 0,
            preempt_count: 0,
            voluntary_switches: 0,
            affinity: CpuMask::all(),
            cpu: 0,
            on_cpu: false,
            entry,
            entry_arg: 0,
            exit_code: 0,
            signal_pending: false,
            rq_next: None,
            rq_prev: None,
            on_rq: false,
            parent: None,
            first_child: None,
            sibling: None,
        }
    }

    /// Runnable and eligible for selection.
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// Fixed-capacity task storage. Slab keys are stable for the lifetime of
/// the task, so they double as the handle identity.
pub struct TaskArena {
    slots: Slab<Task>,
    next_pid: Pid,
}

impl TaskArena {
    pub fn new() -> Self {
        Self {
            slots: Slab::with_capacity(MAX_TASKS),
            next_pid: 1,
        }
    }

    /// Allocate a task slot. A full table is an allocation failure the
    /// caller must treat as a hard error.
    pub fn insert(&mut self, name: &str, entry: TaskEntry, flags: TaskFlags) -> Result<TaskId, Errno> {
        if self.slots.len() >= MAX_TASKS {
            return Err(Errno::ENOMEM);
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        let key = self.slots.insert(Task::new(pid, name, entry, flags));
        Ok(TaskId { slot: key, pid })
    }

    /// Release a Dead task's slot. A stale handle (recycled slot) is a
    /// no-op, like every other lookup.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        if self.slots.get(id.slot)?.pid != id.pid {
            return None;
        }
        self.slots.try_remove(id.slot)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.slots.get(id.slot).filter(|t| t.pid == id.pid)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.slots.get_mut(id.slot).filter(|t| t.pid == id.pid)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.slots.iter().map(|(k, t)| (TaskId { slot: k, pid: t.pid }, t))
    }
}

impl Default for TaskArena {
    fn default() -> Self {
        Self::new()
    }
}
