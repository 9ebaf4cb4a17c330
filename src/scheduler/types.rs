//! Scheduler type definitions
//!
//! This module contains the type definitions shared by the scheduler
//! subsystem: task states and policies, priority constants, CPU ids and
//! affinity masks, and the statistics block.

use bitflags::bitflags;

/// Maximum number of CPUs the core addresses. Masks are a single word.
pub const MAX_CPUS: usize = 64;

/// CPU index, dense from 0. CPU 0 is the boot processor.
pub type CpuId = u16;

/// Maximum number of tasks in the arena. A full table is `ENOMEM`.
pub const MAX_TASKS: usize = 256;

/// Lowest numeric priority a caller may request (highest urgency is 0).
pub const MAX_PRIO: u8 = 99;

/// Default static priority assigned by `create_task`.
pub const DEFAULT_PRIO: u8 = 20;

/// Effective priorities >= RT_BASE belong to real-time policies.
pub const RT_BASE: u16 = 100;

/// Default time slice for time-shared policies, in ticks.
pub const DEFAULT_TIME_SLICE: u64 = 10;

/// Fixed time slice handed to `SCHED_RR` tasks, in ticks.
pub const RR_TIME_SLICE: u64 = 100;

/// `SCHED_FIFO` tasks run until they block or yield.
pub const FIFO_TIME_SLICE: u64 = u64::MAX;

/// State of a schedulable task.
///
/// `Running` means runnable: either executing on a CPU (`rq.curr`) or
/// eligible for selection. Blocked tasks stay linked on their run queue and
/// are skipped by the pick loop until woken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Interruptible,
    Uninterruptible,
    Stopped,
    Traced,
    Zombie,
    Dead,
}

/// Scheduling policy for a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedPolicy {
    Normal,   // Standard time-shared scheduling
    Fifo,     // Real-time, runs until it blocks or yields
    Rr,       // Real-time round-robin with a fixed slice
    Batch,    // Background batch processing
    Idle,     // Only runs when nothing else is ready
    Deadline, // Real-time, deadline driven
}

impl SchedPolicy {
    /// Decode the Linux ABI policy number. Unknown values are rejected
    /// here; past this boundary an invalid policy is unrepresentable.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(SchedPolicy::Normal),
            1 => Some(SchedPolicy::Fifo),
            2 => Some(SchedPolicy::Rr),
            3 => Some(SchedPolicy::Batch),
            5 => Some(SchedPolicy::Idle),
            6 => Some(SchedPolicy::Deadline),
            _ => None,
        }
    }

    /// Real-time policies always win the pick-next decision over
    /// time-shared ones.
    pub const fn is_realtime(self) -> bool {
        matches!(self, SchedPolicy::Fifo | SchedPolicy::Rr | SchedPolicy::Deadline)
    }
}

bitflags! {
    /// Flags accepted by `create_task`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// Kernel thread, never returns to user mode.
        const KTHREAD = 1 << 0;
        /// Per-CPU idle task; never enters a run-queue list.
        const IDLE    = 1 << 1;
    }
}

/// Affinity/online bitset over [`MAX_CPUS`] CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const fn empty() -> Self {
        CpuMask(0)
    }

    pub const fn all() -> Self {
        CpuMask(u64::MAX)
    }

    /// Mask with exactly one CPU set.
    pub const fn single(cpu: CpuId) -> Self {
        CpuMask(1 << cpu)
    }

    /// Mask covering CPUs `0..n`.
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_CPUS {
            CpuMask(u64::MAX)
        } else {
            CpuMask((1u64 << n) - 1)
        }
    }

    pub const fn from_bits(bits: u64) -> Self {
        CpuMask(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn set(&mut self, cpu: CpuId) {
        self.0 |= 1 << cpu;
    }

    pub fn clear(&mut self, cpu: CpuId) {
        self.0 &= !(1 << cpu);
    }

    pub const fn is_set(self, cpu: CpuId) -> bool {
        self.0 & (1 << cpu) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn and(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 & other.0)
    }

    pub const fn or(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 | other.0)
    }

    /// Iterate over the set CPU indices, lowest first.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS as u16).filter(move |&cpu| self.is_set(cpu))
    }

    /// Lowest set CPU, if any.
    pub fn first(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as CpuId)
        }
    }
}

/// Scheduler statistics snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub total_context_switches: u64,
    pub total_preemptions: u64,
    pub total_voluntary_switches: u64,
    pub rt_contentions: u64,
    pub rt_preemptions: u64,
    pub load_balance_count: u64,
    pub migration_count: u64,
}

impl SchedulerStats {
    pub const fn new() -> Self {
        Self {
            total_context_switches: 0,
            total_preemptions: 0,
            total_voluntary_switches: 0,
            rt_contentions: 0,
            rt_preemptions: 0,
            load_balance_count: 0,
            migration_count: 0,
        }
    }
}
