//! Scheduler subsystem
//!
//! Strict-priority scheduler with per-CPU run queues. Real-time policies
//! (FIFO/RR/Deadline) always win the pick-next decision over time-shared
//! ones; peers of equal standing round-robin via a circular scan that
//! starts just after the current task. There is deliberately no starvation
//! protection for time-shared tasks under real-time load.
//!
//! ## Per-CPU Architecture
//!
//! - Each CPU owns a run queue (intrusive list over the task arena) and an
//!   idle task that is always eligible.
//! - Tasks move between queues only through the explicit migration
//!   operation, driven by affinity changes and the domain load balancer.
//! - Cross-CPU wakeups raise the target's need-resched flag and kick it
//!   through the reschedule-IPI hook.
//!
//! ## Module Organization
//!
//! - `types`: states, policies, priority constants, CPU masks, stats block
//! - `task`: the task entity and its slab arena
//! - `runqueue`: per-CPU intrusive run queue
//! - `priority`: priority derivation and slice rules
//! - `domain`: scheduler domains/groups and the boot-time layout
//! - `smp`: affinity, migration, load balancing
//! - `core`: the `Scheduler` context object and the pick-next loop
//! - `stats`: snapshot accessors

mod core;
mod domain;
mod priority;
mod runqueue;
mod smp;
mod stats;
mod task;
mod types;

// Re-export types for external use
pub use types::{CpuId, CpuMask, SchedPolicy, SchedulerStats, TaskFlags, TaskState};
pub use types::{DEFAULT_PRIO, DEFAULT_TIME_SLICE, FIFO_TIME_SLICE, MAX_CPUS, MAX_PRIO, MAX_TASKS, RR_TIME_SLICE, RT_BASE};

// Re-export the task entity surface
pub use task::{Pid, Task, TaskEntry, TaskId};

// Re-export priority helpers (used by the syscall layer for sched_setparam
// style validation)
pub use priority::{normal_prio, timeslice_for};

// Re-export the domain tables
pub use domain::{DomainId, DomainTable, GroupId, SchedDomain, SchedGroup, SdFlags, MAX_DOMAINS, MAX_GROUPS};

// Re-export the scheduler context object and its hooks
pub use self::core::{RescheduleHook, Scheduler};

// Re-export statistics surfaces
pub use stats::{PerCpuStats, TaskInfo};
