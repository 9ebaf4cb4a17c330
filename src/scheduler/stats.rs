//! Statistics and introspection.
//!
//! Snapshot accessors over the scheduler state, used by diagnostics
//! surfaces (the `ps`/load reporting paths of the surrounding kernel) and
//! by the test suites.

use alloc::string::String;
use alloc::vec::Vec;

use super::core::Scheduler;
use super::task::{Pid, TaskId};
use super::types::{CpuId, SchedPolicy, SchedulerStats, TaskState};

/// Point-in-time description of one task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: TaskId,
    pub pid: Pid,
    pub name: String,
    pub state: TaskState,
    pub policy: SchedPolicy,
    pub prio: u16,
    pub cpu: CpuId,
    pub sum_exec_runtime: u64,
    pub preempt_count: u64,
    pub voluntary_switches: u64,
}

/// Per-CPU queue counters.
#[derive(Clone, Copy, Debug)]
pub struct PerCpuStats {
    pub cpu: CpuId,
    pub nr_running: usize,
    pub nr_switches: u64,
    pub clock_ts: u64,
}

impl Scheduler {
    /// Global counters snapshot.
    pub fn get_stats(&self) -> SchedulerStats {
        self.inner.lock().stats
    }

    /// Per-CPU queue counters.
    pub fn get_percpu_stats(&self, cpu: CpuId) -> PerCpuStats {
        let inner = self.inner.lock();
        let rq = inner.rq(cpu);
        PerCpuStats {
            cpu,
            nr_running: rq.nr_running,
            nr_switches: rq.nr_switches,
            clock_ts: rq.clock_ts,
        }
    }

    /// Snapshot of every live task in the arena.
    pub fn list_tasks(&self) -> Vec<TaskInfo> {
        let inner = self.inner.lock();
        inner
            .tasks
            .iter()
            .map(|(id, t)| TaskInfo {
                id,
                pid: t.pid,
                name: t.name.clone(),
                state: t.state,
                policy: t.policy,
                prio: t.prio,
                cpu: t.cpu,
                sum_exec_runtime: t.sum_exec_runtime,
                preempt_count: t.preempt_count,
                voluntary_switches: t.voluntary_switches,
            })
            .collect()
    }

    /// Runnable / sleeping / zombie counts, cheap load signal.
    pub fn get_task_counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        let mut runnable = 0;
        let mut sleeping = 0;
        let mut zombie = 0;
        for (_, t) in inner.tasks.iter() {
            match t.state {
                TaskState::Running => runnable += 1,
                TaskState::Interruptible | TaskState::Uninterruptible => sleeping += 1,
                TaskState::Zombie => zombie += 1,
                _ => {}
            }
        }
        (runnable, sleeping, zombie)
    }
}
