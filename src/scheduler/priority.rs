//! Priority computation.
//!
//! `prio` is never stored independently: it is re-derived from
//! `(policy, static_prio)` on every `set_priority`/`set_policy` call.
//! Time-shared policies use the static priority directly; real-time
//! policies map into the band above [`RT_BASE`], where a lower static
//! value yields a higher effective priority.

use super::task::Task;
use super::types::{SchedPolicy, MAX_PRIO, RT_BASE};
use super::types::{DEFAULT_TIME_SLICE, FIFO_TIME_SLICE, RR_TIME_SLICE};

/// Effective priority for a (policy, static_prio) pair.
pub fn normal_prio(policy: SchedPolicy, static_prio: u8) -> u16 {
    if policy.is_realtime() {
        RT_BASE + (MAX_PRIO - static_prio) as u16
    } else {
        static_prio as u16
    }
}

/// Time slice a task of `policy` receives when its quantum is replenished.
pub fn timeslice_for(policy: SchedPolicy) -> u64 {
    match policy {
        SchedPolicy::Fifo | SchedPolicy::Deadline => FIFO_TIME_SLICE,
        SchedPolicy::Rr => RR_TIME_SLICE,
        _ => DEFAULT_TIME_SLICE,
    }
}

/// Clamp and apply a new static priority, recomputing the derived fields.
pub fn apply_priority(task: &mut Task, priority: u8) {
    task.static_prio = priority.min(MAX_PRIO);
    recompute(task);
}

/// Apply a new policy, recomputing priority and replenishing the slice.
pub fn apply_policy(task: &mut Task, policy: SchedPolicy) {
    task.policy = policy;
    task.time_slice = timeslice_for(policy);
    recompute(task);
}

fn recompute(task: &mut Task) {
    task.normal_prio = normal_prio(task.policy, task.static_prio);
    task.prio = task.normal_prio;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::Task;
    use crate::scheduler::types::TaskFlags;

    fn nop(_arg: usize) {}

    fn make_task() -> Task {
        Task::new(1, "t", nop, TaskFlags::KTHREAD)
    }

    #[test]
    fn normal_policy_prio_is_static_prio() {
        let mut task = make_task();
        apply_priority(&mut task, 35);
        assert_eq!(task.normal_prio, 35);
        assert_eq!(task.prio, 35);
    }

    #[test]
    fn priority_clamps_to_max() {
        let mut task = make_task();
        apply_priority(&mut task, 200);
        assert_eq!(task.static_prio, MAX_PRIO);
        assert_eq!(task.prio, MAX_PRIO as u16);
    }

    #[test]
    fn realtime_band_inverts_static_prio() {
        let mut task = make_task();
        apply_policy(&mut task, SchedPolicy::Fifo);
        apply_priority(&mut task, 10);
        assert_eq!(task.prio, RT_BASE + (MAX_PRIO - 10) as u16);

        // A numerically lower static priority is a higher RT priority.
        let mut other = make_task();
        apply_policy(&mut other, SchedPolicy::Fifo);
        apply_priority(&mut other, 50);
        assert!(task.prio > other.prio);
    }

    #[test]
    fn policy_change_rederives_prio() {
        let mut task = make_task();
        apply_priority(&mut task, 10);
        assert_eq!(task.prio, 10);
        apply_policy(&mut task, SchedPolicy::Rr);
        assert_eq!(task.prio, RT_BASE + (MAX_PRIO - 10) as u16);
        assert_eq!(task.time_slice, RR_TIME_SLICE);
        apply_policy(&mut task, SchedPolicy::Normal);
        assert_eq!(task.prio, 10);
    }

    #[test]
    fn fifo_slice_is_unbounded() {
        let mut task = make_task();
        apply_policy(&mut task, SchedPolicy::Fifo);
        assert_eq!(task.time_slice, FIFO_TIME_SLICE);
    }
}
