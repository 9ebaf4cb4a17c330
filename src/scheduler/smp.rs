//! SMP-facing scheduler operations: CPU affinity, task migration, and the
//! domain-driven load balancer.
//!
//! Migration is the only way a task changes run queues, and it always goes
//! through [`Scheduler::migrate_task`]-equivalent relinking under the core
//! lock. The balancer consults the domain/group tables exclusively: CPUs
//! may only exchange work inside a domain flagged for load balancing, and
//! at most one task moves per invocation.

use crate::posix::Errno;

use super::core::{least_loaded_cpu, SchedInner, Scheduler};
use super::task::TaskId;
use super::types::{CpuId, CpuMask, TaskState};

impl Scheduler {
    /// CPUs the task is allowed to run on.
    pub fn get_cpu_affinity(&self, id: TaskId) -> Result<CpuMask, Errno> {
        let inner = self.inner.lock();
        inner.tasks.get(id).map(|t| t.affinity).ok_or(Errno::ESRCH)
    }

    /// Restrict the task to `mask`. An effective mask with no online run
    /// queue is `EINVAL`. If the task currently sits on a disallowed CPU
    /// it is migrated to the least-loaded permitted one.
    pub fn set_cpu_affinity(&self, id: TaskId, mask: CpuMask) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        let nr = inner.rqs.len();
        let effective = mask.and(CpuMask::first_n(nr));
        if effective.is_empty() {
            return Err(Errno::EINVAL);
        }
        let (cpu, on_rq) = {
            let task = inner.tasks.get_mut(id).ok_or(Errno::ESRCH)?;
            task.affinity = effective;
            (task.cpu, task.on_rq)
        };
        if !effective.is_set(cpu) && on_rq {
            let target = least_loaded_cpu(&inner, effective);
            migrate(&mut inner, id, target);
            log::debug!("sched: affinity change migrated task to cpu {}", target);
        }
        Ok(())
    }

    /// Run queue a new or woken task should prefer: the least-loaded
    /// online CPU its affinity permits.
    pub fn preferred_cpu(&self, id: TaskId) -> Result<CpuId, Errno> {
        let inner = self.inner.lock();
        let affinity = inner.tasks.get(id).map(|t| t.affinity).ok_or(Errno::ESRCH)?;
        Ok(least_loaded_cpu(&inner, affinity))
    }

    /// Move a task to `target`'s run queue. Rejected when the task's
    /// affinity excludes the target.
    pub fn migrate_task(&self, id: TaskId, target: CpuId) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if target as usize >= inner.rqs.len() {
            return Err(Errno::EINVAL);
        }
        {
            let task = inner.tasks.get(id).ok_or(Errno::ESRCH)?;
            if !task.affinity.is_set(target) {
                return Err(Errno::EINVAL);
            }
        }
        migrate(&mut inner, id, target);
        Ok(())
    }

    /// Per-CPU queue depth, the balancer's load metric.
    pub fn cpu_load(&self, cpu: CpuId) -> usize {
        self.inner.lock().rq(cpu).nr_running
    }
}

/// Relink `id` onto `target`'s queue tail. A task that is some CPU's
/// `curr` is never moved out from under it.
pub(crate) fn migrate(inner: &mut SchedInner, id: TaskId, target: CpuId) {
    let Some(task) = inner.tasks.get(id) else {
        return;
    };
    let src = task.cpu;
    if src == target || task.on_cpu {
        return;
    }
    if task.on_rq {
        inner.unlink(src, id);
        inner.enqueue_tail(target, id);
    } else if let Some(task) = inner.tasks.get_mut(id) {
        task.cpu = target;
    }
    inner.stats.migration_count += 1;
}

/// The balancing pass invoked from `schedule()` before selection.
///
/// For every LOAD_BALANCE domain containing `cpu` whose `min_interval`
/// has elapsed: find the busiest group other than `cpu`'s own, and if its
/// busiest queue exceeds this CPU's load by more than `imbalance_pct`,
/// pull one migratable runnable task over. Bounded work per invocation.
pub(crate) fn load_balance_run(inner: &mut SchedInner, cpu: CpuId, now: u64) {
    let nr_domains = inner.domains.len();
    for dom_idx in 0..nr_domains {
        let (flags_ok, due, imbalance_pct, local_group, span) = {
            let Some(dom) = inner.domains.get(dom_idx) else {
                continue;
            };
            (
                dom.flags.contains(super::domain::SdFlags::LOAD_BALANCE),
                now.saturating_sub(dom.last_balance) >= dom.min_interval,
                dom.imbalance_pct,
                dom.groups().iter().position(|g| g.cpus.is_set(cpu)),
                dom.span(),
            )
        };
        if !flags_ok || !span.is_set(cpu) {
            continue;
        }
        let Some(local_group) = local_group else {
            continue;
        };
        if !due {
            continue;
        }
        if let Some(dom) = inner.domains.get_mut(dom_idx) {
            dom.last_balance = now;
        }
        inner.stats.load_balance_count += 1;

        if pull_one_task(inner, cpu, dom_idx, local_group, imbalance_pct) {
            // One migration per pass is the bounded contract.
            return;
        }
    }
}

fn group_load(inner: &SchedInner, cpus: CpuMask) -> usize {
    cpus.iter()
        .filter(|&c| (c as usize) < inner.rqs.len())
        .map(|c| inner.rq(c).nr_running)
        .sum()
}

fn pull_one_task(
    inner: &mut SchedInner,
    cpu: CpuId,
    dom_idx: usize,
    local_group: usize,
    imbalance_pct: u32,
) -> bool {
    // Busiest remote group by aggregate queue depth.
    let (busiest_mask, busiest_load) = {
        let Some(dom) = inner.domains.get(dom_idx) else {
            return false;
        };
        let mut best: Option<(CpuMask, usize)> = None;
        for (gi, group) in dom.groups().iter().enumerate() {
            if gi == local_group {
                continue;
            }
            let load = group_load(inner, group.cpus);
            if best.map_or(true, |(_, l)| load > l) {
                best = Some((group.cpus, load));
            }
        }
        match best {
            Some(b) => b,
            None => return false,
        }
    };

    let local_load = inner.rq(cpu).nr_running;
    // imbalance_pct is a percentage threshold (125 = 25% over local).
    if busiest_load * 100 <= (local_load + 1) * imbalance_pct as usize {
        return false;
    }

    // Busiest queue inside the busiest group.
    let Some(src) = busiest_mask
        .iter()
        .filter(|&c| (c as usize) < inner.rqs.len())
        .max_by_key(|&c| inner.rq(c).nr_running)
    else {
        return false;
    };

    // First migratable runnable task that is not executing right now.
    let candidate: Option<TaskId> = inner
        .rq(src)
        .iter(&inner.tasks)
        .find(|&id| {
            inner.tasks.get(id).map_or(false, |t| {
                t.state == TaskState::Running && !t.on_cpu && t.affinity.is_set(cpu)
            })
        });

    let Some(id) = candidate else {
        return false;
    };
    migrate(inner, id, cpu);
    log::debug!(
        "sched: balanced one task from cpu {} to cpu {} (load {} -> {})",
        src,
        cpu,
        busiest_load,
        local_load
    );
    true
}
