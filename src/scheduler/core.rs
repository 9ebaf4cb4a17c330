//! Core scheduling operations.
//!
//! [`Scheduler`] is the explicitly constructed scheduler context: it owns
//! the task arena, one run queue per CPU, the domain tables and the
//! statistics block behind a single core lock, with the per-CPU
//! need-resched flags kept as atomics outside it. There are no ambient
//! statics; every operation takes `&self` and a task handle or CPU id.
//!
//! The pick-next algorithm is strict priority with circular scanning:
//! the scan starts just after the current task so equal-priority tasks
//! round-robin naturally. Real-time policies (FIFO/RR/Deadline) always
//! beat time-shared policies; the per-CPU idle task is the permanent
//! fallback.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::posix::Errno;
use crate::time::TimeSource;

use super::domain::{sched_domain_init, DomainId, DomainTable, SdFlags};
use super::priority::{apply_policy, apply_priority, timeslice_for};
use super::runqueue::RunQueue;
use super::task::{TaskArena, TaskEntry, TaskId};
use super::types::{CpuId, CpuMask, SchedPolicy, SchedulerStats, TaskFlags, TaskState};

/// Hook through which the scheduler asks a remote CPU to re-run
/// `schedule()` at its next opportunity. The SMP layer implements this by
/// sending a reschedule IPI; a uniprocessor build leaves it unset.
pub trait RescheduleHook: Send + Sync {
    fn send_reschedule(&self, cpu: CpuId);
}

pub(crate) struct SchedInner {
    pub(crate) tasks: TaskArena,
    pub(crate) rqs: Vec<RunQueue>,
    pub(crate) domains: DomainTable,
    pub(crate) stats: SchedulerStats,
}

impl SchedInner {
    pub(crate) fn rq(&self, cpu: CpuId) -> &RunQueue {
        &self.rqs[cpu as usize]
    }

    pub(crate) fn rq_mut(&mut self, cpu: CpuId) -> &mut RunQueue {
        &mut self.rqs[cpu as usize]
    }

    /// Disjoint borrow of one run queue and the task arena, for the
    /// intrusive list operations that need both.
    pub(crate) fn rq_and_tasks(&mut self, cpu: CpuId) -> (&mut RunQueue, &mut TaskArena) {
        (&mut self.rqs[cpu as usize], &mut self.tasks)
    }

    pub(crate) fn enqueue_tail(&mut self, cpu: CpuId, id: TaskId) {
        let (rq, tasks) = self.rq_and_tasks(cpu);
        rq.enqueue_tail(tasks, id);
    }

    pub(crate) fn unlink(&mut self, cpu: CpuId, id: TaskId) {
        let (rq, tasks) = self.rq_and_tasks(cpu);
        rq.unlink(tasks, id);
    }

    pub(crate) fn requeue_tail(&mut self, cpu: CpuId, id: TaskId) {
        let (rq, tasks) = self.rq_and_tasks(cpu);
        rq.requeue_tail(tasks, id);
    }
}

/// The scheduler context object.
pub struct Scheduler {
    pub(crate) inner: Mutex<SchedInner>,
    need_resched: Vec<AtomicBool>,
    clock: Arc<dyn TimeSource>,
    resched_hook: Mutex<Option<Arc<dyn RescheduleHook>>>,
    nr_cpus: usize,
}

fn idle_loop(_arg: usize) {
    // Architecture layer parks the CPU; the task itself never runs here.
}

impl Scheduler {
    /// Build a scheduler for `nr_cpus` CPUs. Each CPU gets its own run
    /// queue and idle task; CPU 0 is the boot processor.
    pub fn new(nr_cpus: usize, clock: Arc<dyn TimeSource>) -> Self {
        assert!(nr_cpus >= 1 && nr_cpus <= super::types::MAX_CPUS);
        let mut tasks = TaskArena::new();
        let mut rqs = Vec::with_capacity(nr_cpus);
        for cpu in 0..nr_cpus as CpuId {
            let idle = tasks
                .insert("idle", idle_loop, TaskFlags::KTHREAD | TaskFlags::IDLE)
                .expect("idle task allocation at boot");
            {
                let task = tasks.get_mut(idle).expect("fresh idle task");
                task.policy = SchedPolicy::Idle;
                task.affinity = CpuMask::single(cpu);
                task.cpu = cpu;
                task.on_cpu = true;
            }
            rqs.push(RunQueue::new(cpu, idle));
        }
        let need_resched = (0..nr_cpus).map(|_| AtomicBool::new(false)).collect();
        log::info!("sched: initialized ({} CPUs, strict priority pick)", nr_cpus);
        Self {
            inner: Mutex::new(SchedInner {
                tasks,
                rqs,
                domains: DomainTable::new(),
                stats: SchedulerStats::new(),
            }),
            need_resched,
            clock,
            resched_hook: Mutex::new(None),
            nr_cpus,
        }
    }

    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    /// Wire the reschedule-IPI hook (the SMP layer, once it is up).
    pub fn set_reschedule_hook(&self, hook: Arc<dyn RescheduleHook>) {
        *self.resched_hook.lock() = Some(hook);
    }

    // ========================================================================
    // Task creation and teardown
    // ========================================================================

    /// Allocate a task with default attributes (policy Normal, priority 20)
    /// and insert it at the tail of the least-loaded permitted run queue.
    /// A full task table is a hard error at the call site.
    pub fn create_task(&self, name: &str, entry: TaskEntry, flags: TaskFlags) -> Result<TaskId, Errno> {
        self.create_task_with_parent(name, entry, flags, None)
    }

    /// `create_task` with a process-hierarchy parent link.
    pub fn create_task_with_parent(
        &self,
        name: &str,
        entry: TaskEntry,
        flags: TaskFlags,
        parent: Option<TaskId>,
    ) -> Result<TaskId, Errno> {
        let mut inner = self.inner.lock();
        if let Some(p) = parent {
            if inner.tasks.get(p).is_none() {
                return Err(Errno::ESRCH);
            }
        }
        let id = inner.tasks.insert(name, entry, flags)?;
        if let Some(p) = parent {
            let old_first = inner.tasks.get(p).and_then(|t| t.first_child);
            let child = inner.tasks.get_mut(id).expect("fresh task");
            child.parent = Some(p);
            child.sibling = old_first;
            inner.tasks.get_mut(p).expect("parent checked above").first_child = Some(id);
        }
        let cpu = least_loaded_cpu(&inner, CpuMask::all());
        inner.enqueue_tail(cpu, id);
        log::debug!("sched: created task '{}' on cpu {}", name, cpu);
        Ok(id)
    }

    /// Insert an existing (unlinked) task at the tail of `cpu`'s queue.
    pub fn add_task(&self, id: TaskId, cpu: CpuId) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if inner.tasks.get(id).is_none() {
            return Err(Errno::ESRCH);
        }
        if cpu as usize >= self.nr_cpus {
            return Err(Errno::EINVAL);
        }
        inner.enqueue_tail(cpu, id);
        Ok(())
    }

    /// Unlink a task from its run queue.
    pub fn remove_task(&self, id: TaskId) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        let cpu = inner.tasks.get(id).ok_or(Errno::ESRCH)?.cpu;
        inner.unlink(cpu, id);
        Ok(())
    }

    /// Terminate the current task of `cpu`. The idle task refuses to exit.
    /// Returns the task selected to run next.
    pub fn exit(&self, cpu: CpuId, status: i32) -> Result<TaskId, Errno> {
        {
            let mut inner = self.inner.lock();
            let curr = inner.rq(cpu).curr;
            if curr == inner.rq(cpu).idle {
                log::warn!("sched: refusing to exit the idle task of cpu {}", cpu);
                return Err(Errno::EPERM);
            }
            inner.unlink(cpu, curr);
            let task = inner.tasks.get_mut(curr).expect("curr is always valid");
            task.state = TaskState::Zombie;
            task.exit_code = status;
            task.voluntary_switches += 1;
        }
        Ok(self.schedule(cpu))
    }

    /// Collect a Zombie child: unlink it from the hierarchy, free its slot
    /// and return its exit status. Not-yet-dead children report `EAGAIN`.
    pub fn reap(&self, parent: TaskId, child: TaskId) -> Result<i32, Errno> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.get(child).ok_or(Errno::ESRCH)?;
        if task.parent != Some(parent) {
            return Err(Errno::EPERM);
        }
        if task.state != TaskState::Zombie {
            return Err(Errno::EAGAIN);
        }
        let status = task.exit_code;
        let cpu = task.cpu;
        let sibling = task.sibling;
        inner.unlink(cpu, child);
        // Unlink from the parent's child chain.
        if inner.tasks.get(parent).and_then(|p| p.first_child) == Some(child) {
            inner.tasks.get_mut(parent).expect("parent exists").first_child = sibling;
        } else {
            let mut cursor = inner.tasks.get(parent).and_then(|p| p.first_child);
            while let Some(c) = cursor {
                let next = inner.tasks.get(c).and_then(|t| t.sibling);
                if next == Some(child) {
                    inner.tasks.get_mut(c).expect("sibling chain").sibling = sibling;
                    break;
                }
                cursor = next;
            }
        }
        if let Some(task) = inner.tasks.get_mut(child) {
            task.state = TaskState::Dead;
        }
        inner.tasks.remove(child);
        Ok(status)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Clamp `priority` to the valid range and re-derive the effective
    /// priority. Out-of-range values are clamped, never rejected.
    pub fn set_priority(&self, id: TaskId, priority: u8) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.get_mut(id).ok_or(Errno::ESRCH)?;
        apply_priority(task, priority);
        Ok(())
    }

    /// Change the scheduling policy, re-deriving priority and slice. The
    /// raw-integer validation boundary is [`SchedPolicy::from_raw`].
    pub fn set_policy(&self, id: TaskId, policy: SchedPolicy) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.get_mut(id).ok_or(Errno::ESRCH)?;
        apply_policy(task, policy);
        Ok(())
    }

    pub fn set_signal_pending(&self, id: TaskId, pending: bool) {
        if let Some(task) = self.inner.lock().tasks.get_mut(id) {
            task.signal_pending = pending;
        }
    }

    pub fn signal_pending(&self, id: TaskId) -> bool {
        self.inner
            .lock()
            .tasks
            .get(id)
            .map_or(false, |t| t.signal_pending)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// The pick-next decision for `cpu`. Revives expired sleepers, runs the
    /// load balancer, selects with strict priority, and commits the switch.
    pub fn schedule(&self, cpu: CpuId) -> TaskId {
        let mut inner = self.inner.lock();
        let now = self.clock.now_ticks();

        // Step 1: timed sleepers whose deadline passed become runnable
        // again. Tasks blocked without a deadline carry no wake_time and
        // stay put until an explicit wake_up.
        let expired: Vec<TaskId> = inner
            .rq(cpu)
            .iter(&inner.tasks)
            .filter(|&id| {
                inner.tasks.get(id).map_or(false, |t| {
                    t.state == TaskState::Interruptible
                        && t.wake_time.map_or(false, |deadline| deadline <= now)
                })
            })
            .collect();
        for id in expired {
            let task = inner.tasks.get_mut(id).expect("linked task");
            task.state = TaskState::Running;
            task.wake_time = None;
        }

        // Step 2: deliberate balancing hook before selection.
        super::smp::load_balance_run(&mut inner, cpu, now);

        // Step 3: strict-priority selection, circular from after curr.
        let next = pick_next(&inner, cpu);

        // Step 4: commit.
        let prev = inner.rq(cpu).curr;
        if next != prev {
            self.commit_switch(&mut inner, cpu, prev, next, now);
        }
        self.need_resched[cpu as usize].store(false, Ordering::Release);
        inner.rq(cpu).curr
    }

    fn commit_switch(&self, inner: &mut SchedInner, cpu: CpuId, prev: TaskId, next: TaskId, now: u64) {
        inner.stats.total_context_switches += 1;
        {
            let rq = inner.rq_mut(cpu);
            rq.nr_switches += 1;
            rq.clock_ts = now;
            rq.curr = next;
        }

        let mut prev_rt = false;
        let mut prev_voluntary = true;
        if let Some(task) = inner.tasks.get_mut(prev) {
            task.on_cpu = false;
            task.sum_exec_runtime += now.saturating_sub(task.last_ran);
            prev_rt = task.policy.is_realtime();
            prev_voluntary = task.state != TaskState::Running;
            if !prev_voluntary {
                task.preempt_count += 1;
            } else {
                task.voluntary_switches += 1;
            }
        }

        let next_rt;
        {
            let task = inner.tasks.get_mut(next).expect("picked task is valid");
            task.on_cpu = true;
            task.state = TaskState::Running;
            task.last_ran = now;
            next_rt = task.policy.is_realtime();
            if task.time_slice == 0 {
                task.time_slice = timeslice_for(task.policy);
            }
        }

        if prev_voluntary {
            inner.stats.total_voluntary_switches += 1;
        } else {
            inner.stats.total_preemptions += 1;
        }
        if prev_rt || next_rt {
            inner.stats.rt_contentions += 1;
            if next_rt && !prev_voluntary {
                inner.stats.rt_preemptions += 1;
            }
        }
        // The architecture-specific context transfer happens past this
        // point on hardware; the commit above is the observable contract.
        log::trace!("sched: cpu {} switched tasks at tick {}", cpu, now);
    }

    /// Mark the current task of `cpu` as sleeping until `now + ticks`,
    /// then reschedule. Cooperative: the sleeper resumes only once its
    /// deadline passes and `schedule()` re-selects it.
    pub fn sleep(&self, cpu: CpuId, ticks: u64) -> TaskId {
        {
            let mut inner = self.inner.lock();
            let now = self.clock.now_ticks();
            let curr = inner.rq(cpu).curr;
            let idle = inner.rq(cpu).idle;
            if curr != idle {
                let task = inner.tasks.get_mut(curr).expect("curr is always valid");
                task.state = TaskState::Interruptible;
                task.wake_time = Some(now.saturating_add(ticks));
            }
        }
        self.schedule(cpu)
    }

    /// Make a blocked task runnable again. Does not reschedule by itself;
    /// if the wakeup should preempt the target CPU, the need-resched flag
    /// is raised and the reschedule hook kicked.
    ///
    /// Returns true when the call actually changed the task's state.
    pub fn wake_up(&self, id: TaskId) -> bool {
        let kick = {
            let mut inner = self.inner.lock();
            let Some(task) = inner.tasks.get_mut(id) else {
                return false;
            };
            match task.state {
                TaskState::Interruptible | TaskState::Uninterruptible | TaskState::Stopped => {}
                _ => return false,
            }
            task.state = TaskState::Running;
            task.wake_time = None;
            let cpu = task.cpu;
            let prio = task.prio;
            let rt = task.policy.is_realtime();
            if !task.on_rq {
                inner.enqueue_tail(cpu, id);
            }
            let curr = inner.rq(cpu).curr;
            // Kick the CPU when the wakeup outranks what is running there:
            // RT over non-RT, higher RT priority over lower, anything over
            // idle. Time-shared peers wait for the next natural decision.
            let preempts = match inner.tasks.get(curr) {
                Some(c) if curr != inner.rq(cpu).idle => {
                    rt && (!c.policy.is_realtime() || prio > c.prio)
                }
                _ => true,
            };
            preempts.then_some(cpu)
        };
        if let Some(cpu) = kick {
            self.set_need_resched(cpu);
            if let Some(hook) = self.resched_hook.lock().as_ref() {
                hook.send_reschedule(cpu);
            }
        }
        true
    }

    /// Voluntarily give up the CPU: rotate the current task to the tail
    /// and reschedule.
    pub fn yield_now(&self, cpu: CpuId) -> TaskId {
        {
            let mut inner = self.inner.lock();
            let curr = inner.rq(cpu).curr;
            let idle = inner.rq(cpu).idle;
            if curr != idle {
                inner.requeue_tail(cpu, curr);
            }
        }
        self.schedule(cpu)
    }

    /// Timer interrupt entry: charge the tick to the current task,
    /// replenish expired RR slices, then run the pick-next decision.
    pub fn timer_tick(&self, cpu: CpuId) -> TaskId {
        {
            let mut inner = self.inner.lock();
            let curr = inner.rq(cpu).curr;
            let idle = inner.rq(cpu).idle;
            if curr != idle {
                let task = inner.tasks.get_mut(curr).expect("curr is always valid");
                if task.time_slice != u64::MAX {
                    task.time_slice = task.time_slice.saturating_sub(1);
                    if task.time_slice == 0 {
                        task.time_slice = timeslice_for(task.policy);
                        self.need_resched[cpu as usize].store(true, Ordering::Release);
                    }
                }
            }
        }
        self.schedule(cpu)
    }

    /// Transition a task into a blocked state on behalf of a
    /// synchronization primitive. The task stays linked on its queue and
    /// is skipped by selection until an explicit wakeup; no sleep deadline
    /// applies.
    pub fn block_task(&self, id: TaskId, state: TaskState) {
        debug_assert!(matches!(
            state,
            TaskState::Interruptible | TaskState::Uninterruptible
        ));
        if let Some(task) = self.inner.lock().tasks.get_mut(id) {
            task.state = state;
            task.wake_time = None;
        }
    }

    pub fn set_task_state(&self, id: TaskId, state: TaskState) {
        if let Some(task) = self.inner.lock().tasks.get_mut(id) {
            task.state = state;
        }
    }

    pub fn set_need_resched(&self, cpu: CpuId) {
        self.need_resched[cpu as usize].store(true, Ordering::Release);
    }

    pub fn need_resched(&self, cpu: CpuId) -> bool {
        self.need_resched[cpu as usize].load(Ordering::Acquire)
    }

    // ========================================================================
    // Domains
    // ========================================================================

    /// Build the boot-time domain layout for `online` CPUs.
    pub fn init_domains(&self, online: CpuMask) -> Result<(), Errno> {
        sched_domain_init(&mut self.inner.lock().domains, online)
    }

    pub fn domain_create(&self, parent: Option<DomainId>, flags: SdFlags) -> Result<DomainId, Errno> {
        self.inner.lock().domains.domain_create(parent, flags)
    }

    pub fn domain_add_group(&self, domain: DomainId, cpus: CpuMask) -> Result<usize, Errno> {
        self.inner.lock().domains.domain_add_group(domain, cpus)
    }

    pub fn domain_count(&self) -> usize {
        self.inner.lock().domains.len()
    }

    // ========================================================================
    // Introspection (used by the stats module and the test suites)
    // ========================================================================

    pub fn current(&self, cpu: CpuId) -> TaskId {
        self.inner.lock().rq(cpu).curr
    }

    pub fn idle_task(&self, cpu: CpuId) -> TaskId {
        self.inner.lock().rq(cpu).idle
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.lock().tasks.get(id).map(|t| t.state)
    }

    pub fn task_prio(&self, id: TaskId) -> Option<u16> {
        self.inner.lock().tasks.get(id).map(|t| t.prio)
    }

    pub fn task_policy(&self, id: TaskId) -> Option<SchedPolicy> {
        self.inner.lock().tasks.get(id).map(|t| t.policy)
    }

    pub fn task_cpu(&self, id: TaskId) -> Option<CpuId> {
        self.inner.lock().tasks.get(id).map(|t| t.cpu)
    }

    pub fn task_time_slice(&self, id: TaskId) -> Option<u64> {
        self.inner.lock().tasks.get(id).map(|t| t.time_slice)
    }

    pub fn nr_running(&self, cpu: CpuId) -> usize {
        self.inner.lock().rq(cpu).nr_running
    }

    pub fn nr_switches(&self, cpu: CpuId) -> u64 {
        self.inner.lock().rq(cpu).nr_switches
    }

    /// Whether the task is linked into `cpu`'s run queue.
    pub fn on_runqueue(&self, id: TaskId, cpu: CpuId) -> bool {
        let inner = self.inner.lock();
        inner.rq(cpu).contains(&inner.tasks, id)
    }
}

/// Strict-priority pick: first runnable real-time task wins; failing that
/// the first runnable task of any policy; failing that the idle task. The
/// scan is circular starting after `curr` so peers take turns.
fn pick_next(inner: &SchedInner, cpu: CpuId) -> TaskId {
    let rq = inner.rq(cpu);
    let start = if rq.contains(&inner.tasks, rq.curr) {
        rq.next_circular(&inner.tasks, rq.curr)
    } else {
        rq.head()
    };

    let mut fallback = None;
    let mut cursor = start;
    for _ in 0..rq.nr_running {
        let Some(id) = cursor else { break };
        if let Some(task) = inner.tasks.get(id) {
            if task.is_runnable() {
                if task.policy.is_realtime() {
                    return id;
                }
                if fallback.is_none() {
                    fallback = Some(id);
                }
            }
        }
        cursor = rq.next_circular(&inner.tasks, id);
    }
    fallback.unwrap_or(rq.idle)
}

/// Least-loaded run queue among the CPUs in `mask`.
pub(crate) fn least_loaded_cpu(inner: &SchedInner, mask: CpuMask) -> CpuId {
    let mut best: CpuId = 0;
    let mut best_load = usize::MAX;
    for rq in inner.rqs.iter() {
        if !mask.is_set(rq.cpu) {
            continue;
        }
        if rq.nr_running < best_load {
            best_load = rq.nr_running;
            best = rq.cpu;
        }
    }
    best
}
