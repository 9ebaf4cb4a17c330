//! End-to-end scenarios across the scheduler, the balancer and the sync
//! primitives, driven the way the kernel proper would drive them.

use std::sync::Arc;
use std::thread;

use kernos_core::scheduler::{CpuMask, SchedPolicy, Scheduler, TaskFlags, TaskState};
use kernos_core::sync::Mutex;
use kernos_core::time::ManualClock;

fn nop(_arg: usize) {}

#[test]
fn realtime_dominates_until_it_sleeps_then_resumes() {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::new(1, clock.clone());

    let a = sched.create_task("a", nop, TaskFlags::KTHREAD).unwrap();
    let b = sched.create_task("b", nop, TaskFlags::KTHREAD).unwrap();
    let rt = sched.create_task("rt", nop, TaskFlags::KTHREAD).unwrap();
    sched.set_policy(rt, SchedPolicy::Fifo).unwrap();

    // Phase 1: the FIFO task owns the CPU through ticks and yields alike.
    assert_eq!(sched.schedule(0), rt);
    for _ in 0..20 {
        assert_eq!(sched.timer_tick(0), rt);
    }

    // Phase 2: it sleeps; the time-shared pair round-robins.
    let first = sched.sleep(0, 50);
    assert!(first == a || first == b);
    let second = sched.yield_now(0);
    assert_ne!(second, first);
    assert_ne!(second, rt);

    // Phase 3: deadline passes; the FIFO task takes over again.
    clock.advance(50);
    assert_eq!(sched.schedule(0), rt);
    assert_eq!(sched.task_state(rt), Some(TaskState::Running));
}

#[test]
fn contended_mutex_parks_the_loser_until_handoff() {
    let sched = Scheduler::new(1, Arc::new(ManualClock::new()));
    let winner = sched.create_task("winner", nop, TaskFlags::KTHREAD).unwrap();
    let loser = sched.create_task("loser", nop, TaskFlags::KTHREAD).unwrap();
    let mutex = Mutex::new();

    mutex.lock(&sched, winner).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            mutex.lock(&sched, loser).unwrap();
            mutex.unlock(&sched, loser).unwrap();
        });

        // The loser parks: blocked, still linked, never selected.
        while sched.task_state(loser) != Some(TaskState::Uninterruptible) {
            thread::yield_now();
        }
        assert!(sched.on_runqueue(loser, 0));
        assert_ne!(sched.schedule(0), loser);

        // Hand-off: ownership moves before the wakeup, so the loser can
        // only ever observe itself as the owner.
        mutex.unlock(&sched, winner).unwrap();
    });

    assert!(!mutex.is_locked());
    assert_eq!(sched.task_state(loser), Some(TaskState::Running));
}

#[test]
fn idle_cpu_pulls_work_from_an_overloaded_one() {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::new(2, clock.clone());
    sched.init_domains(CpuMask::first_n(2)).unwrap();

    // Pile everything onto CPU 0.
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let t = sched.create_task("w", nop, TaskFlags::KTHREAD).unwrap();
        sched.migrate_task(t, 0).unwrap();
        tasks.push(t);
    }
    assert_eq!(sched.nr_running(0), 4);
    assert_eq!(sched.nr_running(1), 0);

    // Past the balance interval, CPU 1's scheduling decision pulls one
    // task across and runs it.
    clock.advance(10);
    let picked = sched.schedule(1);
    assert!(tasks.contains(&picked));
    assert_eq!(sched.nr_running(0), 3);
    assert_eq!(sched.nr_running(1), 1);
    assert!(sched.get_stats().migration_count >= 1);
    assert!(sched.get_stats().load_balance_count >= 1);
}

#[test]
fn balancer_respects_affinity() {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::new(2, clock.clone());
    sched.init_domains(CpuMask::first_n(2)).unwrap();

    for _ in 0..4 {
        let t = sched.create_task("w", nop, TaskFlags::KTHREAD).unwrap();
        sched.migrate_task(t, 0).unwrap();
        sched.set_cpu_affinity(t, CpuMask::single(0)).unwrap();
    }
    let migrations_after_setup = sched.get_stats().migration_count;

    clock.advance(10);
    // Nothing is allowed to move: CPU 1 stays idle.
    assert_eq!(sched.schedule(1), sched.idle_task(1));
    assert_eq!(sched.nr_running(0), 4);
    assert_eq!(sched.nr_running(1), 0);
    assert_eq!(sched.get_stats().migration_count, migrations_after_setup);
}

#[test]
fn single_cpu_load_balancing_is_a_no_op() {
    let clock = Arc::new(ManualClock::new());
    let sched = Scheduler::new(1, clock.clone());
    sched.init_domains(CpuMask::single(0)).unwrap();
    assert_eq!(sched.domain_count(), 0);

    let t = sched.create_task("t", nop, TaskFlags::KTHREAD).unwrap();
    clock.advance(100);
    assert_eq!(sched.schedule(0), t);
    assert_eq!(sched.get_stats().load_balance_count, 0);
}
