//! SMP layer: CPU bring-up, the CPU registry and inter-processor calls.
//!
//! [`Smp`] is the explicitly constructed SMP context. It owns the CPU
//! registry and the per-CPU call queues, drives the INIT/STARTUP bring-up
//! protocol through the [`IcrTransport`] boundary, and implements the
//! scheduler's [`RescheduleHook`] so cross-CPU wakeups turn into
//! reschedule IPIs.
//!
//! ## Module Organization
//!
//! - `cpu`: CPU status machine and the present/online/active masks
//! - `ipi`: vectors, the hardware transport trait, call descriptors
//! - `boot`: the INIT/STARTUP/poll bring-up protocol

mod boot;
mod cpu;
mod ipi;

pub use cpu::{CpuRegistry, CpuStatus};
pub use ipi::{IcrTransport, IpiCall, IpiFn};
pub use ipi::{IPI_CALL_FUNCTION, IPI_RESCHEDULE, IPI_STOP, TRAMPOLINE_VECTOR};

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use spin::Mutex;

use crate::scheduler::{CpuId, CpuMask, RescheduleHook, Scheduler};
use crate::time::TimeSource;

/// The SMP context object.
pub struct Smp {
    registry: CpuRegistry,
    transport: Arc<dyn IcrTransport>,
    clock: Arc<dyn TimeSource>,
    /// Pending cross-CPU calls, one queue per target CPU.
    calls: Vec<Mutex<VecDeque<Arc<IpiCall>>>>,
    nr_cpus: usize,
}

impl Smp {
    /// Build the SMP context for `nr_cpus` present CPUs. Only the boot
    /// processor is online until [`Smp::bring_up_secondaries`] runs.
    pub fn new(nr_cpus: usize, transport: Arc<dyn IcrTransport>, clock: Arc<dyn TimeSource>) -> Self {
        assert!(nr_cpus >= 1 && nr_cpus <= crate::scheduler::MAX_CPUS);
        let calls = (0..nr_cpus).map(|_| Mutex::new(VecDeque::new())).collect();
        log::info!("smp: context created, {} CPUs present", nr_cpus);
        Self {
            registry: CpuRegistry::new(nr_cpus),
            transport,
            clock,
            calls,
            nr_cpus,
        }
    }

    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    pub fn registry(&self) -> &CpuRegistry {
        &self.registry
    }

    pub fn online_mask(&self) -> CpuMask {
        self.registry.online_mask()
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    // ========================================================================
    // IPI send paths
    // ========================================================================

    /// Ask `cpu` to re-run its scheduling decision. Dropped silently for
    /// CPUs that are not online.
    pub fn send_reschedule(&self, cpu: CpuId) {
        if self.registry.is_online(cpu) {
            self.transport.send_ipi(cpu, IPI_RESCHEDULE);
        }
    }

    /// Deliver `vector` to one online CPU.
    pub fn send_ipi(&self, cpu: CpuId, vector: u8) {
        if self.registry.is_online(cpu) {
            self.transport.send_ipi(cpu, vector);
        }
    }

    /// Broadcast `vector` to every online CPU.
    pub fn send_ipi_all(&self, vector: u8) {
        for cpu in self.registry.online_mask().iter() {
            self.transport.send_ipi(cpu, vector);
        }
    }

    /// Broadcast `vector` to every online CPU except `from`.
    pub fn send_ipi_all_but_self(&self, from: CpuId, vector: u8) {
        for cpu in self.registry.online_mask().iter() {
            if cpu != from {
                self.transport.send_ipi(cpu, vector);
            }
        }
    }

    /// Halt every online CPU except `from`. The targets land in
    /// [`Smp::handle_ipi`] and are marked Stopped; parking the core is the
    /// architecture handler's business.
    pub fn send_stop(&self, from: CpuId) {
        log::warn!("smp: cpu {} stopping all other CPUs", from);
        self.send_ipi_all_but_self(from, IPI_STOP);
    }

    /// Run `func(arg)` on every online CPU in `mask`. The sender executes
    /// its own share inline. With `wait`, spins until every target has
    /// finished. Returns the call descriptor for completion tracking.
    pub fn call_function(
        &self,
        from: CpuId,
        mask: CpuMask,
        func: IpiFn,
        arg: usize,
        wait: bool,
    ) -> Arc<IpiCall> {
        let targets = mask
            .and(self.registry.online_mask())
            .and(CpuMask::first_n(self.nr_cpus));
        let call = Arc::new(IpiCall::new(func, arg, targets.count()));
        for cpu in targets.iter() {
            if cpu == from {
                continue;
            }
            self.calls[cpu as usize].lock().push_back(Arc::clone(&call));
            self.transport.send_ipi(cpu, IPI_CALL_FUNCTION);
        }
        if targets.is_set(from) {
            (func)(arg);
            call.done.fetch_add(1, Ordering::AcqRel);
        }
        if wait {
            while !call.is_complete() {
                core::hint::spin_loop();
            }
        }
        call
    }

    /// Run `func(arg)` on a single CPU.
    pub fn call_function_single(
        &self,
        from: CpuId,
        target: CpuId,
        func: IpiFn,
        arg: usize,
        wait: bool,
    ) -> Arc<IpiCall> {
        self.call_function(from, CpuMask::single(target), func, arg, wait)
    }

    // ========================================================================
    // IPI receive path
    // ========================================================================

    /// Dispatch an incoming IPI on `cpu`. Called from the architecture's
    /// interrupt stubs with the vector that fired. The reschedule vector
    /// runs the pick-next decision right here; the others run to
    /// completion without blocking.
    /// Returns whether the vector belonged to this layer.
    pub fn handle_ipi(&self, cpu: CpuId, vector: u8, sched: &Scheduler) -> bool {
        match vector {
            IPI_RESCHEDULE => {
                // The sender already raised need_resched; act on it.
                sched.schedule(cpu);
                true
            }
            IPI_CALL_FUNCTION => {
                self.run_pending_calls(cpu);
                true
            }
            IPI_STOP => {
                self.registry.set_stopped(cpu);
                log::info!("smp: cpu {} stopped", cpu);
                true
            }
            _ => {
                log::warn!("smp: cpu {} got unknown IPI vector {:#x}", cpu, vector);
                false
            }
        }
    }

    /// Drain and execute every call queued for `cpu`.
    fn run_pending_calls(&self, cpu: CpuId) {
        loop {
            // Pop outside the function invocation so a call that posts
            // further calls does not deadlock on the queue lock.
            let Some(call) = self.calls[cpu as usize].lock().pop_front() else {
                return;
            };
            (call.func)(call.arg);
            call.done.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl RescheduleHook for Smp {
    fn send_reschedule(&self, cpu: CpuId) {
        Smp::send_reschedule(self, cpu);
    }
}
