//! CPU presence/state registry.
//!
//! Tracks which CPUs exist, which are online and which may receive work.
//! The masks are single atomic words so IPI paths can consult them without
//! taking a lock; per-CPU status bytes carry the finer boot-state machine.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::scheduler::{CpuId, CpuMask};

/// Boot-state machine of one CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuStatus {
    /// Not started, or failed to start.
    Offline = 0,
    /// INIT/STARTUP sequence in flight.
    Booting = 1,
    /// Running and schedulable.
    Online = 2,
    /// Halted by a stop IPI.
    Stopped = 3,
}

impl CpuStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CpuStatus::Booting,
            2 => CpuStatus::Online,
            3 => CpuStatus::Stopped,
            _ => CpuStatus::Offline,
        }
    }
}

/// Registry of CPU state, shared between the boot path and the IPI
/// handlers. CPU 0 is the boot processor and starts online.
pub struct CpuRegistry {
    present: AtomicU64,
    online: AtomicU64,
    /// Online CPUs that accept migrated work. A CPU leaves this mask
    /// before it leaves `online` during a stop.
    active: AtomicU64,
    status: Vec<AtomicU8>,
    startup_attempts: Vec<AtomicU32>,
}

impl CpuRegistry {
    pub fn new(nr_cpus: usize) -> Self {
        let registry = Self {
            present: AtomicU64::new(CpuMask::first_n(nr_cpus).bits()),
            online: AtomicU64::new(CpuMask::single(0).bits()),
            active: AtomicU64::new(CpuMask::single(0).bits()),
            status: (0..nr_cpus).map(|_| AtomicU8::new(CpuStatus::Offline as u8)).collect(),
            startup_attempts: (0..nr_cpus).map(|_| AtomicU32::new(0)).collect(),
        };
        registry.status[0].store(CpuStatus::Online as u8, Ordering::Release);
        registry
    }

    pub fn nr_cpus(&self) -> usize {
        self.status.len()
    }

    pub fn status(&self, cpu: CpuId) -> CpuStatus {
        CpuStatus::from_raw(self.status[cpu as usize].load(Ordering::Acquire))
    }

    pub fn set_status(&self, cpu: CpuId, status: CpuStatus) {
        self.status[cpu as usize].store(status as u8, Ordering::Release);
    }

    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.online_mask().is_set(cpu)
    }

    /// Transition a booted CPU to Online and publish it in both masks.
    pub fn set_online(&self, cpu: CpuId) {
        self.set_status(cpu, CpuStatus::Online);
        let bit = CpuMask::single(cpu).bits();
        self.online.fetch_or(bit, Ordering::AcqRel);
        self.active.fetch_or(bit, Ordering::AcqRel);
    }

    /// Take a CPU out of service after a failed boot.
    pub fn set_offline(&self, cpu: CpuId) {
        self.set_status(cpu, CpuStatus::Offline);
        let bit = CpuMask::single(cpu).bits();
        self.active.fetch_and(!bit, Ordering::AcqRel);
        self.online.fetch_and(!bit, Ordering::AcqRel);
    }

    /// Stop-IPI landing: the CPU stays present but schedules nothing.
    pub fn set_stopped(&self, cpu: CpuId) {
        self.set_status(cpu, CpuStatus::Stopped);
        let bit = CpuMask::single(cpu).bits();
        self.active.fetch_and(!bit, Ordering::AcqRel);
        self.online.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn present_mask(&self) -> CpuMask {
        CpuMask::from_bits(self.present.load(Ordering::Acquire))
    }

    pub fn online_mask(&self) -> CpuMask {
        CpuMask::from_bits(self.online.load(Ordering::Acquire))
    }

    pub fn active_mask(&self) -> CpuMask {
        CpuMask::from_bits(self.active.load(Ordering::Acquire))
    }

    pub fn online_count(&self) -> usize {
        self.online_mask().count()
    }

    pub fn bump_startup_attempts(&self, cpu: CpuId) {
        self.startup_attempts[cpu as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// INIT/STARTUP sequences attempted against this CPU.
    pub fn startup_attempts(&self, cpu: CpuId) -> u32 {
        self.startup_attempts[cpu as usize].load(Ordering::Relaxed)
    }
}
