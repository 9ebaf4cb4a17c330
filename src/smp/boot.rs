//! Secondary CPU bring-up.
//!
//! The INIT/STARTUP protocol, expressed against [`IcrTransport`] and the
//! injected clock: stage the trampoline, send INIT, let the target settle,
//! send two STARTUP IPIs, then poll the boot flag under a hard deadline.
//! A CPU that never raises its flag is marked Offline and reported as
//! `ETIMEDOUT`; the rest of the system keeps running without it.

use crate::posix::Errno;
use crate::scheduler::CpuId;

use super::cpu::CpuStatus;
use super::ipi::TRAMPOLINE_VECTOR;
use super::Smp;

/// Settle time after INIT before the first STARTUP IPI, in ticks.
const INIT_SETTLE_TICKS: u64 = 10;

/// Gap between the two STARTUP IPIs, in ticks.
const SIPI_GAP_TICKS: u64 = 1;

/// Boot-flag poll attempts before giving up on a CPU.
const BOOT_POLL_LIMIT: u32 = 1000;

/// Delay between boot-flag polls, in ticks.
const BOOT_POLL_TICKS: u64 = 1;

impl Smp {
    /// Start one secondary CPU. The boot processor cannot be restarted
    /// and an already-online CPU reports `EBUSY`.
    pub fn boot_cpu(&self, cpu: CpuId) -> Result<(), Errno> {
        if cpu == 0 || cpu as usize >= self.nr_cpus() {
            return Err(Errno::EINVAL);
        }
        if self.registry().is_online(cpu) {
            return Err(Errno::EBUSY);
        }

        self.registry().set_status(cpu, CpuStatus::Booting);
        self.registry().bump_startup_attempts(cpu);
        self.transport.install_trampoline(cpu)?;

        log::info!("smp: starting cpu {}", cpu);
        self.transport.send_init_ipi(cpu);
        self.clock.delay_ticks(INIT_SETTLE_TICKS);

        // Two STARTUP IPIs per the Intel MP startup sequence.
        self.transport.send_startup_ipi(cpu, TRAMPOLINE_VECTOR);
        self.clock.delay_ticks(SIPI_GAP_TICKS);
        self.transport.send_startup_ipi(cpu, TRAMPOLINE_VECTOR);

        for _ in 0..BOOT_POLL_LIMIT {
            if self.transport.read_boot_flag(cpu) {
                self.registry().set_online(cpu);
                log::info!("smp: cpu {} online", cpu);
                return Ok(());
            }
            self.clock.delay_ticks(BOOT_POLL_TICKS);
        }

        self.registry().set_offline(cpu);
        log::warn!("smp: cpu {} did not come online, giving up", cpu);
        Err(Errno::ETIMEDOUT)
    }

    /// Bring up every present secondary CPU. Failures are logged and
    /// skipped. Returns the number of CPUs that came online.
    pub fn bring_up_secondaries(&self) -> usize {
        let mut started = 0;
        for cpu in 1..self.nr_cpus() as CpuId {
            match self.boot_cpu(cpu) {
                Ok(()) => started += 1,
                Err(err) => log::warn!("smp: cpu {} failed to start: {}", cpu, err),
            }
        }
        log::info!(
            "smp: bring-up complete, {} of {} CPUs online",
            self.online_count(),
            self.nr_cpus()
        );
        started
    }
}
