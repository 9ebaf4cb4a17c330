//! IPI vectors, the hardware transport boundary, and call descriptors.
//!
//! Everything that touches the interrupt command register or the AP boot
//! page goes through [`IcrTransport`], so the bring-up protocol and the
//! cross-CPU call machinery run unchanged against real hardware or a test
//! double.

use core::sync::atomic::AtomicUsize;

use crate::posix::Errno;
use crate::scheduler::CpuId;

// ============================================================================
// IPI Vector Constants
// ============================================================================

/// IPI vector for reschedule requests.
pub const IPI_RESCHEDULE: u8 = 0xF0;

/// IPI vector for cross-CPU function calls.
pub const IPI_CALL_FUNCTION: u8 = 0xF2;

/// IPI vector for stop requests.
pub const IPI_STOP: u8 = 0xF3;

/// STARTUP IPI vector: page number of the real-mode trampoline.
pub const TRAMPOLINE_VECTOR: u8 = 0x08;

// ============================================================================
// Hardware transport boundary
// ============================================================================

/// The interrupt-command-register operations the SMP layer needs from the
/// architecture. On x86 this is the local APIC plus the low-memory
/// trampoline page; tests substitute a recording double.
pub trait IcrTransport: Send + Sync {
    /// Deliver a fixed-vector IPI to `cpu`.
    fn send_ipi(&self, cpu: CpuId, vector: u8);

    /// Deliver an INIT IPI, resetting the target into wait-for-SIPI.
    fn send_init_ipi(&self, cpu: CpuId);

    /// Deliver a STARTUP IPI pointing at the trampoline page.
    fn send_startup_ipi(&self, cpu: CpuId, vector: u8);

    /// Stage the boot trampoline and per-CPU launch parameters for `cpu`.
    fn install_trampoline(&self, cpu: CpuId) -> Result<(), Errno>;

    /// Whether `cpu` has signalled arrival through its boot flag.
    fn read_boot_flag(&self, cpu: CpuId) -> bool;
}

// ============================================================================
// Cross-CPU function calls
// ============================================================================

/// Function invoked on the target CPU from IPI context. Must not block.
pub type IpiFn = fn(arg: usize);

/// One cross-CPU call request, shared between the sender and every target
/// through its reference count. `done` counts completed targets; a waiting
/// sender spins on it.
pub struct IpiCall {
    pub func: IpiFn,
    pub arg: usize,
    /// Target CPUs this call was posted to, including the sender if it
    /// was in the target mask.
    pub targets: usize,
    pub done: AtomicUsize,
}

impl IpiCall {
    pub(crate) fn new(func: IpiFn, arg: usize, targets: usize) -> Self {
        Self {
            func,
            arg,
            targets,
            done: AtomicUsize::new(0),
        }
    }

    /// Whether every target has run the function.
    pub fn is_complete(&self) -> bool {
        self.done.load(core::sync::atomic::Ordering::Acquire) >= self.targets
    }
}
