//! Kernos concurrency core.
//!
//! This crate is the part of the Kernos kernel that reasons about true
//! concurrent execution: the process/thread scheduler with its per-CPU run
//! queues, the scheduler-domain load-balancing layer, the SMP bring-up and
//! inter-processor interrupt plumbing, and the blocking synchronization
//! primitives (mutex, semaphore, wait queue) built directly on the
//! scheduler's sleep/wake paths.
//!
//! Everything that touches hardware is a trait boundary: the interrupt
//! command register and the AP boot page sit behind [`smp::IcrTransport`],
//! and time behind [`time::TimeSource`]. The scheduler and SMP layers are
//! explicitly constructed context objects, never ambient statics, so the
//! whole contract runs deterministically on a host as well as on the metal.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod posix;
pub mod scheduler;
#[cfg(feature = "smp")]
pub mod smp;
pub mod sync;
pub mod time;

pub use posix::Errno;
pub use scheduler::{SchedPolicy, Scheduler, TaskId, TaskState};
