//! POSIX error numbers surfaced by the concurrency core.
//!
//! None of this subsystem is directly exposed to user space; these codes
//! travel through the syscalls written against it (a blocked `read()`
//! returning `EINTR` because the underlying wait was interrupted, and so
//! on). Numeric values match Linux.

/// POSIX style error numbers (the subset this subsystem reports).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted (unlock by a non-owner).
    EPERM = 1,
    /// No such process (stale task handle).
    ESRCH = 3,
    /// Try again (trywait on an empty semaphore).
    EAGAIN = 11,
    /// Out of memory (task table full).
    ENOMEM = 12,
    /// Device or resource busy (trylock on a held mutex).
    EBUSY = 16,
    /// Invalid argument.
    EINVAL = 22,
    /// No space left (domain/group table full).
    ENOSPC = 28,
    /// Resource deadlock would occur (re-entrant mutex lock).
    EDEADLK = 35,
    /// Timed out (AP never signalled the boot flag).
    ETIMEDOUT = 110,
    /// Interrupted by a signal; the syscall layer restarts the call.
    ERESTARTSYS = 512,
}

impl Errno {
    /// Raw errno value as stored in a syscall return slot.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Errno::EPERM => "EPERM",
            Errno::ESRCH => "ESRCH",
            Errno::EAGAIN => "EAGAIN",
            Errno::ENOMEM => "ENOMEM",
            Errno::EBUSY => "EBUSY",
            Errno::EINVAL => "EINVAL",
            Errno::ENOSPC => "ENOSPC",
            Errno::EDEADLK => "EDEADLK",
            Errno::ETIMEDOUT => "ETIMEDOUT",
            Errno::ERESTARTSYS => "ERESTARTSYS",
        };
        f.write_str(name)
    }
}
