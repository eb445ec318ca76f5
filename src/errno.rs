//! Kernel error numbers
//!
//! Typed error codes for the signal subsystem. The embedding syscall layer
//! converts these to its negative-errno ABI; inside the kernel we match on
//! names instead of raw integers.

/// Error numbers returned by signal operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Operation not permitted (uid policy rejection)
    Eperm,
    /// No such process or thread
    Esrch,
    /// Interrupted (a signal arrived, or the thread was unwound for exit)
    Eintr,
    /// Resource temporarily unavailable (sigtimedwait timeout)
    Eagain,
    /// Out of memory during best-effort bookkeeping
    Enomem,
    /// Permission denied on a filesystem object (core dump target)
    Eacces,
    /// Invalid argument (bad signal number, configuring KILL/STOP)
    Einval,
    /// File too big (core size limit exceeded or set to zero)
    Efbig,
    /// The interrupted operation should be restarted transparently
    Erestart,
}

impl Errno {
    /// Conventional errno value for the embedding ABI.
    pub fn as_i32(self) -> i32 {
        match self {
            Errno::Eperm => 1,
            Errno::Esrch => 3,
            Errno::Eintr => 4,
            Errno::Eagain => 11,
            Errno::Enomem => 12,
            Errno::Eacces => 13,
            Errno::Einval => 22,
            Errno::Efbig => 27,
            // Kernel-internal restart indication, never visible to userspace
            Errno::Erestart => 512,
        }
    }
}
