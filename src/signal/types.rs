//! Signal-related data structures

use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::constants::*;

/// Fixed-size signal set; bit `n - 1` represents signal `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet(u64);

impl SigSet {
    /// The empty set
    pub const fn empty() -> Self {
        SigSet(0)
    }

    /// Set containing exactly `sig` (empty for invalid numbers)
    pub const fn from_sig(sig: u32) -> Self {
        SigSet(sig_mask(sig))
    }

    /// Set from a raw bit pattern
    pub const fn from_bits(bits: u64) -> Self {
        SigSet(bits)
    }

    /// Raw bit pattern
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, sig: u32) -> bool {
        self.0 & sig_mask(sig) != 0
    }

    #[inline]
    pub fn insert(&mut self, sig: u32) {
        self.0 |= sig_mask(sig);
    }

    #[inline]
    pub fn remove(&mut self, sig: u32) {
        self.0 &= !sig_mask(sig);
    }

    /// Lowest-numbered signal in the set
    pub fn lowest(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() + 1)
        }
    }
}

impl BitOr for SigSet {
    type Output = SigSet;
    fn bitor(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for SigSet {
    fn bitor_assign(&mut self, rhs: SigSet) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SigSet {
    type Output = SigSet;
    fn bitand(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 & rhs.0)
    }
}

impl BitAndAssign for SigSet {
    fn bitand_assign(&mut self, rhs: SigSet) {
        self.0 &= rhs.0;
    }
}

impl Not for SigSet {
    type Output = SigSet;
    fn not(self) -> SigSet {
        SigSet(!self.0)
    }
}

/// Pending-set storage with atomic test/set/clear.
///
/// Mutation happens under the scheduler lock; the atomic word keeps the
/// pending-bit write and any run-state change observable as one unit from
/// other CPUs.
#[derive(Debug, Default)]
pub struct AtomicSigSet(AtomicU64);

impl AtomicSigSet {
    pub const fn new() -> Self {
        AtomicSigSet(AtomicU64::new(0))
    }

    #[inline]
    pub fn load(&self) -> SigSet {
        SigSet(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn set(&self, sig: u32) {
        self.0.fetch_or(sig_mask(sig), Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self, sig: u32) {
        self.0.fetch_and(!sig_mask(sig), Ordering::SeqCst);
    }

    #[inline]
    pub fn contains(&self, sig: u32) -> bool {
        self.0.load(Ordering::SeqCst) & sig_mask(sig) != 0
    }

    #[inline]
    pub fn add_set(&self, set: SigSet) {
        self.0.fetch_or(set.bits(), Ordering::SeqCst);
    }

    #[inline]
    pub fn clear_set(&self, set: SigSet) {
        self.0.fetch_and(!set.bits(), Ordering::SeqCst);
    }

    #[inline]
    pub fn replace(&self, set: SigSet) {
        self.0.store(set.bits(), Ordering::SeqCst);
    }
}

bitflags! {
    /// Behavior flags for an installed signal action (sigaction sa_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SaFlags: u32 {
        /// Don't generate SIGCHLD when children stop
        const NOCLDSTOP = 0x0000_0001;
        /// Don't keep zombies; dying children are reaped automatically
        const NOCLDWAIT = 0x0000_0002;
        /// Deliver extended signal information to the handler
        const SIGINFO = 0x0000_0004;
        /// Run the handler on the alternate signal stack
        const ONSTACK = 0x0800_0000;
        /// Restart interrupted syscalls instead of failing them with EINTR
        const RESTART = 0x1000_0000;
        /// Don't block the signal itself while its handler runs
        const NODEFER = 0x4000_0000;
        /// Reset the disposition to default once the handler is taken
        const RESETHAND = 0x8000_0000;
    }
}

/// Configured reaction to one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigHandler {
    /// Kernel default action for the signal's property class
    #[default]
    Default,
    /// Discard the signal
    Ignore,
    /// Invoke the user handler at this address
    Catch(u64),
}

/// Per-signal action: handler, handler mask, and behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigAction {
    pub handler: SigHandler,
    /// Signals additionally blocked while the handler runs
    pub mask: SigSet,
    pub flags: SaFlags,
}

impl SigAction {
    #[inline]
    pub fn is_default(&self) -> bool {
        self.handler == SigHandler::Default
    }

    #[inline]
    pub fn is_ignore(&self) -> bool {
        self.handler == SigHandler::Ignore
    }
}

/// Alternate signal stack configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AltStack {
    /// Base address of the alternate stack
    pub base: u64,
    /// Size of the alternate stack in bytes
    pub size: usize,
    /// Stack is configured and may be used for ONSTACK handlers
    pub enabled: bool,
    /// True while a handler is executing on this stack
    pub on_stack: bool,
}

/// Metadata carried with a delivered signal.
///
/// For synchronous faults the trap fields describe the faulting
/// instruction; asynchronous signals leave them zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigInfo {
    pub signo: u32,
    /// Machine-independent reason code
    pub code: i32,
    /// Hardware trap number
    pub trapno: u32,
    /// Fault address or value
    pub sigval: u64,
}

impl SigInfo {
    /// Plain asynchronous signal info
    pub fn new(signo: u32) -> Self {
        SigInfo {
            signo,
            ..SigInfo::default()
        }
    }
}
