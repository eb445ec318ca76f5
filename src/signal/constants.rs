//! Signal numbers and property classes following Linux x86_64 conventions

use bitflags::bitflags;

// Standard signals (1-31)
pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9; // Cannot be caught or blocked
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGSTKFLT: u32 = 16;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19; // Cannot be caught or blocked
pub const SIGTSTP: u32 = 20;
pub const SIGTTIN: u32 = 21;
pub const SIGTTOU: u32 = 22;
pub const SIGURG: u32 = 23;
pub const SIGXCPU: u32 = 24;
pub const SIGXFSZ: u32 = 25;
pub const SIGVTALRM: u32 = 26;
pub const SIGPROF: u32 = 27;
pub const SIGWINCH: u32 = 28;
pub const SIGIO: u32 = 29;
pub const SIGPWR: u32 = 30;
pub const SIGSYS: u32 = 31;

// Real-time signals (32-64)
pub const SIGRTMIN: u32 = 32;
pub const SIGRTMAX: u32 = 64;

/// Maximum signal number supported
pub const NSIG: u32 = 64;

bitflags! {
    /// Immutable property classes of a signal number.
    ///
    /// Every signal carries a fixed set of these; the poster and the
    /// delivery engine branch on them when the disposition is default.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigProp: u8 {
        /// Default action terminates the process
        const KILL = 1 << 0;
        /// Default termination also produces a core dump
        const CORE = 1 << 1;
        /// Stop-class: default action suspends the process
        const STOP = 1 << 2;
        /// Continue-class: resumes a stopped process
        const CONT = 1 << 3;
        /// Default action is to ignore the signal
        const IGNORE = 1 << 4;
        /// Stop generated from the terminal (job control may discard it)
        const TTYSTOP = 1 << 5;
    }
}

/// Property classes for a signal number.
///
/// Reproduces the canonical POSIX assignment. Real-time signals default
/// to plain termination.
pub fn sig_properties(sig: u32) -> SigProp {
    match sig {
        SIGHUP | SIGINT | SIGPIPE | SIGALRM | SIGTERM | SIGUSR1 | SIGUSR2 | SIGSTKFLT
        | SIGVTALRM | SIGPROF | SIGIO | SIGPWR => SigProp::KILL,

        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGXCPU
        | SIGXFSZ | SIGSYS => SigProp::KILL.union(SigProp::CORE),

        SIGKILL => SigProp::KILL,

        SIGSTOP => SigProp::STOP,
        SIGTSTP | SIGTTIN | SIGTTOU => SigProp::STOP.union(SigProp::TTYSTOP),

        SIGCONT => SigProp::CONT.union(SigProp::IGNORE),

        SIGCHLD | SIGURG | SIGWINCH => SigProp::IGNORE,

        _ => SigProp::KILL,
    }
}

/// Convert signal number to bit mask
///
/// Returns 0 for invalid signal numbers (0 or > NSIG)
#[inline]
pub const fn sig_mask(sig: u32) -> u64 {
    if sig == 0 || sig > NSIG {
        0
    } else {
        1u64 << (sig - 1)
    }
}

/// Signals that cannot be caught, blocked, or ignored
pub const UNCATCHABLE_SIGNALS: u64 = sig_mask(SIGKILL) | sig_mask(SIGSTOP);

/// All stop-class signals
pub const STOP_SIGNALS: u64 =
    sig_mask(SIGSTOP) | sig_mask(SIGTSTP) | sig_mask(SIGTTIN) | sig_mask(SIGTTOU);

/// All continue-class signals
pub const CONT_SIGNALS: u64 = sig_mask(SIGCONT);

/// Synchronous fault signals whose default action the kernel enforces
/// even against a blocked or ignored disposition (the faulting
/// instruction would otherwise retrigger forever).
pub const FAULT_SIGNALS: u64 = sig_mask(SIGILL)
    | sig_mask(SIGTRAP)
    | sig_mask(SIGBUS)
    | sig_mask(SIGFPE)
    | sig_mask(SIGSEGV)
    | sig_mask(SIGSYS);

/// Check if a signal number is valid
#[inline]
pub const fn is_valid_signal(sig: u32) -> bool {
    sig > 0 && sig <= NSIG
}

/// Check if a signal can be caught/blocked
#[inline]
pub const fn is_catchable(sig: u32) -> bool {
    sig != SIGKILL && sig != SIGSTOP
}

/// Get signal name for debugging
pub fn signal_name(sig: u32) -> &'static str {
    match sig {
        SIGHUP => "SIGHUP",
        SIGINT => "SIGINT",
        SIGQUIT => "SIGQUIT",
        SIGILL => "SIGILL",
        SIGTRAP => "SIGTRAP",
        SIGABRT => "SIGABRT",
        SIGBUS => "SIGBUS",
        SIGFPE => "SIGFPE",
        SIGKILL => "SIGKILL",
        SIGUSR1 => "SIGUSR1",
        SIGSEGV => "SIGSEGV",
        SIGUSR2 => "SIGUSR2",
        SIGPIPE => "SIGPIPE",
        SIGALRM => "SIGALRM",
        SIGTERM => "SIGTERM",
        SIGSTKFLT => "SIGSTKFLT",
        SIGCHLD => "SIGCHLD",
        SIGCONT => "SIGCONT",
        SIGSTOP => "SIGSTOP",
        SIGTSTP => "SIGTSTP",
        SIGTTIN => "SIGTTIN",
        SIGTTOU => "SIGTTOU",
        SIGURG => "SIGURG",
        SIGXCPU => "SIGXCPU",
        SIGXFSZ => "SIGXFSZ",
        SIGVTALRM => "SIGVTALRM",
        SIGPROF => "SIGPROF",
        SIGWINCH => "SIGWINCH",
        SIGIO => "SIGIO",
        SIGPWR => "SIGPWR",
        SIGSYS => "SIGSYS",
        _ if sig >= SIGRTMIN && sig <= SIGRTMAX => "SIGRT",
        _ => "UNKNOWN",
    }
}
