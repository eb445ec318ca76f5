//! Process structure and per-process signal state

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use crate::process::cred::Credentials;
use crate::process::thread::{RunState, Thread, Tid};
use crate::signal::disposition::SigActs;
use crate::signal::single_thread::SingleThreadEpisode;
use crate::signal::types::AtomicSigSet;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u64);

impl Pid {
    pub fn new(id: u64) -> Self {
        Pid(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Per-process lifecycle and signal flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PsFlags: u32 {
        /// Process is terminating; no further signals are accepted
        const EXITING = 1 << 0;
        /// A core dump is in progress
        const COREDUMP = 1 << 1;
        /// Stopped; parent notification sweep still pending
        const STOPPED = 1 << 2;
        /// Continued since the last wait
        const CONTINUED = 1 << 3;
        /// Parent is blocked on this child's exec; stop signals defer
        const PPWAIT = 1 << 4;
        /// A debugger is attached
        const TRACED = 1 << 5;
        /// Parent already collected the last stop report
        const WAITED = 1 << 6;
        /// Privilege-elevated (set-id) execution history
        const SUGID = 1 << 7;
        /// Kernel-internal process; group/broadcast scans skip it
        const SYSTEM = 1 << 8;
        /// Don't post SIGCHLD to this process when its children stop
        const NOCLDSTOP = 1 << 9;
        /// Don't keep zombies; dying children reparent to the reaper
        const NOCLDWAIT = 1 << 10;
    }
}

/// Atomic flag word: lock-free reads, writes under the scheduler lock.
#[derive(Debug, Default)]
pub struct AtomicPsFlags(AtomicU32);

impl AtomicPsFlags {
    pub const fn new() -> Self {
        AtomicPsFlags(AtomicU32::new(0))
    }

    #[inline]
    pub fn load(&self) -> PsFlags {
        PsFlags::from_bits_truncate(self.0.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn set(&self, flags: PsFlags) {
        self.0.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self, flags: PsFlags) {
        self.0.fetch_and(!flags.bits(), Ordering::SeqCst);
    }

    #[inline]
    pub fn contains(&self, flags: PsFlags) -> bool {
        self.load().contains(flags)
    }

    /// Clear `flags` and report whether any of them were set.
    pub fn take(&self, flags: PsFlags) -> bool {
        let old = self.0.fetch_and(!flags.bits(), Ordering::SeqCst);
        old & flags.bits() != 0
    }
}

/// Termination status of a signal-killed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Signal that terminated the process
    pub signum: u32,
    /// A core dump was produced
    pub core: bool,
}

/// Resource limits the signal subsystem consults.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum core dump size in bytes; zero forbids dumps entirely
    pub core_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            core_size: u64::MAX,
        }
    }
}

/// Mutable process state, scheduler lock required.
pub struct ProcessInner {
    pub parent: Option<Pid>,
    /// Process group (job control)
    pub pgid: Pid,
    /// Session the group belongs to
    pub session: Pid,
    /// All threads; the main thread is first
    pub threads: Vec<Arc<Thread>>,
    /// Shared signal disposition table
    pub sigacts: Arc<SigActs>,
    /// Active single-thread episode, if any
    pub single: Option<SingleThreadEpisode>,
    /// Signal slot the tracer reads and rewrites at a trace stop
    pub xsig: u32,
    pub exit_status: Option<ExitStatus>,
    pub limits: Limits,
}

/// A process: signal-visible identity, credentials, and thread group.
pub struct Process {
    id: Pid,
    pub name: String,
    pub cred: Credentials,
    /// Process-directed pending signals
    pub pending: AtomicSigSet,
    pub flags: AtomicPsFlags,
    pub inner: Mutex<ProcessInner>,
}

impl Process {
    pub(crate) fn new(
        id: Pid,
        name: String,
        cred: Credentials,
        parent: Option<Pid>,
        pgid: Pid,
        session: Pid,
        sigacts: Arc<SigActs>,
    ) -> Arc<Process> {
        Arc::new(Process {
            id,
            name,
            cred,
            pending: AtomicSigSet::new(),
            flags: AtomicPsFlags::new(),
            inner: Mutex::new(ProcessInner {
                parent,
                pgid,
                session,
                threads: Vec::new(),
                sigacts,
                single: None,
                xsig: 0,
                exit_status: None,
                limits: Limits::default(),
            }),
        })
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    /// Snapshot of the thread list.
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.inner.lock().threads.clone()
    }

    /// The main (first) thread.
    pub fn main_thread(&self) -> Arc<Thread> {
        self.inner.lock().threads[0].clone()
    }

    /// Find a thread by id.
    pub fn find_thread(&self, tid: Tid) -> Option<Arc<Thread>> {
        self.inner
            .lock()
            .threads
            .iter()
            .find(|t| t.id() == tid)
            .cloned()
    }

    /// Live (non-dead) thread count.
    pub fn live_threads(&self) -> usize {
        self.inner
            .lock()
            .threads
            .iter()
            .filter(|t| t.run_state() != RunState::Dead)
            .count()
    }

    /// Current disposition table handle.
    pub fn sigacts(&self) -> Arc<SigActs> {
        self.inner.lock().sigacts.clone()
    }

    pub fn parent_pid(&self) -> Option<Pid> {
        self.inner.lock().parent
    }

    pub fn pgid(&self) -> Pid {
        self.inner.lock().pgid
    }

    pub fn session(&self) -> Pid {
        self.inner.lock().session
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().exit_status
    }

    #[inline]
    pub fn is_traced(&self) -> bool {
        self.flags.contains(PsFlags::TRACED)
    }

    #[inline]
    pub fn is_exiting(&self) -> bool {
        self.flags.contains(PsFlags::EXITING)
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
