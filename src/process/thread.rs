//! Thread structure and per-thread signal state

use alloc::sync::{Arc, Weak};

use bitflags::bitflags;
use spin::Mutex;

use crate::kernel::WaitChannel;
use crate::process::process::Process;
use crate::signal::types::{AtomicSigSet, SigInfo, SigSet};

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u64);

impl Tid {
    pub fn new(id: u64) -> Self {
        Tid(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Thread run states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Ready to run, waiting for a CPU
    Runnable,
    /// Sleeping; a signal may interrupt the sleep
    SleepInterruptible,
    /// Sleeping; signals are recorded but cannot interrupt
    SleepUninterruptible,
    /// Suspended by job control or a single-thread episode
    Stopped,
    /// Currently executing on a CPU
    OnCpu,
    /// Terminated
    Dead,
}

impl RunState {
    #[inline]
    pub fn is_sleeping(self) -> bool {
        matches!(self, RunState::SleepInterruptible | RunState::SleepUninterruptible)
    }
}

bitflags! {
    /// Per-thread signal/scheduling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u32 {
        /// Parked in an interruptible sleep
        const SINTR = 1 << 0;
        /// Suspended by a stop signal
        const SUSPSIG = 1 << 1;
        /// Suspended for a single-thread episode
        const SUSPSINGLE = 1 << 2;
        /// A temporary sigsuspend mask is active
        const SIGSUSPEND = 1 << 3;
        /// Continued since the last stop was reported
        const CONTINUED = 1 << 4;
        /// Thread is on its way out; quiescing skips it
        const WEXIT = 1 << 5;
    }
}

/// Mutable per-thread signal state.
///
/// Every field is read and written under the kernel scheduler lock; the
/// per-thread mutex only arbitrates the memory, not the protocol.
#[derive(Debug)]
pub struct ThreadSigState {
    /// Signals whose delivery this thread is deferring
    pub blocked: SigSet,
    /// Mask saved across a temporary sigsuspend replacement
    pub saved_mask: Option<SigSet>,
    pub run_state: RunState,
    pub flags: ThreadFlags,
    /// Trap metadata stashed by a synchronous fault, consumed at delivery
    pub trap: Option<SigInfo>,
    /// Channel this thread's context is parked on, if any
    pub wchan: Option<WaitChannel>,
    /// Signals a parked sigtimedwait is interested in (empty otherwise)
    pub wait_set: SigSet,
    /// Run state to restore when a forced stop is released
    pub prior_state: Option<RunState>,
}

impl ThreadSigState {
    fn new() -> Self {
        ThreadSigState {
            blocked: SigSet::empty(),
            saved_mask: None,
            run_state: RunState::Runnable,
            flags: ThreadFlags::empty(),
            trap: None,
            wchan: None,
            wait_set: SigSet::empty(),
            prior_state: None,
        }
    }
}

/// A schedulable thread belonging to a process.
pub struct Thread {
    id: Tid,
    /// Back-reference to the owning process (non-owning)
    proc: Weak<Process>,
    /// Thread-directed pending signals
    pub pending: AtomicSigSet,
    /// Mutable signal state, scheduler lock required
    pub sig: Mutex<ThreadSigState>,
}

impl Thread {
    pub(crate) fn new(id: Tid, proc: &Arc<Process>) -> Arc<Thread> {
        Arc::new(Thread {
            id,
            proc: Arc::downgrade(proc),
            pending: AtomicSigSet::new(),
            sig: Mutex::new(ThreadSigState::new()),
        })
    }

    pub fn id(&self) -> Tid {
        self.id
    }

    /// The owning process. A thread must never outlive its process;
    /// hitting a dead back-reference means teardown ordering is broken.
    pub fn process(&self) -> Arc<Process> {
        self.proc
            .upgrade()
            .expect("thread outlived its owning process")
    }

    /// Snapshot of the blocked mask.
    pub fn blocked(&self) -> SigSet {
        self.sig.lock().blocked
    }

    /// Snapshot of the run state.
    pub fn run_state(&self) -> RunState {
        self.sig.lock().run_state
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread").field("id", &self.id).finish()
    }
}
