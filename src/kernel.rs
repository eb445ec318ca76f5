//! Kernel context for the signal subsystem
//!
//! Bundles the process registry, the scheduler lock, the collaborator
//! hooks, and the deferred stop-sweep queue into one explicitly-passed
//! value. Nothing in this crate reaches for a global; embedders build a
//! `Kernel` at boot and tests build one per case.
//!
//! # Locking
//!
//! A single scheduler lock serializes every run-state transition and
//! pending/blocked-bitmask mutation. Functions that require it either
//! take a `&SchedGuard` witness or acquire it internally; any function
//! that can sleep drops the guard before calling the sleep collaborator.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::AtomicBool;

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::process::manager::ProcessTable;
use crate::process::process::{Pid, PsFlags};
use crate::process::thread::{Thread, Tid};
use crate::signal::coredump::{CoreFs, CoreWriter, CoredumpPolicy};
use crate::signal::disposition::SigActs;
use crate::signal::types::{SigInfo, SigSet};

/// Witness that the scheduler lock is held.
pub type SchedGuard<'a> = spin::MutexGuard<'a, ()>;

/// Channels the external sleep/wakeup primitive parks contexts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitChannel {
    /// Driver of a single-thread episode waiting out the countdown
    SingleThread(Pid),
    /// A parent (or tracer) waiting for child state changes
    ChildWait(Pid),
    /// A thread parked in Stopped or at an episode checkpoint
    ThreadPark(Tid),
    /// A thread parked in sigsuspend or sigtimedwait
    SigWait(Tid),
}

/// How a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Woken,
    TimedOut,
}

/// External interruptible-sleep primitive.
///
/// The scheduler integration is the embedder's business; this crate only
/// needs "park until woken". `sleep` may return spuriously - every wait
/// site in this crate loops on its predicate, so a cheap implementation
/// (periodic timeout, condvar without precise channel bookkeeping) is
/// acceptable.
pub trait SleepWake: Send + Sync {
    /// Park the calling context until `wakeup(chan)` or `timeout_ticks`
    /// elapses. Must be called with no kernel locks held.
    fn sleep(&self, chan: WaitChannel, timeout_ticks: Option<u64>) -> SleepOutcome;

    /// Wake every context parked on `chan`.
    fn wakeup(&self, chan: WaitChannel);
}

/// User-handler trampoline collaborator.
///
/// Building the user-stack frame and transferring control is
/// architecture-specific and lives outside this crate. The delivery
/// engine hands over everything the trampoline needs.
pub trait UserDelivery: Send + Sync {
    fn deliver_to_user(
        &self,
        td: &Arc<Thread>,
        handler: u64,
        signum: u32,
        restore_mask: SigSet,
        info: &SigInfo,
        on_alt_stack: bool,
    );
}

/// System-wide signal configuration.
pub struct KernelConfig {
    /// Placement policy for core dumps of privilege-elevated processes
    pub coredump: CoredumpPolicy,
    /// Directory the redirect policies dump into
    pub crash_dir: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            coredump: CoredumpPolicy::Refuse,
            crash_dir: String::from("/var/crash"),
        }
    }
}

/// Capacity of the stop-sweep fast path. Overflow degrades to a full
/// table scan, never to a lost notification.
const STOP_QUEUE_LEN: usize = 64;

/// The signal subsystem's view of the kernel.
pub struct Kernel {
    pub table: ProcessTable,
    sched: Mutex<()>,
    pub config: KernelConfig,
    pub(crate) sleep: Box<dyn SleepWake>,
    pub(crate) user: Box<dyn UserDelivery>,
    pub(crate) corefs: Box<dyn CoreFs>,
    pub(crate) writer: Box<dyn CoreWriter>,
    /// Processes with a stop report pending, coalesced and idempotent
    pub(crate) stop_queue: ArrayQueue<Pid>,
    pub(crate) stop_overflow: AtomicBool,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        sleep: Box<dyn SleepWake>,
        user: Box<dyn UserDelivery>,
        corefs: Box<dyn CoreFs>,
        writer: Box<dyn CoreWriter>,
    ) -> Kernel {
        Kernel {
            table: ProcessTable::new(),
            sched: Mutex::new(()),
            config,
            sleep,
            user,
            corefs,
            writer,
            stop_queue: ArrayQueue::new(STOP_QUEUE_LEN),
            stop_overflow: AtomicBool::new(false),
        }
    }

    /// Acquire the scheduler lock.
    pub(crate) fn sched_lock(&self) -> SchedGuard<'_> {
        self.sched.lock()
    }

    /// Tell an on-CPU thread it has signal work. The embedder's
    /// need-resched/IPI path hooks in here; the pending bits themselves
    /// are already visible, so nothing more is required for correctness.
    pub(crate) fn signotify(&self, td: &Arc<Thread>) {
        log::trace!("signotify: thread {}", td.id().as_u64());
    }

    /// Exec transition: the disposition table is unshared and reset, and
    /// a parent blocked on this child's exec (PPWAIT) is released.
    pub fn exec(&self, td: &Arc<Thread>) {
        let g = self.sched_lock();
        let proc = td.process();
        {
            let mut inner = proc.inner.lock();
            let acts = SigActs::unshared(&mut inner.sigacts);
            acts.exec_reset();
        }
        let parent = if proc.flags.take(PsFlags::PPWAIT) {
            proc.parent_pid()
        } else {
            None
        };
        drop(g);
        if let Some(pp) = parent {
            self.sleep.wakeup(WaitChannel::ChildWait(pp));
        }
    }
}
