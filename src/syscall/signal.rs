//! Signal-related call contracts
//!
//! The thin surface the embedding syscall layer drives:
//! - sigaction(sig, act) - get/set disposition
//! - sigprocmask(how, set) - get/set the blocked mask
//! - sigpending() - query the pending sets
//! - sigsuspend(mask) - replace the mask until one signal arrives
//! - sigaltstack(stack) - get/set the alternate stack
//! - kill(target, sig) - all target encodings
//! - sigtimedwait(set, timeout) - wait for one of a set
//!
//! User-pointer marshalling is the embedder's business; these functions
//! speak plain values.

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::kernel::{Kernel, WaitChannel};
use crate::process::process::Pid;
use crate::process::thread::{RunState, Thread, ThreadFlags, Tid};
use crate::signal::constants::*;
use crate::signal::disposition::set_signal_action;
use crate::signal::post;
use crate::signal::stop::interruptible_sleep;
use crate::signal::types::{AltStack, SigAction, SigInfo, SigSet};

/// `kill` targets at or above this encode a thread id (tid = target -
/// offset) within the caller's own process.
pub const THREAD_PID_OFFSET: u64 = 100_000;

/// How sigprocmask combines the given set with the current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum How {
    Block,
    Unblock,
    SetMask,
}

/// Get (and optionally replace) the action for a signal.
pub fn sys_sigaction(
    kern: &Kernel,
    td: &Arc<Thread>,
    signum: u32,
    new: Option<SigAction>,
) -> Result<SigAction, Errno> {
    if !is_valid_signal(signum) {
        return Err(Errno::Einval);
    }
    match new {
        Some(action) => set_signal_action(kern, td, signum, action),
        // Querying KILL/STOP is fine; they just never leave default.
        None => Ok(td.process().sigacts().action(signum)),
    }
}

/// Get (and optionally adjust) the blocked mask. KILL and STOP silently
/// stay out of any new mask.
pub fn sys_sigprocmask(
    kern: &Kernel,
    td: &Arc<Thread>,
    how: How,
    set: Option<SigSet>,
) -> Result<SigSet, Errno> {
    let _g = kern.sched_lock();
    let mut ts = td.sig.lock();
    let old = ts.blocked;
    if let Some(set) = set {
        let uncatchable = SigSet::from_bits(UNCATCHABLE_SIGNALS);
        ts.blocked = match how {
            How::Block => ts.blocked | (set & !uncatchable),
            How::Unblock => ts.blocked & !set,
            How::SetMask => set & !uncatchable,
        };
    }
    Ok(old)
}

/// Union of the thread- and process-directed pending sets.
pub fn sys_sigpending(kern: &Kernel, td: &Arc<Thread>) -> SigSet {
    let _g = kern.sched_lock();
    td.pending.load() | td.process().pending.load()
}

/// Replace the mask until a signal arrives.
///
/// Always "fails" with EINTR once a deliverable signal is pending. The
/// boundary drain delivers the signal with the saved mask as the
/// handler's restore mask and swaps the original back afterwards - an
/// exact round trip when nothing was delivered at all.
pub fn sys_sigsuspend(kern: &Kernel, td: &Arc<Thread>, mask: SigSet) -> Errno {
    {
        let _g = kern.sched_lock();
        let mut ts = td.sig.lock();
        ts.saved_mask = Some(ts.blocked);
        ts.flags.insert(ThreadFlags::SIGSUSPEND);
        ts.blocked = mask & !SigSet::from_bits(UNCATCHABLE_SIGNALS);
    }
    loop {
        {
            let _g = kern.sched_lock();
            if post::signal_pending_locked(td) {
                break;
            }
            if td.sig.lock().run_state == RunState::Dead {
                break;
            }
        }
        interruptible_sleep(kern, td, WaitChannel::SigWait(td.id()), None);
    }
    Errno::Eintr
}

/// Get (and optionally replace) the alternate signal stack.
pub fn sys_sigaltstack(
    kern: &Kernel,
    td: &Arc<Thread>,
    new: Option<AltStack>,
) -> Result<AltStack, Errno> {
    let _g = kern.sched_lock();
    let acts = td.process().sigacts();
    let old = acts.alt_stack();
    if let Some(stack) = new {
        if old.on_stack {
            // Can't rewire the stack a handler is running on.
            return Err(Errno::Eperm);
        }
        acts.set_alt_stack(stack);
    }
    Ok(old)
}

/// Send a signal.
///
/// Target encodings: `> 0` a process (or, offset-encoded, a thread of
/// the caller's process), `0` the caller's process group, `-1`
/// broadcast, `< -1` the process group `-target`. Signal 0 probes
/// permissions without posting.
pub fn sys_kill(kern: &Kernel, td: &Arc<Thread>, target: i64, signum: u32) -> Result<(), Errno> {
    if signum > NSIG {
        return Err(Errno::Einval);
    }
    if target > 0 {
        if target as u64 >= THREAD_PID_OFFSET {
            let tid = Tid::new(target as u64 - THREAD_PID_OFFSET);
            let proc = td.process();
            let Some(q) = proc.find_thread(tid) else {
                return Err(Errno::Esrch);
            };
            if signum != 0 {
                post::post_to_thread(kern, &q, signum);
            }
            Ok(())
        } else {
            let Some(target_proc) = kern.table.get(Pid::new(target as u64)) else {
                return Err(Errno::Esrch);
            };
            if target_proc.exit_status().is_some() {
                return Err(Errno::Esrch);
            }
            let sender = td.process();
            if !post::can_signal(&sender, &target_proc, signum) {
                log::warn!(
                    "pid {} denied sending {} to pid {}",
                    sender.id().as_u64(),
                    signal_name(signum),
                    target_proc.id().as_u64()
                );
                return Err(Errno::Eperm);
            }
            if signum != 0 {
                post::post_to_process(kern, Some(td), &target_proc, signum);
            }
            Ok(())
        }
    } else if target == 0 {
        post::signal_group(kern, td, td.process().pgid(), signum)
    } else if target == -1 {
        post::signal_broadcast(kern, td, signum)
    } else {
        post::signal_group(kern, td, Pid::new((-target) as u64), signum)
    }
}

/// Wait for one signal out of `set`, returning its metadata.
///
/// The wait set is visible to the poster, which prefers threads parked
/// here when diverting a process-directed signal. EAGAIN on timeout;
/// EINTR when some other, unblocked signal arrives first.
pub fn sys_sigtimedwait(
    kern: &Kernel,
    td: &Arc<Thread>,
    set: SigSet,
    timeout_ticks: Option<u64>,
) -> Result<SigInfo, Errno> {
    let set = set & !SigSet::from_bits(UNCATCHABLE_SIGNALS);
    if set.is_empty() {
        return Err(Errno::Einval);
    }
    let proc = td.process();
    loop {
        {
            let _g = kern.sched_lock();
            let avail = (td.pending.load() | proc.pending.load()) & set;
            if let Some(signum) = avail.lowest() {
                if td.pending.contains(signum) {
                    td.pending.clear(signum);
                } else {
                    proc.pending.clear(signum);
                }
                let mut ts = td.sig.lock();
                ts.wait_set = SigSet::empty();
                let info = match ts.trap.take() {
                    Some(stored) if stored.signo == signum => stored,
                    other => {
                        ts.trap = other;
                        SigInfo::new(signum)
                    }
                };
                return Ok(info);
            }
            let mut ts = td.sig.lock();
            if ts.run_state == RunState::Dead {
                return Err(Errno::Eintr);
            }
            let others = (td.pending.load() | proc.pending.load()) & !ts.blocked & !set;
            if !others.is_empty() {
                ts.wait_set = SigSet::empty();
                return Err(Errno::Eintr);
            }
            ts.wait_set = set;
        }
        let out = interruptible_sleep(kern, td, WaitChannel::SigWait(td.id()), timeout_ticks);
        if out == crate::kernel::SleepOutcome::TimedOut {
            let _g = kern.sched_lock();
            td.sig.lock().wait_set = SigSet::empty();
            return Err(Errno::Eagain);
        }
    }
}
