//! Signal posting
//!
//! Entry point for everything that sends a signal: thread-directed,
//! process-directed (with divert to an eligible thread), process group,
//! broadcast, and by-credential scans. Posting evaluates the target's
//! disposition, maintains the STOP/CONT mutual exclusion, and reacts to
//! the target thread's run state - all under the scheduler lock, so the
//! pending-bit write and any run-state change are one atomic step as
//! seen from other CPUs.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::errno::Errno;
use crate::kernel::{Kernel, SchedGuard, WaitChannel};
use crate::process::cred::Uid;
use crate::process::process::{Process, PsFlags};
use crate::process::thread::{RunState, Thread, ThreadFlags};
use crate::signal::constants::*;
use crate::signal::stop::{proc_stop, resume_thread, setrunnable};
use crate::signal::types::SigSet;

/// How a signal reaches its target thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    /// Process-directed; may be diverted to any eligible thread
    Process,
    /// Directed at one specific thread
    Thread,
    /// Copy fanned out to a sibling for a STOP/CONT transition
    Propagated,
}

/// Disposition the poster resolved for this signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Default,
    Hold,
    Catch,
}

/// Signals an unprivileged, uid-matching sender may deliver to a
/// privilege-elevated target.
const SUGID_PERMITTED: u64 = sig_mask(SIGKILL)
    | sig_mask(SIGINT)
    | sig_mask(SIGTERM)
    | sig_mask(SIGALRM)
    | sig_mask(SIGSTOP)
    | sig_mask(SIGTTIN)
    | sig_mask(SIGTTOU)
    | sig_mask(SIGTSTP)
    | sig_mask(SIGHUP)
    | sig_mask(SIGUSR1)
    | sig_mask(SIGUSR2);

/// Signal permission policy.
///
/// Superuser and same-process posts always pass; SIGCONT stays within
/// the session; privilege-elevated targets accept only a fixed signal
/// subset from uid-matching senders; everything else needs a
/// real/effective-vs-real/saved uid overlap.
pub fn can_signal(sender: &Arc<Process>, target: &Arc<Process>, signum: u32) -> bool {
    if sender.cred.is_superuser() {
        return true;
    }
    if Arc::ptr_eq(sender, target) {
        return true;
    }
    if signum == SIGCONT && sender.session() == target.session() {
        return true;
    }
    if target.flags.contains(PsFlags::SUGID) {
        if signum != 0 && SUGID_PERMITTED & sig_mask(signum) == 0 {
            return false;
        }
        return sender.cred.uid_match(&target.cred);
    }
    sender.cred.uid_overlap(&target.cred)
}

/// Post a process-directed signal.
///
/// `cur` is the posting thread, if any; a post from inside the target
/// process prefers the poster itself when it isn't blocking the signal.
pub fn post_to_process(kern: &Kernel, cur: Option<&Arc<Thread>>, proc: &Arc<Process>, signum: u32) {
    let g = kern.sched_lock();
    post_to_process_locked(kern, &g, cur, proc, signum);
}

/// Post a thread-directed signal.
pub fn post_to_thread(kern: &Kernel, td: &Arc<Thread>, signum: u32) {
    let g = kern.sched_lock();
    ptsignal_locked(kern, &g, &td.process(), Some(td), PostKind::Thread, signum);
}

pub(crate) fn post_to_process_locked(
    kern: &Kernel,
    g: &SchedGuard,
    cur: Option<&Arc<Thread>>,
    proc: &Arc<Process>,
    signum: u32,
) {
    let target = divert(cur, proc, signum);
    ptsignal_locked(kern, g, proc, target.as_ref(), PostKind::Process, signum);

    // Stop and continue transitions are visible to every thread, not just
    // the one the post landed on: fan the signal out as propagated copies.
    // The per-process flags keep the default side effects coalesced, so
    // only the triggering post is observable in them.
    let prop = sig_properties(signum);
    if prop.intersects(SigProp::STOP | SigProp::CONT) {
        for q in proc.threads() {
            let already = match &target {
                Some(t) => Arc::ptr_eq(t, &q),
                None => false,
            };
            if !already {
                ptsignal_locked(kern, g, proc, Some(&q), PostKind::Propagated, signum);
            }
        }
    }
}

/// Pick the thread a process-directed signal lands on.
///
/// Best effort: the calling thread if it belongs here and isn't blocking
/// the signal, else a sibling parked in a matching sigtimedwait, else any
/// sibling not blocking it. `None` leaves the signal pending on the
/// process until some thread unblocks it.
fn divert(cur: Option<&Arc<Thread>>, proc: &Arc<Process>, signum: u32) -> Option<Arc<Thread>> {
    if let Some(cur) = cur {
        if Arc::ptr_eq(&cur.process(), proc) {
            let ts = cur.sig.lock();
            if ts.run_state != RunState::Dead && !ts.blocked.contains(signum) {
                return Some(cur.clone());
            }
        }
    }
    let threads = proc.threads();
    let mut fallback = None;
    for q in &threads {
        let ts = q.sig.lock();
        if ts.run_state == RunState::Dead || ts.flags.contains(ThreadFlags::WEXIT) {
            continue;
        }
        if ts.blocked.contains(signum) {
            continue;
        }
        if ts.wait_set.contains(signum) && ts.run_state == RunState::SleepInterruptible {
            return Some(q.clone());
        }
        if fallback.is_none() {
            fallback = Some(q.clone());
        }
    }
    fallback
}

/// Core of the poster: record the signal and react to the target's run
/// state. `target == None` means every thread blocks the signal; it is
/// recorded process-wide with no state change.
pub(crate) fn ptsignal_locked(
    kern: &Kernel,
    g: &SchedGuard,
    proc: &Arc<Process>,
    target: Option<&Arc<Thread>>,
    kind: PostKind,
    signum: u32,
) {
    debug_assert!(is_valid_signal(signum));
    if proc.is_exiting() {
        return;
    }

    let prop = sig_properties(signum);
    let acts = proc.sigacts();
    let traced = proc.is_traced();

    let action = if traced {
        // The tracer observes everything; ignore/catch decisions wait
        // until the trace stop.
        Action::Default
    } else {
        if acts.ignore_set().contains(signum) && signum != SIGCONT {
            log::trace!(
                "{} ignored by pid {}, dropped",
                signal_name(signum),
                proc.id().as_u64()
            );
            return;
        }
        let blocked = match target {
            Some(t) => t.sig.lock().blocked.contains(signum),
            None => true,
        };
        if blocked {
            Action::Hold
        } else if acts.catch_set().contains(signum) {
            Action::Catch
        } else {
            Action::Default
        }
    };

    // A continue wipes pending stops and vice versa; a stop also clears
    // the continued-since-last-wait marker.
    if prop.contains(SigProp::CONT) {
        let stops = SigSet::from_bits(STOP_SIGNALS);
        proc.pending.clear_set(stops);
        for q in proc.threads() {
            q.pending.clear_set(stops);
        }
    }
    if prop.contains(SigProp::STOP) {
        let conts = SigSet::from_bits(CONT_SIGNALS);
        proc.pending.clear_set(conts);
        for q in proc.threads() {
            q.pending.clear_set(conts);
        }
        proc.flags.clear(PsFlags::CONTINUED);
    }

    let Some(td) = target else {
        proc.pending.set(signum);
        return;
    };
    td.pending.set(signum);

    log::debug!(
        "{} posted to pid {} tid {} ({:?}, {:?})",
        signal_name(signum),
        proc.id().as_u64(),
        td.id().as_u64(),
        kind,
        action
    );

    let mut ts = td.sig.lock();

    // Held signals stay recorded with no state change - except that a
    // held continue must still lift a stopped process.
    if action == Action::Hold && !(prop.contains(SigProp::CONT) && ts.run_state == RunState::Stopped)
    {
        return;
    }

    match ts.run_state {
        RunState::SleepUninterruptible => {
            // Recorded; the sleep finishes on its own terms.
        }
        RunState::SleepInterruptible => {
            if traced {
                // The debugger must get a chance to observe it.
                setrunnable(kern, g, td, &mut ts);
            } else if action == Action::Default && prop.contains(SigProp::CONT) {
                // Continuing a process that isn't stopped means nothing.
                td.pending.clear(signum);
            } else if action == Action::Default && prop.contains(SigProp::STOP) {
                if proc.flags.contains(PsFlags::PPWAIT) {
                    // Parent is waiting on our exec; stopping now would
                    // deadlock the pair. Leave the signal pending.
                } else {
                    td.pending.clear(signum);
                    drop(ts);
                    proc_stop(kern, g, td, signum);
                }
            } else {
                setrunnable(kern, g, td, &mut ts);
            }
        }
        RunState::Stopped => {
            if signum == SIGKILL {
                ts.flags.remove(ThreadFlags::SUSPSIG);
                setrunnable(kern, g, td, &mut ts);
            } else if prop.contains(SigProp::CONT) {
                proc.flags.set(PsFlags::CONTINUED);
                if action == Action::Default {
                    // Nothing to deliver, the resume itself is the effect.
                    td.pending.clear(signum);
                }
                if !ts.flags.contains(ThreadFlags::SUSPSINGLE) {
                    ts.flags.remove(ThreadFlags::SUSPSIG);
                    ts.flags.insert(ThreadFlags::CONTINUED);
                    resume_thread(kern, g, td, &mut ts);
                }
                if kind != PostKind::Propagated {
                    if let Some(pp) = proc.parent_pid() {
                        kern.sleep.wakeup(WaitChannel::ChildWait(pp));
                    }
                }
            } else if prop.contains(SigProp::STOP) {
                // Already stopped; a duplicate stop is a no-op.
                td.pending.clear(signum);
            } else {
                // Recorded; delivered once the process continues.
            }
        }
        RunState::OnCpu | RunState::Runnable => kern.signotify(td),
        RunState::Dead => {}
    }
}

/// Is any unblocked signal pending on this thread? Caller holds the
/// scheduler lock.
pub(crate) fn signal_pending_locked(td: &Arc<Thread>) -> bool {
    let proc = td.process();
    let blocked = td.sig.lock().blocked;
    let pending = td.pending.load() | proc.pending.load();
    !(pending & !blocked).is_empty()
}

fn scan_targets(
    kern: &Kernel,
    sender: &Arc<Process>,
    candidates: Vec<Arc<Process>>,
    signum: u32,
) -> Result<(), Errno> {
    if candidates.is_empty() {
        return Err(Errno::Esrch);
    }
    let mut permitted = 0usize;
    let g = kern.sched_lock();
    for target in &candidates {
        if target.id().as_u64() <= 1 || target.flags.contains(PsFlags::SYSTEM) {
            continue;
        }
        if !can_signal(sender, target, signum) {
            continue;
        }
        permitted += 1;
        if signum != 0 {
            post_to_process_locked(kern, &g, None, target, signum);
        }
    }
    drop(g);
    if permitted > 0 {
        Ok(())
    } else {
        Err(Errno::Eperm)
    }
}

/// Signal every member of a process group.
pub fn signal_group(kern: &Kernel, td: &Arc<Thread>, pgid: crate::process::process::Pid, signum: u32) -> Result<(), Errno> {
    let sender = td.process();
    scan_targets(kern, &sender, kern.table.pgrp_members(pgid), signum)
}

/// Broadcast to every process except system processes, pid 1 and below,
/// and the sender itself.
pub fn signal_broadcast(kern: &Kernel, td: &Arc<Thread>, signum: u32) -> Result<(), Errno> {
    let sender = td.process();
    let candidates = kern
        .table
        .processes()
        .into_iter()
        .filter(|p| !Arc::ptr_eq(p, &sender))
        .collect();
    scan_targets(kern, &sender, candidates, signum)
}

/// Signal every process whose real uid matches.
pub fn signal_by_credential(kern: &Kernel, td: &Arc<Thread>, uid: Uid, signum: u32) -> Result<(), Errno> {
    let sender = td.process();
    let candidates = kern
        .table
        .processes()
        .into_iter()
        .filter(|p| p.cred.uid == uid)
        .collect();
    scan_targets(kern, &sender, candidates, signum)
}
