//! Signal delivery at the kernel/user boundary
//!
//! The trap/syscall-return path must call [`drain_at_boundary`] before
//! resuming user code: it runs the single-thread checkpoint, then loops
//! picking the next deliverable signal and acting on it - invoking the
//! user handler through the trampoline collaborator or taking the
//! default action.

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::kernel::{Kernel, WaitChannel};
use crate::process::process::PsFlags;
use crate::process::thread::{RunState, Thread, ThreadFlags};
use crate::signal::constants::*;
use crate::signal::coredump::sig_exit;
use crate::signal::disposition::SigActs;
use crate::signal::post::post_to_thread;
use crate::signal::single_thread::single_thread_check;
use crate::signal::stop::{park_while_stopped, proc_stop};
use crate::signal::types::{SaFlags, SigAction, SigHandler, SigInfo, SigSet};

/// Pick, and consume, the next deliverable signal for this thread.
///
/// KILL always goes first; otherwise the lowest pending-and-unblocked
/// number wins, the thread's own set ahead of the process set. Stop-class
/// defaults, trace stops, and droppable signals are resolved inside the
/// loop; only signals that need a termination or a user handler escape.
pub fn next_deliverable(kern: &Kernel, td: &Arc<Thread>) -> Option<u32> {
    let proc = td.process();
    loop {
        let mut signum;
        {
            let _g = kern.sched_lock();
            if proc.is_exiting() {
                // Teardown owns the remaining signals.
                return None;
            }
            let ts = td.sig.lock();
            if ts.run_state == RunState::Dead {
                return None;
            }
            let blocked = ts.blocked;
            drop(ts);
            let mut mask = (td.pending.load() | proc.pending.load()) & !blocked;
            if proc.flags.contains(PsFlags::PPWAIT) {
                // Stopping now would deadlock against the waiting parent.
                mask &= !SigSet::from_bits(STOP_SIGNALS);
            }
            signum = if mask.contains(SIGKILL) {
                SIGKILL
            } else {
                match mask.lowest() {
                    Some(s) => s,
                    None => return None,
                }
            };
            if td.pending.contains(signum) {
                td.pending.clear(signum);
            } else {
                proc.pending.clear(signum);
            }
        }

        if proc.is_traced() && !proc.flags.contains(PsFlags::PPWAIT) {
            // Every signal stops a traced process; the tracer decides
            // what (if anything) is actually delivered.
            {
                let g = kern.sched_lock();
                proc_stop(kern, &g, td, signum);
            }
            if let Some(pp) = proc.parent_pid() {
                kern.sleep.wakeup(WaitChannel::ChildWait(pp));
            }
            park_while_stopped(kern, td);

            signum = proc.inner.lock().xsig;
            if signum == 0 {
                continue;
            }
            // The tracer may have swapped in a signal we currently block.
            if td.sig.lock().blocked.contains(signum) {
                td.pending.set(signum);
                continue;
            }
        }

        let prop = sig_properties(signum);
        let acts = proc.sigacts();
        match acts.action(signum).handler {
            SigHandler::Default => {
                if proc.id().as_u64() <= 1 {
                    // Init and below shrug off everything they don't catch.
                    log::warn!(
                        "{} dropped for pid {}",
                        signal_name(signum),
                        proc.id().as_u64()
                    );
                    continue;
                }
                if prop.contains(SigProp::STOP) {
                    if proc.is_traced() {
                        // The tracer chose to leave it; it already saw it.
                        continue;
                    }
                    if prop.contains(SigProp::TTYSTOP) && kern.table.pgrp_orphaned(proc.pgid()) {
                        // Nobody is left to continue an orphaned group.
                        continue;
                    }
                    {
                        let g = kern.sched_lock();
                        proc_stop(kern, &g, td, signum);
                    }
                    park_while_stopped(kern, td);
                    continue;
                }
                if prop.contains(SigProp::IGNORE) {
                    continue;
                }
                return Some(signum);
            }
            SigHandler::Ignore => {
                // Normally filtered at post time; a tracer verdict can
                // still route an ignored signal here.
                log::debug!(
                    "{} ignored at delivery by pid {}",
                    signal_name(signum),
                    proc.id().as_u64()
                );
                continue;
            }
            SigHandler::Catch(_) => return Some(signum),
        }
    }
}

/// Compute the handler handoff for a caught signal: the mask to restore
/// on return, the new blocked mask, reset-on-catch, and the siginfo.
/// Scheduler lock held by the caller.
fn prepare_catch(
    td: &Arc<Thread>,
    acts: &Arc<SigActs>,
    action: SigAction,
    signum: u32,
    stash: Option<SigInfo>,
) -> (u64, SigSet, SigInfo, bool) {
    let SigHandler::Catch(handler) = action.handler else {
        panic!("prepare_catch on a non-caught signal");
    };
    let mut ts = td.sig.lock();
    let restore_mask = if ts.flags.contains(ThreadFlags::SIGSUSPEND) {
        ts.flags.remove(ThreadFlags::SIGSUSPEND);
        ts.saved_mask.take().unwrap_or(ts.blocked)
    } else {
        ts.blocked
    };
    let mut newmask = ts.blocked | action.mask;
    if !action.flags.contains(SaFlags::NODEFER) {
        newmask.insert(signum);
    }
    ts.blocked = newmask & !SigSet::from_bits(UNCATCHABLE_SIGNALS);
    let info = match stash {
        Some(info) => info,
        None => match ts.trap.take() {
            Some(stored) if stored.signo == signum => stored,
            other => {
                ts.trap = other;
                SigInfo::new(signum)
            }
        },
    };
    drop(ts);
    let on_alt_stack = action.flags.contains(SaFlags::ONSTACK) && acts.alt_stack().enabled;
    if action.flags.contains(SaFlags::RESETHAND) {
        acts.reset_to_default(signum);
    }
    (handler, restore_mask, info, on_alt_stack)
}

/// Deliver one signal: invoke the user handler or take the default
/// action. The default action of anything that reaches here terminates
/// the process (through the core-dump orchestrator) and does not return
/// to user code.
pub fn deliver(kern: &Kernel, td: &Arc<Thread>, signum: u32) {
    assert!(signum != 0, "delivering signal 0");
    let proc = td.process();
    let acts = proc.sigacts();
    let action = acts.action(signum);

    let handoff = {
        let _g = kern.sched_lock();
        // Cleared by next_deliverable already; clearing again keeps a
        // direct caller honest.
        td.pending.clear(signum);
        proc.pending.clear(signum);
        match action.handler {
            SigHandler::Catch(_) => Some(prepare_catch(td, &acts, action, signum, None)),
            SigHandler::Default => None,
            SigHandler::Ignore => panic!("delivering an ignored signal"),
        }
    };

    match handoff {
        Some((handler, restore_mask, info, on_alt_stack)) => {
            log::debug!(
                "delivering {} to tid {}, handler {:#x}",
                signal_name(signum),
                td.id().as_u64(),
                handler
            );
            kern.user
                .deliver_to_user(td, handler, signum, restore_mask, &info, on_alt_stack);
        }
        None => sig_exit(kern, td, signum),
    }
}

/// React to a synchronous fault raised by this thread.
///
/// Caught-and-unblocked faults are delivered on the spot, bypassing the
/// pending set, so the return to user space doesn't immediately re-fault.
/// A fault whose disposition would suppress it (blocked, ignored, or
/// plain default) is fatal right now - masking a segfault is not a way
/// to survive it. Anything else is stashed and posted thread-directed.
pub fn handle_trap(kern: &Kernel, td: &Arc<Thread>, signum: u32, trapno: u32, code: i32, sigval: u64) {
    debug_assert!(is_valid_signal(signum));
    let proc = td.process();
    let acts = proc.sigacts();
    let info = SigInfo {
        signo: signum,
        code,
        trapno,
        sigval,
    };
    let traced = proc.is_traced();
    let is_fault = FAULT_SIGNALS & sig_mask(signum) != 0;

    enum Decision {
        Sync((u64, SigSet, SigInfo, bool)),
        ForcedKill,
        Post,
    }

    let decision = {
        let _g = kern.sched_lock();
        let blocked = td.sig.lock().blocked.contains(signum);
        let caught = acts.catch_set().contains(signum);
        let ignored = acts.ignore_set().contains(signum);
        if !traced && caught && !blocked {
            let action = acts.action(signum);
            Decision::Sync(prepare_catch(td, &acts, action, signum, Some(info)))
        } else if !traced && is_fault && (blocked || ignored || !caught) {
            Decision::ForcedKill
        } else {
            Decision::Post
        }
    };

    match decision {
        Decision::Sync((handler, restore_mask, info, on_alt_stack)) => {
            log::debug!(
                "synchronous {} delivered to tid {}",
                signal_name(signum),
                td.id().as_u64()
            );
            kern.user
                .deliver_to_user(td, handler, signum, restore_mask, &info, on_alt_stack);
        }
        Decision::ForcedKill => {
            log::info!(
                "tid {} took {} with suppressed disposition, forcing termination",
                td.id().as_u64(),
                signal_name(signum)
            );
            td.sig.lock().trap = Some(info);
            sig_exit(kern, td, signum);
        }
        Decision::Post => {
            td.sig.lock().trap = Some(info);
            post_to_thread(kern, td, signum);
        }
    }
}

/// Drain every deliverable signal before returning to user code.
///
/// Runs the single-thread checkpoint first (propagating its unwind and
/// exit indications), then alternates delivery with the sigsuspend mask
/// restore: once the drain runs dry, a still-armed temporary mask is
/// swapped back and the drain runs once more, since the restored mask
/// may expose newly deliverable signals.
pub fn drain_at_boundary(kern: &Kernel, td: &Arc<Thread>) -> Result<(), Errno> {
    single_thread_check(kern, td, false)?;
    loop {
        while let Some(signum) = next_deliverable(kern, td) {
            deliver(kern, td, signum);
            if td.run_state() == RunState::Dead {
                return Ok(());
            }
        }
        let restored = {
            let _g = kern.sched_lock();
            let mut ts = td.sig.lock();
            if ts.flags.contains(ThreadFlags::SIGSUSPEND) {
                ts.flags.remove(ThreadFlags::SIGSUSPEND);
                if let Some(mask) = ts.saved_mask.take() {
                    ts.blocked = mask;
                }
                true
            } else {
                false
            }
        };
        if !restored {
            return Ok(());
        }
    }
}
