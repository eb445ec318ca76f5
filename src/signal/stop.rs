//! Stop/continue control and run-state helpers
//!
//! The stop controller owns the run-state transitions shared by job
//! control, trace stops, and the single-thread coordinator: making a
//! thread runnable, parking the calling context, recording a stop, and
//! the deferred parent-notification sweep.
//!
//! The sweep is coalesced: stopping marks the process and enqueues its
//! pid; running the sweep clears the mark, posts SIGCHLD to the parent,
//! and wakes the parent's wait. Re-running it is always safe.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::kernel::{Kernel, SchedGuard, SleepOutcome, WaitChannel};
use crate::process::process::{Process, PsFlags};
use crate::process::thread::{RunState, Thread, ThreadFlags, ThreadSigState};
use crate::signal::constants::SIGCHLD;
use crate::signal::post;

/// Make a thread runnable and wake whatever channel its context is
/// parked on. Caller holds the scheduler lock and the thread's state.
pub(crate) fn setrunnable(
    kern: &Kernel,
    _g: &SchedGuard,
    td: &Arc<Thread>,
    ts: &mut ThreadSigState,
) {
    if ts.run_state == RunState::Dead {
        return;
    }
    ts.prior_state = None;
    ts.run_state = RunState::Runnable;
    ts.flags.remove(ThreadFlags::SINTR);
    if let Some(ch) = ts.wchan {
        kern.sleep.wakeup(ch);
    }
    log::trace!("setrunnable: tid {}", td.id().as_u64());
}

/// Resume a thread released from a stop: back to the sleep it was
/// lifted out of, or runnable if it was not sleeping.
pub(crate) fn resume_thread(
    kern: &Kernel,
    g: &SchedGuard,
    td: &Arc<Thread>,
    ts: &mut ThreadSigState,
) {
    match ts.prior_state.take() {
        Some(prior) if prior.is_sleeping() => {
            ts.run_state = prior;
            if prior == RunState::SleepInterruptible {
                ts.flags.insert(ThreadFlags::SINTR);
            }
        }
        _ => setrunnable(kern, g, td, ts),
    }
}

/// Record a stop: the thread leaves the run queue, the process is marked
/// stopped with the stopping signal in its status slot, and the deferred
/// parent sweep is armed. The calling context parks separately via
/// [`park_while_stopped`] once the scheduler lock is released.
pub(crate) fn proc_stop(kern: &Kernel, _g: &SchedGuard, td: &Arc<Thread>, signum: u32) {
    let proc = td.process();
    {
        let mut ts = td.sig.lock();
        if ts.run_state == RunState::Dead {
            return;
        }
        if ts.run_state.is_sleeping() {
            ts.prior_state = Some(ts.run_state);
        }
        ts.run_state = RunState::Stopped;
        ts.flags.insert(ThreadFlags::SUSPSIG);
        ts.flags.remove(ThreadFlags::SINTR);
    }
    proc.inner.lock().xsig = signum;
    proc.flags.set(PsFlags::STOPPED);
    proc.flags.clear(PsFlags::WAITED | PsFlags::CONTINUED);
    arm_stop_sweep(kern, &proc);
}

fn arm_stop_sweep(kern: &Kernel, proc: &Arc<Process>) {
    if kern.stop_queue.push(proc.id()).is_err() {
        // Queue full: remember to scan the whole table instead.
        kern.stop_overflow.store(true, Ordering::SeqCst);
        log::debug!("stop sweep queue full, falling back to table scan");
    }
}

/// Run the deferred stop sweep.
///
/// The embedder calls this from its deferred-work context after any
/// operation that may have stopped a process. For every process still
/// flagged stopped: clear the flag, post SIGCHLD to the parent unless
/// the parent asked not to hear about stops, and wake the parent's wait.
pub fn stop_sweep(kern: &Kernel) {
    while let Some(pid) = kern.stop_queue.pop() {
        if let Some(proc) = kern.table.get(pid) {
            sweep_one(kern, &proc);
        }
    }
    if kern.stop_overflow.swap(false, Ordering::SeqCst) {
        for proc in kern.table.processes() {
            sweep_one(kern, &proc);
        }
    }
}

fn sweep_one(kern: &Kernel, proc: &Arc<Process>) {
    let g = kern.sched_lock();
    if !proc.flags.take(PsFlags::STOPPED) {
        return;
    }
    let parent = proc.parent_pid().and_then(|pp| kern.table.get(pp));
    let Some(parent) = parent else {
        return;
    };
    if !parent.flags.contains(PsFlags::NOCLDSTOP) {
        post::post_to_process_locked(kern, &g, None, &parent, SIGCHLD);
    }
    drop(g);
    kern.sleep.wakeup(WaitChannel::ChildWait(parent.id()));
}

/// Store the tracer's verdict for the reported signal and release the
/// trace-stopped threads. This is the one entry point the (out-of-scope)
/// ptrace command layer needs.
pub fn tracer_resume(kern: &Kernel, proc: &Arc<Process>, verdict: u32) {
    let g = kern.sched_lock();
    proc.inner.lock().xsig = verdict;
    for td in proc.threads() {
        let mut ts = td.sig.lock();
        if ts.run_state == RunState::Stopped && !ts.flags.contains(ThreadFlags::SUSPSINGLE) {
            ts.flags.remove(ThreadFlags::SUSPSIG);
            setrunnable(kern, &g, &td, &mut ts);
        }
    }
}

/// Park the calling context while its thread is stopped. Loops on the
/// run state, so spurious wakeups and stop/continue races resolve here.
pub(crate) fn park_while_stopped(kern: &Kernel, td: &Arc<Thread>) {
    let chan = WaitChannel::ThreadPark(td.id());
    loop {
        {
            let _g = kern.sched_lock();
            let mut ts = td.sig.lock();
            if ts.run_state != RunState::Stopped {
                ts.wchan = None;
                return;
            }
            ts.wchan = Some(chan);
        }
        kern.sleep.sleep(chan, None);
    }
}

/// Put the calling context into an interruptible sleep on `chan`.
///
/// The caller re-checks its predicate afterwards; a stop that landed
/// while sleeping is handled by parking before the recheck.
pub(crate) fn interruptible_sleep(
    kern: &Kernel,
    td: &Arc<Thread>,
    chan: WaitChannel,
    timeout_ticks: Option<u64>,
) -> SleepOutcome {
    {
        let _g = kern.sched_lock();
        let mut ts = td.sig.lock();
        if ts.run_state == RunState::Dead {
            return SleepOutcome::Woken;
        }
        ts.run_state = RunState::SleepInterruptible;
        ts.flags.insert(ThreadFlags::SINTR);
        ts.wchan = Some(chan);
    }
    let out = kern.sleep.sleep(chan, timeout_ticks);
    {
        let _g = kern.sched_lock();
        let mut ts = td.sig.lock();
        if ts.run_state == RunState::SleepInterruptible {
            ts.run_state = RunState::Runnable;
            ts.flags.remove(ThreadFlags::SINTR);
        }
        if ts.run_state != RunState::Stopped {
            ts.wchan = None;
        }
    }
    if td.run_state() == RunState::Stopped {
        park_while_stopped(kern, td);
    }
    out
}
